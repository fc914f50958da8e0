use lumodb_binding::{
    DbOptions, EnvConfig, EnvFlags, Environment, Error, TxnState, PAGE_SIZE,
};
use std::thread;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(temp_dir.path())).unwrap();
    (temp_dir, env)
}

#[test]
fn test_single_writer() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut first = env.begin_txn(false).unwrap();
    assert!(matches!(env.begin_txn(false), Err(Error::WriterBusy)));

    // Readers are never blocked by the writer
    let reader = env.begin_txn(true).unwrap();
    assert!(reader.is_read_only());

    first.put(&db, "k", "v").unwrap();
    let txn_id = first.commit().unwrap();
    assert_eq!(first.committed_txn_id(), Some(txn_id));
    assert_eq!(first.state(), TxnState::Committed);

    let mut second = env.begin_txn(false).unwrap();
    assert_eq!(second.get_string(&db, "k").unwrap(), Some("v".into()));
    second.abort().unwrap();
}

#[test]
fn test_writer_busy_across_threads() {
    let (_dir, env) = setup_test_env();
    let writer = env.begin_txn(false).unwrap();

    let other = env.clone();
    let busy = thread::spawn(move || matches!(other.begin_txn(false), Err(Error::WriterBusy)))
        .join()
        .unwrap();
    assert!(busy);

    drop(writer);
    let other = env.clone();
    let free = thread::spawn(move || other.begin_txn(false).map(drop).is_ok())
        .join()
        .unwrap();
    assert!(free);
}

#[test]
fn test_operations_after_end_fail() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "a", "1").unwrap();
    txn.commit().unwrap();

    assert!(matches!(txn.get(&db, "a"), Err(Error::TxnClosed)));
    assert!(matches!(txn.put(&db, "a", "2"), Err(Error::TxnClosed)));
    assert!(matches!(txn.commit(), Err(Error::TxnClosed)));
    assert!(matches!(txn.abort(), Err(Error::TxnClosed)));

    let mut txn = env.begin_txn(false).unwrap();
    txn.abort().unwrap();
    assert_eq!(txn.state(), TxnState::Aborted);
    assert!(matches!(txn.get(&db, "a"), Err(Error::TxnClosed)));
}

#[test]
fn test_abort_discards_writes() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "gone", "soon").unwrap();
    txn.abort().unwrap();

    let txn = env.begin_txn(true).unwrap();
    assert_eq!(txn.get(&db, "gone").unwrap(), None);
}

#[test]
fn test_dropped_writer_is_aborted() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    {
        let mut txn = env.begin_txn(false).unwrap();
        txn.put(&db, "stray", "write").unwrap();
    }
    assert!(!env.has_writer());

    let txn = env.begin_txn(false).unwrap();
    assert_eq!(txn.get(&db, "stray").unwrap(), None);
}

#[test]
fn test_read_only_transaction_rejects_writes() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut txn = env.begin_txn(true).unwrap();
    assert!(matches!(txn.put(&db, "k", "v"), Err(Error::TxnReadOnly)));
    assert!(matches!(txn.del(&db, "k"), Err(Error::TxnReadOnly)));
}

#[test]
fn test_readers_see_a_snapshot() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "k", "old").unwrap();
    txn.commit().unwrap();

    let mut reader = env.begin_txn(true).unwrap();
    let mut writer = env.begin_txn(false).unwrap();
    writer.put(&db, "k", "new").unwrap();
    writer.commit().unwrap();

    assert_eq!(reader.get_string(&db, "k").unwrap(), Some("old".into()));

    // A renewed reader picks up the latest commit
    reader.reset().unwrap();
    assert_eq!(reader.state(), TxnState::Reset);
    assert!(matches!(reader.get(&db, "k"), Err(Error::BadTxn)));
    reader.renew().unwrap();
    assert_eq!(reader.get_string(&db, "k").unwrap(), Some("new".into()));
}

#[test]
fn test_reset_renew_rules() {
    let (_dir, env) = setup_test_env();

    let mut writer = env.begin_txn(false).unwrap();
    assert!(matches!(writer.reset(), Err(Error::TxnNotReadOnly)));
    assert!(matches!(writer.renew(), Err(Error::TxnNotReadOnly)));
    writer.abort().unwrap();

    let mut reader = env.begin_txn(true).unwrap();
    assert!(matches!(reader.renew(), Err(Error::BadTxn)));
    reader.reset().unwrap();
    reader.reset().unwrap();
    assert!(matches!(reader.commit(), Err(Error::BadTxn)));

    // A reset reader can still be aborted
    reader.abort().unwrap();
    assert!(matches!(reader.renew(), Err(Error::TxnClosed)));
}

#[test]
fn test_close_aborts_attached_transactions() {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
    let db = env.open_db(&DbOptions::new()).unwrap();

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "k", "v").unwrap();
    txn.commit().unwrap();

    let reader = env.begin_txn(true).unwrap();
    let mut writer = env.begin_txn(false).unwrap();
    writer.put(&db, "uncommitted", "x").unwrap();

    env.close().unwrap();
    assert!(env.is_closed());
    assert_eq!(reader.state(), TxnState::Aborted);
    assert_eq!(writer.state(), TxnState::Aborted);
    assert!(matches!(reader.get(&db, "k"), Err(Error::TxnClosed)));
    assert!(matches!(writer.commit(), Err(Error::TxnClosed)));

    assert!(matches!(env.close(), Err(Error::EnvClosed)));
    assert!(matches!(env.begin_txn(true), Err(Error::EnvClosed)));
    assert!(matches!(env.stat(), Err(Error::EnvClosed)));
    drop(reader);
    drop(writer);

    let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
    let db = env.open_db(&DbOptions::new()).unwrap();
    let txn = env.begin_txn(true).unwrap();
    assert_eq!(txn.get_string(&db, "k").unwrap(), Some("v".into()));
    assert_eq!(txn.get(&db, "uncommitted").unwrap(), None);
}

#[test]
fn test_resize_requires_no_transactions() {
    let (_dir, env) = setup_test_env();

    assert!(matches!(
        env.resize(PAGE_SIZE + 1),
        Err(Error::EnvInvalidMapSize(PAGE_SIZE))
    ));

    let reader = env.begin_txn(true).unwrap();
    assert!(matches!(
        env.resize(PAGE_SIZE * 1024),
        Err(Error::TransactionsAttached {
            writer: false,
            readers: 1
        })
    ));
    let writer = env.begin_txn(false).unwrap();
    assert!(matches!(
        env.resize(PAGE_SIZE * 1024),
        Err(Error::TransactionsAttached {
            writer: true,
            readers: 1
        })
    ));
    drop(writer);
    drop(reader);

    env.resize(PAGE_SIZE * 1024).unwrap();
    assert_eq!(env.info().unwrap().map_size, PAGE_SIZE * 1024);
}

#[test]
fn test_reader_limit() {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(dir.path()).max_readers(2)).unwrap();
    assert_eq!(env.max_readers().unwrap(), 2);

    let first = env.begin_txn(true).unwrap();
    let second = env.begin_txn(true).unwrap();
    assert!(matches!(env.begin_txn(true), Err(Error::ReadersFull)));
    assert_eq!(env.active_readers(), 2);
    assert_eq!(env.info().unwrap().num_readers, 2);

    drop(first);
    drop(second);
    env.begin_txn(true).unwrap();
}

#[test]
fn test_read_only_environment() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
        let db = env.open_db(&DbOptions::new()).unwrap();
        let mut txn = env.begin_txn(false).unwrap();
        txn.put(&db, "k", 1.0).unwrap();
        txn.commit().unwrap();
    }

    let env = Environment::open(EnvConfig::new(dir.path()).flags(EnvFlags::RDONLY)).unwrap();
    assert!(matches!(env.begin_txn(false), Err(Error::EnvReadOnly)));
    assert!(matches!(env.sync(true), Err(Error::EnvReadOnly)));

    let db = env.open_db(&DbOptions::new()).unwrap();
    let txn = env.begin_txn(true).unwrap();
    assert_eq!(txn.get_number(&db, "k").unwrap(), Some(1.0));
}

#[test]
fn test_commit_ids_and_sync() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(&DbOptions::new()).unwrap();
    let base = env.info().unwrap().last_txnid;

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "a", "1").unwrap();
    let id = txn.commit().unwrap();
    assert_eq!(id, base + 1);
    assert_eq!(env.info().unwrap().last_txnid, id);

    env.set_flags(EnvFlags::NOSYNC, true).unwrap();
    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "b", "2").unwrap();
    txn.commit().unwrap();
    env.sync(true).unwrap();
    env.flush().unwrap().wait().unwrap();

    assert!(env.used_size().unwrap() >= PAGE_SIZE);
}

#[test]
fn test_second_handle_on_a_path_is_refused() {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
    let db = env.open_db(&DbOptions::new()).unwrap();

    assert!(matches!(
        Environment::open(EnvConfig::new(dir.path())),
        Err(Error::EnvLocked)
    ));
    assert!(matches!(
        Environment::open(EnvConfig::new(dir.path()).flags(EnvFlags::RDONLY)),
        Err(Error::EnvLocked)
    ));

    let mut txn = env.begin_txn(false).unwrap();
    txn.put(&db, "k", "kept").unwrap();
    txn.commit().unwrap();
    env.close().unwrap();

    // Closing releases the lock and the commit is still there
    let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
    let db = env.open_db(&DbOptions::new()).unwrap();
    let txn = env.begin_txn(true).unwrap();
    assert_eq!(txn.get_string(&db, "k").unwrap(), Some("kept".to_owned()));
}

#[test]
fn test_read_only_handles_share_a_path() {
    let dir = TempDir::new().unwrap();
    Environment::open(EnvConfig::new(dir.path()))
        .unwrap()
        .close()
        .unwrap();

    let first = Environment::open(EnvConfig::new(dir.path()).flags(EnvFlags::RDONLY)).unwrap();
    let second = Environment::open(EnvConfig::new(dir.path()).flags(EnvFlags::RDONLY)).unwrap();
    assert!(matches!(
        Environment::open(EnvConfig::new(dir.path())),
        Err(Error::EnvLocked)
    ));

    drop(first);
    drop(second);
    Environment::open(EnvConfig::new(dir.path())).unwrap();
}
