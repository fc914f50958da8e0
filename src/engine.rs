//! Bundled storage backend.
//!
//! The committed state is an immutable [`Snapshot`] of ordered trees. Readers
//! pin a snapshot, the single writer mutates a copy-on-write clone and
//! publishes it on commit. Every commit rewrites the data file, which is then
//! memory-mapped read-only.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use log::trace;
use memmap2::{Mmap, MmapOptions};
use parking_lot::{Mutex, RwLock};

use crate::constants::{
    DbFlags, EnvFlags, WriteFlags, DATA_FILE_NAME, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS,
    DEFAULT_MAX_READERS, LOCK_FILE_NAME, LOCK_FILE_SUFFIX, PAGE_SIZE,
};
use crate::error::{Error, Result};
use crate::meta::{ByteReader, MetaHeader};
use crate::tree::Tree;
use crate::types::{EnvInfo, Stat};

/// One committed state of every tree in the environment.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) txnid: u64,
    main: Arc<Tree>,
    named: BTreeMap<String, Arc<Tree>>,
}

impl Snapshot {
    fn empty() -> Self {
        Snapshot {
            txnid: 0,
            main: Arc::new(Tree::new(DbFlags::empty())),
            named: BTreeMap::new(),
        }
    }

    fn tree(&self, name: Option<&str>) -> Result<&Tree> {
        match name {
            None => Ok(&self.main),
            Some(name) => self.named.get(name).map(Arc::as_ref).ok_or(Error::BadDbi),
        }
    }

    fn shared_tree(&self, name: Option<&str>) -> Result<Arc<Tree>> {
        match name {
            None => Ok(Arc::clone(&self.main)),
            Some(name) => self.named.get(name).cloned().ok_or(Error::BadDbi),
        }
    }

    fn tree_mut(&mut self, name: Option<&str>) -> Result<&mut Tree> {
        match name {
            None => Ok(Arc::make_mut(&mut self.main)),
            Some(name) => self
                .named
                .get_mut(name)
                .map(Arc::make_mut)
                .ok_or(Error::BadDbi),
        }
    }

    fn encode(&self, map_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        MetaHeader::new(map_size, self.txnid, self.named.len()).write_to(&mut out);
        self.main.write_to(&mut out);
        for (name, tree) in &self.named {
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            tree.write_to(&mut out);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Snapshot> {
        let mut reader = ByteReader::new(bytes);
        let header = MetaHeader::read_from(&mut reader)?;
        let main = Tree::read_from(&mut reader)?;
        let mut named = BTreeMap::new();
        for _ in 0..header.tree_count {
            let len = reader.u32()? as usize;
            let name = std::str::from_utf8(reader.bytes(len)?)
                .map_err(|_| Error::Corrupted)?
                .to_owned();
            named.insert(name, Arc::new(Tree::read_from(&mut reader)?));
        }
        Ok(Snapshot {
            txnid: header.last_txnid,
            main: Arc::new(main),
            named,
        })
    }
}

/// Numeric limits and flags applied before the data file is opened.
#[derive(Debug, Clone)]
pub(crate) struct EngineBuilder {
    max_dbs: u32,
    max_readers: u32,
    map_size: usize,
    flags: EnvFlags,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            map_size: DEFAULT_MAP_SIZE,
            flags: EnvFlags::empty(),
        }
    }
}

impl EngineBuilder {
    pub(crate) fn max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    pub(crate) fn max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub(crate) fn map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub(crate) fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Open (or create) the data file at `path`.
    ///
    /// Fails with `EnvLocked` while another engine has the environment open
    /// for writing, or when opening for writing while read-only engines are
    /// open.
    pub(crate) fn open(self, path: &Path) -> Result<Arc<Engine>> {
        let data_path = data_file_path(path, self.flags)?;
        let lock = lock_environment(path, self.flags)?;

        let existing = fs::metadata(&data_path).map(|m| m.len() > 0).unwrap_or(false);
        if !existing {
            if self.flags.contains(EnvFlags::RDONLY) {
                return Err(io::Error::from(io::ErrorKind::NotFound).into());
            }
            let bytes = Snapshot::empty().encode(self.map_size);
            write_data_file(&data_path, &bytes, self.flags)?;
        }

        let map = map_file(&data_path)?;
        let snapshot = Snapshot::decode(&map)?;
        let map_size = self.map_size.max(round_to_page(map.len()));

        Ok(Arc::new(Engine {
            data_path,
            lock: Mutex::new(Some(lock)),
            flags: Mutex::new(self.flags),
            max_dbs: self.max_dbs,
            max_readers: self.max_readers,
            map_size: AtomicUsize::new(map_size),
            current: RwLock::new(Arc::new(snapshot)),
            map: RwLock::new(Some(map)),
            readers: AtomicU32::new(0),
            writer: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Open storage engine environment
#[derive(Debug)]
pub(crate) struct Engine {
    /// Location of the data file
    data_path: PathBuf,
    /// Lock file held until close
    lock: Mutex<Option<File>>,
    /// Environment flags
    flags: Mutex<EnvFlags>,
    /// Maximum number of named databases
    max_dbs: u32,
    /// Maximum number of reader slots
    max_readers: u32,
    /// Size limit of the data file
    map_size: AtomicUsize,
    /// Last committed snapshot
    current: RwLock<Arc<Snapshot>>,
    /// Read-only map of the committed data file
    map: RwLock<Option<Mmap>>,
    /// Reader slots in use
    readers: AtomicU32,
    /// Has active write transaction
    writer: AtomicBool,
    closed: AtomicBool,
}

impl Engine {
    pub(crate) fn flags(&self) -> EnvFlags {
        *self.flags.lock()
    }

    pub(crate) fn set_flags(&self, flags: EnvFlags, onoff: bool) {
        let mut current = self.flags.lock();
        if onoff {
            current.insert(flags);
        } else {
            current.remove(flags);
        }
    }

    pub(crate) fn max_readers(&self) -> u32 {
        self.max_readers
    }

    pub(crate) fn map_size(&self) -> usize {
        self.map_size.load(Ordering::SeqCst)
    }

    /// Bytes currently used by the committed data file.
    pub(crate) fn data_size(&self) -> usize {
        self.map.read().as_ref().map_or(0, |map| map.len())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    fn acquire_reader(&self) -> Result<()> {
        let max = self.max_readers;
        self.readers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map(|_| ())
            .map_err(|_| Error::ReadersFull)
    }

    fn release_reader(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Begin a transaction against the last committed snapshot.
    pub(crate) fn begin(self: &Arc<Self>, read_only: bool) -> Result<EngineTxn> {
        self.check_open()?;
        let mode = if read_only {
            self.acquire_reader()?;
            Mode::Read {
                snapshot: Some(self.current()),
            }
        } else {
            if self.flags().contains(EnvFlags::RDONLY) {
                return Err(Error::EnvReadOnly);
            }
            if self
                .writer
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(Error::BadTxn);
            }
            Mode::Write {
                working: (*self.current()).clone(),
                dirty: false,
            }
        };
        Ok(EngineTxn {
            engine: Arc::clone(self),
            mode,
        })
    }

    fn publish(&self, snapshot: Snapshot) -> Result<u64> {
        self.check_open()?;
        let map_size = self.map_size();
        let bytes = snapshot.encode(map_size);
        if bytes.len() > map_size {
            return Err(Error::MapFull);
        }
        write_data_file(&self.data_path, &bytes, self.flags())?;
        let map = map_file(&self.data_path)?;

        let txnid = snapshot.txnid;
        *self.map.write() = Some(map);
        *self.current.write() = Arc::new(snapshot);
        trace!("published txn {} ({} bytes)", txnid, bytes.len());
        Ok(txnid)
    }

    /// Set the map size, raised to the space already in use. Returns the
    /// size actually applied.
    pub(crate) fn set_map_size(&self, size: usize) -> Result<usize> {
        self.check_open()?;
        let effective = size.max(round_to_page(self.data_size()));
        self.map_size.store(effective, Ordering::SeqCst);
        Ok(effective)
    }

    /// Flush the data file to disk. With `force` false this is a no-op under
    /// `NOSYNC`.
    pub(crate) fn sync(&self, force: bool) -> Result<()> {
        self.check_open()?;
        let flags = self.flags();
        if flags.contains(EnvFlags::RDONLY) {
            return Err(Error::EnvReadOnly);
        }
        if force || !flags.contains(EnvFlags::NOSYNC) {
            OpenOptions::new()
                .read(true)
                .open(&self.data_path)?
                .sync_all()?;
        }
        Ok(())
    }

    /// Write the last committed snapshot to a new environment at `dest`.
    pub(crate) fn copy(&self, dest: &Path) -> Result<()> {
        self.check_open()?;
        let dest_file = data_file_path(dest, self.flags())?;
        if dest_file.exists() {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists).into());
        }
        let bytes = self.current().encode(self.map_size());
        write_data_file(&dest_file, &bytes, EnvFlags::empty())
    }

    pub(crate) fn stat(&self) -> Result<Stat> {
        self.check_open()?;
        Ok(self.current().main.stat())
    }

    pub(crate) fn info(&self) -> Result<EnvInfo> {
        self.check_open()?;
        let map = self.map.read();
        let data_size = map.as_ref().map_or(0, |map| map.len());
        Ok(EnvInfo {
            map_addr: map.as_ref().map_or(0, |map| map.as_ptr() as usize),
            map_size: self.map_size(),
            last_pgno: data_size.div_ceil(PAGE_SIZE).saturating_sub(1),
            last_txnid: self.current().txnid,
            max_readers: self.max_readers,
            num_readers: self.readers.load(Ordering::SeqCst),
        })
    }

    /// Release the memory map and the environment lock. Callers must have
    /// ended every transaction.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.map.write() = None;
        if let Some(lock) = self.lock.lock().take() {
            // Closing the file releases the lock as well
            let _ = FileExt::unlock(&lock);
        }
    }
}

fn round_to_page(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Resolve the data file location, checking that its directory exists.
fn data_file_path(path: &Path, flags: EnvFlags) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::EnvInvalidPath);
    }
    if flags.contains(EnvFlags::NOSUBDIR) {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(Error::EnvInvalidPath);
        }
        Ok(path.to_path_buf())
    } else {
        if !path.is_dir() {
            return Err(Error::EnvInvalidPath);
        }
        Ok(path.join(DATA_FILE_NAME))
    }
}

/// Lock the environment against other engines: shared for read-only
/// environments, exclusive otherwise.
fn lock_environment(path: &Path, flags: EnvFlags) -> Result<File> {
    let lock_path = if flags.contains(EnvFlags::NOSUBDIR) {
        let mut name = path.as_os_str().to_owned();
        name.push(LOCK_FILE_SUFFIX);
        PathBuf::from(name)
    } else {
        path.join(LOCK_FILE_NAME)
    };
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    let locked = if flags.contains(EnvFlags::RDONLY) {
        FileExt::try_lock_shared(&file)
    } else {
        FileExt::try_lock_exclusive(&file)
    };
    if locked.is_err() {
        return Err(Error::EnvLocked);
    }
    Ok(file)
}

/// Replace the data file atomically: write a sibling, sync it, rename.
fn write_data_file(path: &Path, bytes: &[u8], flags: EnvFlags) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(bytes)?;
    if !flags.contains(EnvFlags::NOSYNC) {
        if flags.contains(EnvFlags::NOMETASYNC) {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // The file is only ever replaced by rename, never modified in place.
    let map = unsafe { MmapOptions::new().map(&file)? };
    Ok(map)
}

enum Mode {
    Read { snapshot: Option<Arc<Snapshot>> },
    Write { working: Snapshot, dirty: bool },
    Done,
}

/// A transaction inside the engine. Dropping it aborts.
pub(crate) struct EngineTxn {
    engine: Arc<Engine>,
    mode: Mode,
}

impl EngineTxn {
    pub(crate) fn is_read_only(&self) -> bool {
        matches!(self.mode, Mode::Read { .. })
    }

    fn snapshot(&self) -> Result<&Snapshot> {
        match &self.mode {
            Mode::Read {
                snapshot: Some(snapshot),
            } => Ok(snapshot),
            Mode::Write { working, .. } => Ok(working),
            _ => Err(Error::BadTxn),
        }
    }

    fn working(&mut self) -> Result<&mut Snapshot> {
        match &mut self.mode {
            Mode::Write { working, dirty } => {
                *dirty = true;
                Ok(working)
            }
            Mode::Read { .. } => Err(Error::TxnReadOnly),
            Mode::Done => Err(Error::BadTxn),
        }
    }

    pub(crate) fn tree(&self, name: Option<&str>) -> Result<&Tree> {
        self.snapshot()?.tree(name)
    }

    /// Shared handle on a tree. A writer that mutates the tree while the
    /// handle is alive copies it first.
    pub(crate) fn shared_tree(&self, name: Option<&str>) -> Result<Arc<Tree>> {
        self.snapshot()?.shared_tree(name)
    }

    pub(crate) fn get(&self, name: Option<&str>, key: &[u8]) -> Result<Option<&[u8]>> {
        self.tree(name)?.get(key)
    }

    pub(crate) fn put(
        &mut self,
        name: Option<&str>,
        key: &[u8],
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        self.working()?.tree_mut(name)?.put(key, data, flags)
    }

    pub(crate) fn del(&mut self, name: Option<&str>, key: &[u8], data: Option<&[u8]>) -> Result<()> {
        self.working()?.tree_mut(name)?.del(key, data)
    }

    pub(crate) fn del_sorted(
        &mut self,
        name: Option<&str>,
        sort_key: &[u8],
        data: Option<&[u8]>,
    ) -> Result<()> {
        self.working()?.tree_mut(name)?.del_sorted(sort_key, data)
    }

    /// Open (or with `CREATE`, create) a tree. Returns its persistent flags.
    pub(crate) fn open_db(&mut self, name: Option<&str>, flags: DbFlags) -> Result<DbFlags> {
        let wanted = flags & DbFlags::PERSISTENT;
        let max_dbs = self.engine.max_dbs as usize;

        let (existing, named_count) = {
            let snapshot = self.snapshot()?;
            let existing = match name {
                None => Some((snapshot.main.flags(), snapshot.main.entries())),
                Some(name) => snapshot
                    .named
                    .get(name)
                    .map(|tree| (tree.flags(), tree.entries())),
            };
            (existing, snapshot.named.len())
        };

        match (name, existing) {
            (_, Some((stored, _))) if stored == wanted => Ok(stored),
            (None, Some((_, 0))) if !self.is_read_only() => {
                *self.working()?.tree_mut(None)? = Tree::new(wanted);
                Ok(wanted)
            }
            (_, Some(_)) => Err(Error::Incompatible),
            (Some(name), None) => {
                if !flags.contains(DbFlags::CREATE) {
                    return Err(Error::NotFound);
                }
                if named_count >= max_dbs {
                    return Err(Error::DbsFull);
                }
                self.working()?
                    .named
                    .insert(name.to_owned(), Arc::new(Tree::new(wanted)));
                Ok(wanted)
            }
            (None, None) => Err(Error::BadDbi),
        }
    }

    /// Empty a tree, or remove a named tree entirely when `delete` is set.
    pub(crate) fn drop_db(&mut self, name: Option<&str>, delete: bool) -> Result<()> {
        let working = self.working()?;
        match name {
            Some(name) if delete => working
                .named
                .remove(name)
                .map(|_| ())
                .ok_or(Error::BadDbi),
            _ => {
                working.tree_mut(name)?.clear();
                Ok(())
            }
        }
    }

    /// Commit. Returns the id of the committed snapshot.
    pub(crate) fn commit(mut self) -> Result<u64> {
        match std::mem::replace(&mut self.mode, Mode::Done) {
            Mode::Read { snapshot } => match snapshot {
                Some(snapshot) => {
                    self.engine.release_reader();
                    Ok(snapshot.txnid)
                }
                None => Ok(self.engine.current().txnid),
            },
            Mode::Write { mut working, dirty } => {
                let result = if dirty {
                    working.txnid += 1;
                    self.engine.publish(working)
                } else {
                    Ok(working.txnid)
                };
                self.engine.writer.store(false, Ordering::SeqCst);
                result
            }
            Mode::Done => Err(Error::BadTxn),
        }
    }

    pub(crate) fn abort(self) {}

    /// Release the reader's snapshot, keeping the transaction for `renew`.
    pub(crate) fn reset(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Read { snapshot } => {
                if snapshot.take().is_some() {
                    self.engine.release_reader();
                }
                Ok(())
            }
            _ => Err(Error::TxnNotReadOnly),
        }
    }

    /// Pin the latest committed snapshot again after `reset`.
    pub(crate) fn renew(&mut self) -> Result<()> {
        match self.mode {
            Mode::Read { snapshot: None } => {
                self.engine.check_open()?;
                self.engine.acquire_reader()?;
                self.mode = Mode::Read {
                    snapshot: Some(self.engine.current()),
                };
                Ok(())
            }
            Mode::Read { .. } => Err(Error::BadTxn),
            _ => Err(Error::TxnNotReadOnly),
        }
    }
}

impl Drop for EngineTxn {
    fn drop(&mut self) {
        match &self.mode {
            Mode::Read { snapshot: Some(_) } => self.engine.release_reader(),
            Mode::Write { .. } => self.engine.writer.store(false, Ordering::SeqCst),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Arc<Engine> {
        EngineBuilder::default().open(dir.path()).unwrap()
    }

    #[test]
    fn committed_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open(&dir);
            let mut txn = engine.begin(false).unwrap();
            txn.open_db(Some("named"), DbFlags::CREATE).unwrap();
            txn.put(None, b"k", b"v", WriteFlags::empty()).unwrap();
            txn.put(Some("named"), b"a", b"b", WriteFlags::empty())
                .unwrap();
            assert_eq!(txn.commit().unwrap(), 1);
            engine.close();
        }
        let engine = open(&dir);
        assert_eq!(engine.info().unwrap().last_txnid, 1);
        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(None, b"k").unwrap(), Some(&b"v"[..]));
        assert_eq!(txn.get(Some("named"), b"a").unwrap(), Some(&b"b"[..]));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        let reader = engine.begin(true).unwrap();

        let mut writer = engine.begin(false).unwrap();
        writer.put(None, b"k", b"v", WriteFlags::empty()).unwrap();
        assert_eq!(writer.get(None, b"k").unwrap(), Some(&b"v"[..]));
        writer.commit().unwrap();

        assert_eq!(reader.get(None, b"k").unwrap(), None);
        let mut reader = reader;
        reader.reset().unwrap();
        reader.renew().unwrap();
        assert_eq!(reader.get(None, b"k").unwrap(), Some(&b"v"[..]));
    }

    #[test]
    fn aborted_writes_are_discarded() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        let mut txn = engine.begin(false).unwrap();
        txn.put(None, b"k", b"v", WriteFlags::empty()).unwrap();
        txn.abort();
        let txn = engine.begin(true).unwrap();
        assert_eq!(txn.get(None, b"k").unwrap(), None);
        assert_eq!(engine.info().unwrap().last_txnid, 0);
    }

    #[test]
    fn limits_are_enforced() {
        let dir = TempDir::new().unwrap();
        let engine = EngineBuilder::default()
            .max_readers(1)
            .max_dbs(1)
            .map_size(PAGE_SIZE)
            .open(dir.path())
            .unwrap();

        let first = engine.begin(true).unwrap();
        assert!(matches!(engine.begin(true), Err(Error::ReadersFull)));
        drop(first);
        assert!(engine.begin(true).is_ok());

        let mut txn = engine.begin(false).unwrap();
        txn.open_db(Some("one"), DbFlags::CREATE).unwrap();
        assert!(matches!(
            txn.open_db(Some("two"), DbFlags::CREATE),
            Err(Error::DbsFull)
        ));
        assert!(matches!(
            txn.open_db(Some("one"), DbFlags::DUPSORT),
            Err(Error::Incompatible)
        ));
        assert!(matches!(
            txn.open_db(Some("missing"), DbFlags::empty()),
            Err(Error::NotFound)
        ));
        txn.put(None, b"big", &vec![0; PAGE_SIZE * 2], WriteFlags::empty())
            .unwrap();
        assert!(matches!(txn.commit(), Err(Error::MapFull)));
        assert!(engine.begin(false).is_ok());
    }

    #[test]
    fn single_engine_writer() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        let _writer = engine.begin(false).unwrap();
        assert!(matches!(engine.begin(false), Err(Error::BadTxn)));
    }

    #[test]
    fn second_engine_on_a_path_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        assert!(matches!(
            EngineBuilder::default().open(dir.path()),
            Err(Error::EnvLocked)
        ));
        engine.close();
        assert!(EngineBuilder::default().open(dir.path()).is_ok());
    }

    #[test]
    fn read_only_engines_share_the_lock() {
        let dir = TempDir::new().unwrap();
        open(&dir).close();

        let read_only = || {
            EngineBuilder::default()
                .flags(EnvFlags::RDONLY)
                .open(dir.path())
        };
        let first = read_only().unwrap();
        let second = read_only().unwrap();
        assert!(matches!(
            EngineBuilder::default().open(dir.path()),
            Err(Error::EnvLocked)
        ));
        first.close();
        second.close();
        assert!(EngineBuilder::default().open(dir.path()).is_ok());
    }

    #[test]
    fn missing_directory_is_invalid_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            EngineBuilder::default().open(&missing),
            Err(Error::EnvInvalidPath)
        ));
    }

    #[test]
    fn resize_is_raised_to_used_space() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        let applied = engine.set_map_size(0).unwrap();
        assert_eq!(applied, PAGE_SIZE);
        assert_eq!(engine.info().unwrap().map_size, PAGE_SIZE);
    }
}
