use lazy_static::lazy_static;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::constants::{
    EnvFlags, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, MAX_KEY_SIZE, PAGE_SIZE,
};
use crate::database::{Database, DbOptions};
use crate::engine::{Engine, EngineBuilder};
use crate::error::{Error, Result};
use crate::transaction::{Transaction, TxnSlot};
use crate::types::{EnvInfo, Stat};
use crate::worker::WorkerTask;

lazy_static! {
    static ref CHANGEABLE: EnvFlags =
        EnvFlags::NOSYNC | EnvFlags::NOMETASYNC | EnvFlags::MAPASYNC | EnvFlags::NOMEMINIT;
}

/// Settings applied before the environment's map is opened.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    path: PathBuf,
    max_dbs: u32,
    max_readers: u32,
    map_size: usize,
    flags: EnvFlags,
}

impl EnvConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        EnvConfig {
            path: path.as_ref().to_path_buf(),
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            map_size: DEFAULT_MAP_SIZE,
            flags: EnvFlags::empty(),
        }
    }

    /// Maximum number of named databases
    pub fn max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    /// Maximum number of concurrent read transactions
    pub fn max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Size of the memory map in bytes; must be a multiple of the page size
    pub fn map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::EnvInvalidPath);
        }
        if self.max_readers == 0 {
            return Err(Error::EnvInvalidMaxReaders);
        }
        if self.map_size == 0 || self.map_size % PAGE_SIZE != 0 {
            return Err(Error::EnvInvalidMapSize(PAGE_SIZE));
        }
        Ok(())
    }
}

/// Live transactions attached to an environment. Entries are non-owning;
/// each transaction unregisters itself when it ends.
#[derive(Default)]
struct Registry {
    writer: Option<(u64, Weak<TxnSlot>)>,
    readers: BTreeMap<u64, Weak<TxnSlot>>,
    next_id: u64,
}

impl Registry {
    fn live_readers(&self) -> usize {
        self.readers.values().filter(|r| r.strong_count() > 0).count()
    }

    fn drain(&mut self) -> Vec<Arc<TxnSlot>> {
        self.writer
            .take()
            .map(|(_, slot)| slot)
            .into_iter()
            .chain(std::mem::take(&mut self.readers).into_values())
            .filter_map(|slot| slot.upgrade())
            .collect()
    }
}

pub(crate) struct EnvInner {
    path: PathBuf,
    /// `None` once closed
    engine: RwLock<Option<Arc<Engine>>>,
    registry: Mutex<Registry>,
}

impl EnvInner {
    pub(crate) fn unregister(&self, id: u64) {
        let mut registry = self.registry.lock();
        if matches!(registry.writer, Some((writer, _)) if writer == id) {
            registry.writer = None;
        } else {
            registry.readers.remove(&id);
        }
    }
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.get_mut().take() {
            engine.close();
            info!("closed environment at {}", self.path.display());
        }
    }
}

/// Handle on one open environment.
///
/// Clones share the same environment. The environment owns the
/// single-writer bookkeeping: at most one write transaction may be live at a
/// time, and closing aborts every transaction still attached.
#[derive(Clone)]
pub struct Environment {
    pub(crate) inner: Arc<EnvInner>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Environment {
    /// Open the environment
    ///
    /// Numeric limits are applied before the map is opened. `NOTLS` is always
    /// set. If any step fails the partially opened environment is released.
    pub fn open(config: EnvConfig) -> Result<Environment> {
        config.validate()?;
        let flags = config.flags | EnvFlags::NOTLS;

        let engine = EngineBuilder::default()
            .max_dbs(config.max_dbs)
            .max_readers(config.max_readers)
            .map_size(config.map_size)
            .flags(flags)
            .open(&config.path)?;
        info!(
            "opened environment at {} (map size {} bytes)",
            config.path.display(),
            engine.map_size()
        );

        Ok(Environment {
            inner: Arc::new(EnvInner {
                path: config.path,
                engine: RwLock::new(Some(engine)),
                registry: Mutex::new(Registry::default()),
            }),
        })
    }

    pub(crate) fn engine(&self) -> Result<Arc<Engine>> {
        self.inner.engine.read().clone().ok_or(Error::EnvClosed)
    }

    pub(crate) fn downgrade(&self) -> Weak<EnvInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn ptr_eq(&self, other: &Weak<EnvInner>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), other.as_ptr())
    }

    /// Close the environment.
    ///
    /// Any transaction still attached is aborted first. Closing twice is an
    /// error.
    pub fn close(&self) -> Result<()> {
        let mut registry = self.inner.registry.lock();
        let engine = self.inner.engine.write().take().ok_or(Error::EnvClosed)?;

        for slot in registry.drain() {
            if slot.abort_stray() {
                warn!(
                    "aborting stray {} transaction {} on close of {}",
                    slot.kind(),
                    slot.id(),
                    self.inner.path.display()
                );
            }
        }

        engine.close();
        info!("closed environment at {}", self.inner.path.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.engine.read().is_none()
    }

    /// Set the size of the memory map.
    ///
    /// Only allowed while no transaction is attached. The size must be a
    /// multiple of the page size; it is raised to the space already in use.
    pub fn resize(&self, map_size: usize) -> Result<()> {
        let engine = self.engine()?;
        if map_size == 0 || map_size % PAGE_SIZE != 0 {
            return Err(Error::EnvInvalidMapSize(PAGE_SIZE));
        }

        let registry = self.inner.registry.lock();
        let writer = registry.writer.is_some();
        let readers = registry.live_readers();
        if writer || readers > 0 {
            return Err(Error::TransactionsAttached { writer, readers });
        }

        let applied = engine.set_map_size(map_size)?;
        info!(
            "resized environment at {} to {} bytes",
            self.inner.path.display(),
            applied
        );
        Ok(())
    }

    /// Begin a transaction.
    ///
    /// A write transaction fails with [`Error::WriterBusy`] while another
    /// write transaction is live; callers must serialize writers themselves.
    pub fn begin_txn(&self, read_only: bool) -> Result<Transaction> {
        let mut registry = self.inner.registry.lock();
        let engine = self.engine()?;
        if !read_only {
            if engine.flags().contains(EnvFlags::RDONLY) {
                return Err(Error::EnvReadOnly);
            }
            if registry.writer.is_some() {
                return Err(Error::WriterBusy);
            }
        }

        let engine_txn = engine.begin(read_only)?;
        let id = registry.next_id;
        registry.next_id += 1;
        let slot = Arc::new(TxnSlot::new(id, read_only, engine_txn));
        if read_only {
            registry.readers.insert(id, Arc::downgrade(&slot));
        } else {
            registry.writer = Some((id, Arc::downgrade(&slot)));
        }
        Ok(Transaction::new(self.clone(), slot))
    }

    /// Open a database in its own transaction.
    pub fn open_db(&self, options: &DbOptions) -> Result<Database> {
        let read_only = self.flags()?.contains(EnvFlags::RDONLY);
        let mut txn = self.begin_txn(read_only)?;
        let db = Database::open(&mut txn, options)?;
        txn.commit()?;
        Ok(db)
    }

    /// Empty a database, or delete it when `delete` is set, in its own
    /// transaction.
    pub fn drop_db(&self, db: &Database, delete: bool) -> Result<()> {
        let mut txn = self.begin_txn(false)?;
        db.drop(&mut txn, delete)?;
        txn.commit()?;
        Ok(())
    }

    /// Statistics for the main database
    pub fn stat(&self) -> Result<Stat> {
        self.engine()?.stat()
    }

    pub fn info(&self) -> Result<EnvInfo> {
        self.engine()?.info()
    }

    /// Flush the data buffers to disk.
    ///
    /// Data is always written when transactions commit, but with `NOSYNC` the
    /// operating system may keep it buffered. With `force` the flush happens
    /// even under `NOSYNC`. Not valid on a read-only environment.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.engine()?.sync(force)
    }

    /// Durable flush on a background worker.
    pub fn flush(&self) -> Result<WorkerTask<(), ()>> {
        let engine = self.engine()?;
        WorkerTask::spawn("lumodb-flush", move |_| engine.sync(true))
    }

    /// Copy the last committed state to a new environment at `path`.
    pub fn copy<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.engine()?.copy(path.as_ref())
    }

    /// Set or clear environment flags. Only `NOSYNC`, `NOMETASYNC`,
    /// `MAPASYNC` and `NOMEMINIT` may change after open.
    pub fn set_flags(&self, flags: EnvFlags, onoff: bool) -> Result<()> {
        let engine = self.engine()?;
        if !CHANGEABLE.contains(flags) {
            return Err(Error::EnvFlagsImmutable);
        }
        engine.set_flags(flags, onoff);
        Ok(())
    }

    pub fn flags(&self) -> Result<EnvFlags> {
        Ok(self.engine()?.flags())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn max_readers(&self) -> Result<u32> {
        Ok(self.engine()?.max_readers())
    }

    pub fn max_key_size(&self) -> usize {
        MAX_KEY_SIZE
    }

    /// Bytes used up to and including the last page
    pub fn used_size(&self) -> Result<usize> {
        let info = self.info()?;
        Ok((info.last_pgno + 1) * PAGE_SIZE)
    }

    /// Number of read transactions attached
    pub fn active_readers(&self) -> usize {
        self.inner.registry.lock().live_readers()
    }

    pub fn has_writer(&self) -> bool {
        self.inner.registry.lock().writer.is_some()
    }
}
