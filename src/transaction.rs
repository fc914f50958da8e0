use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use crate::constants::{DbFlags, WriteFlags};
use crate::database::Database;
use crate::engine::EngineTxn;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::key::{encode_key, Key};
use crate::tree::Tree;
use crate::value::{decode_value, decode_value_ref, encode_value, Value, ValueRef, ValueType};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    /// Read-only transaction whose snapshot was released by `reset`
    Reset,
    Committed,
    Aborted,
}

pub(crate) struct SlotState {
    status: TxnState,
    engine: Option<EngineTxn>,
}

impl SlotState {
    fn engine(&self) -> Result<&EngineTxn> {
        self.engine.as_ref().ok_or(Error::TxnClosed)
    }

    fn engine_mut(&mut self) -> Result<&mut EngineTxn> {
        self.engine.as_mut().ok_or(Error::TxnClosed)
    }
}

/// Shared part of a transaction, referenced weakly by the environment's
/// registry so a close can abort it.
pub(crate) struct TxnSlot {
    id: u64,
    read_only: bool,
    state: Mutex<SlotState>,
}

impl TxnSlot {
    pub(crate) fn new(id: u64, read_only: bool, engine: EngineTxn) -> Self {
        TxnSlot {
            id,
            read_only,
            state: Mutex::new(SlotState {
                status: TxnState::Active,
                engine: Some(engine),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> &'static str {
        if self.read_only {
            "read"
        } else {
            "write"
        }
    }

    /// Abort the transaction if it has not ended. Returns whether it had to.
    pub(crate) fn abort_stray(&self) -> bool {
        let mut state = self.state.lock();
        match state.status {
            TxnState::Active | TxnState::Reset => {
                if let Some(txn) = state.engine.take() {
                    txn.abort();
                }
                state.status = TxnState::Aborted;
                true
            }
            TxnState::Committed | TxnState::Aborted => false,
        }
    }
}

/// Database transaction
///
/// Committed and aborted transactions stay usable as handles, but every
/// further operation fails with [`Error::TxnClosed`]. Dropping a
/// transaction that is still live aborts it.
pub struct Transaction {
    env: Environment,
    slot: Arc<TxnSlot>,
    committed_txn_id: Option<u64>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.slot.id)
            .field("read_only", &self.slot.read_only)
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(env: Environment, slot: Arc<TxnSlot>) -> Self {
        Transaction {
            env,
            slot,
            committed_txn_id: None,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn is_read_only(&self) -> bool {
        self.slot.read_only
    }

    pub fn state(&self) -> TxnState {
        self.slot.state.lock().status
    }

    /// Engine transaction id assigned by a successful commit
    pub fn committed_txn_id(&self) -> Option<u64> {
        self.committed_txn_id
    }

    fn active(&self) -> Result<MutexGuard<'_, SlotState>> {
        let state = self.slot.state.lock();
        match state.status {
            TxnState::Active => Ok(state),
            TxnState::Reset => Err(Error::BadTxn),
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnClosed),
        }
    }

    fn writable(&self) -> Result<MutexGuard<'_, SlotState>> {
        let state = self.active()?;
        if self.slot.read_only {
            return Err(Error::TxnReadOnly);
        }
        Ok(state)
    }

    fn check_db(&self, db: &Database) -> Result<()> {
        if !db.belongs_to(&self.env) {
            return Err(Error::ForeignDatabase);
        }
        Ok(())
    }

    fn key_bytes<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Vec<u8>> {
        self.check_db(db)?;
        encode_key(&key.into(), db.key_type())
    }

    pub(crate) fn open_tree(&mut self, name: Option<&str>, flags: DbFlags) -> Result<DbFlags> {
        let mut state = self.active()?;
        state.engine_mut()?.open_db(name, flags)
    }

    pub(crate) fn drop_tree(&mut self, db: &Database, delete: bool) -> Result<()> {
        self.check_db(db)?;
        let mut state = self.writable()?;
        state.engine_mut()?.drop_db(db.name(), delete)
    }

    /// Shared handle on the database's tree as this transaction sees it.
    pub(crate) fn tree(&self, db: &Database) -> Result<Arc<Tree>> {
        self.check_db(db)?;
        let state = self.active()?;
        state.engine()?.shared_tree(db.name())
    }

    pub(crate) fn put_raw(
        &mut self,
        db: &Database,
        key: &[u8],
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        self.check_db(db)?;
        let mut state = self.writable()?;
        state.engine_mut()?.put(db.name(), key, data, flags)
    }

    /// Delete, reporting a missing key as `false` instead of an error.
    pub(crate) fn del_raw(&mut self, db: &Database, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        self.check_db(db)?;
        let mut state = self.writable()?;
        match state.engine_mut()?.del(db.name(), key, data) {
            Ok(()) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn del_sorted(
        &mut self,
        db: &Database,
        sort_key: &[u8],
        data: Option<&[u8]>,
    ) -> Result<()> {
        self.check_db(db)?;
        let mut state = self.writable()?;
        state
            .engine_mut()?
            .del_sorted(db.name(), sort_key, data)
    }

    /// Stored bytes for `key`, copied, without decoding.
    pub fn get_bytes<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<Vec<u8>>> {
        let key = self.key_bytes(db, key)?;
        let state = self.active()?;
        Ok(state
            .engine()?
            .get(db.name(), &key)?
            .map(<[u8]>::to_vec))
    }

    fn get_as<K: Into<Key>>(
        &self,
        db: &Database,
        key: K,
        requested: Option<ValueType>,
    ) -> Result<Option<Value>> {
        let key = self.key_bytes(db, key)?;
        let state = self.active()?;
        match state.engine()?.get(db.name(), &key)? {
            Some(bytes) => decode_value(bytes, requested).map(Some),
            None => Ok(None),
        }
    }

    /// Value of whatever type was stored.
    pub fn get<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<Value>> {
        self.get_as(db, key, None)
    }

    pub fn get_string<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<String>> {
        Ok(match self.get_as(db, key, Some(ValueType::String))? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }

    pub fn get_binary<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<Vec<u8>>> {
        Ok(match self.get_as(db, key, Some(ValueType::Binary))? {
            Some(Value::Binary(b)) => Some(b),
            _ => None,
        })
    }

    pub fn get_number<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<f64>> {
        Ok(match self.get_as(db, key, Some(ValueType::Number))? {
            Some(Value::Number(n)) => Some(n),
            _ => None,
        })
    }

    pub fn get_boolean<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<bool>> {
        Ok(match self.get_as(db, key, Some(ValueType::Boolean))? {
            Some(Value::Boolean(b)) => Some(b),
            _ => None,
        })
    }

    /// Zero-copy view of the stored value.
    ///
    /// The view borrows the transaction, so it cannot outlive it and no
    /// mutation can happen through the transaction while it exists.
    pub fn get_view<K: Into<Key>>(&self, db: &Database, key: K) -> Result<Option<ValueView<'_>>> {
        let key = self.key_bytes(db, key)?;
        let tree = self.tree(db)?;
        let sort_key = tree.sort_key(&key)?;
        if tree.node(&sort_key).is_none() {
            return Ok(None);
        }
        Ok(Some(ValueView::new(tree, sort_key, 0)))
    }

    /// Store a typed value.
    pub fn put<K: Into<Key>, V: Into<Value>>(&mut self, db: &Database, key: K, value: V) -> Result<()> {
        self.put_with(db, key, &value.into(), WriteFlags::empty())
    }

    pub fn put_with<K: Into<Key>>(
        &mut self,
        db: &Database,
        key: K,
        value: &Value,
        flags: WriteFlags,
    ) -> Result<()> {
        let key = self.key_bytes(db, key)?;
        self.put_raw(db, &key, &encode_value(value), flags)
    }

    pub fn put_string<K: Into<Key>>(&mut self, db: &Database, key: K, value: &str) -> Result<()> {
        self.put(db, key, value)
    }

    pub fn put_binary<K: Into<Key>>(&mut self, db: &Database, key: K, value: &[u8]) -> Result<()> {
        self.put(db, key, value)
    }

    pub fn put_number<K: Into<Key>>(&mut self, db: &Database, key: K, value: f64) -> Result<()> {
        self.put(db, key, value)
    }

    pub fn put_boolean<K: Into<Key>>(&mut self, db: &Database, key: K, value: bool) -> Result<()> {
        self.put(db, key, value)
    }

    /// Store bytes as-is, without a type discriminant.
    pub fn put_bytes<K: Into<Key>>(&mut self, db: &Database, key: K, data: &[u8]) -> Result<()> {
        let key = self.key_bytes(db, key)?;
        self.put_raw(db, &key, data, WriteFlags::empty())
    }

    /// Delete a key and all of its values. A missing key is an error.
    pub fn del<K: Into<Key>>(&mut self, db: &Database, key: K) -> Result<()> {
        let key = self.key_bytes(db, key)?;
        if self.del_raw(db, &key, None)? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Delete one duplicate of a `DUPSORT` key.
    pub fn del_dup<K: Into<Key>>(&mut self, db: &Database, key: K, value: &Value) -> Result<()> {
        let key = self.key_bytes(db, key)?;
        if self.del_raw(db, &key, Some(&encode_value(value)))? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Commit the transaction
    ///
    /// Only legal while active. If the engine rejects the commit the
    /// transaction ends aborted. Returns the engine transaction id.
    pub fn commit(&mut self) -> Result<u64> {
        let result = {
            let mut state = self.slot.state.lock();
            match state.status {
                TxnState::Active => {}
                TxnState::Reset => return Err(Error::BadTxn),
                TxnState::Committed | TxnState::Aborted => return Err(Error::TxnClosed),
            }
            let txn = state.engine.take().ok_or(Error::TxnClosed)?;
            let result = txn.commit();
            state.status = if result.is_ok() {
                TxnState::Committed
            } else {
                TxnState::Aborted
            };
            result
        };
        self.env.inner.unregister(self.slot.id);

        match result {
            Ok(txn_id) => {
                debug!(
                    "committed {} transaction {} as txn {}",
                    self.slot.kind(),
                    self.slot.id,
                    txn_id
                );
                self.committed_txn_id = Some(txn_id);
                Ok(txn_id)
            }
            Err(err) => {
                debug!("commit of transaction {} failed: {}", self.slot.id, err);
                Err(err)
            }
        }
    }

    /// Abort the transaction. Legal while active or reset.
    pub fn abort(&mut self) -> Result<()> {
        {
            let mut state = self.slot.state.lock();
            match state.status {
                TxnState::Active | TxnState::Reset => {}
                TxnState::Committed | TxnState::Aborted => return Err(Error::TxnClosed),
            }
            if let Some(txn) = state.engine.take() {
                txn.abort();
            }
            state.status = TxnState::Aborted;
        }
        self.env.inner.unregister(self.slot.id);
        debug!("aborted {} transaction {}", self.slot.kind(), self.slot.id);
        Ok(())
    }

    /// Release the snapshot of a read-only transaction, keeping the handle
    /// for [`Transaction::renew`].
    pub fn reset(&mut self) -> Result<()> {
        if !self.slot.read_only {
            return Err(Error::TxnNotReadOnly);
        }
        let mut state = self.slot.state.lock();
        match state.status {
            TxnState::Active => {
                state.engine_mut()?.reset()?;
                state.status = TxnState::Reset;
                Ok(())
            }
            TxnState::Reset => Ok(()),
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnClosed),
        }
    }

    /// Acquire a fresh snapshot after [`Transaction::reset`].
    pub fn renew(&mut self) -> Result<()> {
        if !self.slot.read_only {
            return Err(Error::TxnNotReadOnly);
        }
        let mut state = self.slot.state.lock();
        match state.status {
            TxnState::Reset => {
                state.engine_mut()?.renew()?;
                state.status = TxnState::Active;
                Ok(())
            }
            TxnState::Active => Err(Error::BadTxn),
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnClosed),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.slot.abort_stray() {
            warn!(
                "aborting stray {} transaction {}",
                self.slot.kind(),
                self.slot.id
            );
            self.env.inner.unregister(self.slot.id);
        }
    }
}

/// Stored value borrowed from engine memory.
///
/// Valid until the next mutation through the owning transaction or cursor,
/// or until the transaction ends; the borrow checker enforces both.
pub struct ValueView<'txn> {
    tree: Arc<Tree>,
    sort_key: Vec<u8>,
    index: usize,
    _txn: PhantomData<&'txn Transaction>,
}

impl<'txn> ValueView<'txn> {
    pub(crate) fn new(tree: Arc<Tree>, sort_key: Vec<u8>, index: usize) -> Self {
        ValueView {
            tree,
            sort_key,
            index,
            _txn: PhantomData,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.tree
            .node(&self.sort_key)
            .and_then(|node| node.values.get(self.index))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Decode in place; `requested` reinterprets, `None` reads the
    /// discriminant.
    pub fn decode(&self, requested: Option<ValueType>) -> Result<ValueRef<'_>> {
        decode_value_ref(self.as_bytes(), requested)
    }

    /// Copy out into an owned value.
    pub fn to_value(&self) -> Result<Value> {
        decode_value(self.as_bytes(), None)
    }
}

impl Deref for ValueView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for ValueView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueView").field(&self.as_bytes()).finish()
    }
}
