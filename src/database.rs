use std::sync::Weak;

use crate::constants::DbFlags;
use crate::env::{EnvInner, Environment};
use crate::error::Result;
use crate::key::{resolve_key_type, KeyOptions, KeyType};
use crate::transaction::Transaction;
use crate::types::Stat;

/// Options for opening a database
#[derive(Debug, Clone, Default)]
pub struct DbOptions {
    name: Option<String>,
    create: bool,
    keys: KeyOptions,
    flags: DbFlags,
}

impl DbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named database; the unnamed main database when not set
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Create the database if it doesn't exist
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn key_is_string(mut self, on: bool) -> Self {
        self.keys.key_is_string = on;
        self
    }

    pub fn key_is_uint32(mut self, on: bool) -> Self {
        self.keys.key_is_uint32 = on;
        self
    }

    pub fn key_is_uint64(mut self, on: bool) -> Self {
        self.keys.key_is_uint64 = on;
        self
    }

    pub fn key_is_binary(mut self, on: bool) -> Self {
        self.keys.key_is_binary = on;
        self
    }

    /// Keys are compared in reverse byte order
    pub fn reverse_key(self, on: bool) -> Self {
        self.flag(DbFlags::REVERSEKEY, on)
    }

    /// Keys may have multiple sorted values
    pub fn dup_sort(self, on: bool) -> Self {
        self.flag(DbFlags::DUPSORT, on)
    }

    /// All duplicates of a key have the same size
    pub fn dup_fixed(self, on: bool) -> Self {
        self.flag(DbFlags::DUPFIXED, on)
    }

    /// Duplicates are native-endian integers
    pub fn integer_dup(self, on: bool) -> Self {
        self.flag(DbFlags::INTEGERDUP, on)
    }

    /// Duplicates are compared in reverse byte order
    pub fn reverse_dup(self, on: bool) -> Self {
        self.flag(DbFlags::REVERSEDUP, on)
    }

    fn flag(mut self, flag: DbFlags, on: bool) -> Self {
        self.flags.set(flag, on);
        self
    }
}

/// Database handle
///
/// The key type is fixed when the handle is opened; every key passed with
/// this handle is checked against it.
#[derive(Debug, Clone)]
pub struct Database {
    name: Option<String>,
    flags: DbFlags,
    key_type: KeyType,
    env: Weak<EnvInner>,
}

impl Database {
    /// Open a database in the environment
    ///
    /// Integer key types imply `INTEGERKEY`. Reopening with different
    /// ordering flags fails with `Incompatible`.
    pub fn open(txn: &mut Transaction, options: &DbOptions) -> Result<Database> {
        let key_type = resolve_key_type(&options.keys, None)?;

        let mut flags = options.flags;
        if key_type.is_integer() {
            flags |= DbFlags::INTEGERKEY;
        }
        if options.create {
            flags |= DbFlags::CREATE;
        }

        let stored = txn.open_tree(options.name.as_deref(), flags)?;
        Ok(Database {
            name: options.name.clone(),
            flags: stored,
            key_type,
            env: txn.env().downgrade(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn flags(&self) -> DbFlags {
        self.flags
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Retrieve statistics for the database
    pub fn stat(&self, txn: &Transaction) -> Result<Stat> {
        Ok(txn.tree(self)?.stat())
    }

    /// Empty the database, or delete it from the environment when `delete`
    /// is set.
    pub fn drop(&self, txn: &mut Transaction, delete: bool) -> Result<()> {
        txn.drop_tree(self, delete)
    }

    pub(crate) fn belongs_to(&self, env: &Environment) -> bool {
        env.ptr_eq(&self.env)
    }
}
