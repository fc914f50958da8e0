//! Transaction coordination, conditional batch writes and a typed key/value
//! codec over an LMDB-style embedded store.
//!
//! An [`Environment`] hands out at most one write [`Transaction`] at a time
//! and aborts whatever is still attached when it closes. Values are stored
//! with a one-byte type discriminant so a generic [`Transaction::get`]
//! recovers what was put.

mod batch;
mod constants;
mod cursor;
mod database;
mod engine;
mod env;
mod error;
mod key;
mod meta;
mod transaction;
mod tree;
mod types;
mod value;
mod worker;

pub use batch::{BatchOperation, BatchOptions, BatchOutcome, Condition};
pub use constants::{
    DbFlags, EnvFlags, WriteFlags, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS,
    MAX_KEY_SIZE, PAGE_SIZE,
};
pub use cursor::Cursor;
pub use database::{Database, DbOptions};
pub use env::{EnvConfig, Environment};
pub use error::{Error, Result};
pub use key::{decode_key, encode_key, infer_key_type, resolve_key_type, Key, KeyOptions, KeyType};
pub use transaction::{Transaction, TxnState, ValueView};
pub use types::{EnvInfo, Stat};
pub use value::{decode_value, decode_value_ref, encode_value, Utf16Str, Value, ValueRef, ValueType};
pub use worker::{TaskEvent, WorkerTask};
