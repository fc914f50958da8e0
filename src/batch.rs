//! Ordered, optionally conditional writes applied in one transaction.
//!
//! Keys and values are encoded on the caller's thread, so type errors and a
//! busy writer are reported immediately; the writes themselves run on a
//! worker. Every operation yields one [`BatchOutcome`]; any engine error
//! aborts the whole batch.

use log::{debug, trace};

use crate::constants::WriteFlags;
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::key::{encode_key, Key};
use crate::transaction::Transaction;
use crate::value::{encode_value, Value};
use crate::worker::WorkerTask;

/// Result of one batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BatchOutcome {
    /// The put or delete was applied
    Applied = 0,
    /// The condition did not hold; nothing was written
    ConditionNotMet = 1,
    /// The key to delete did not exist
    NotFound = 2,
}

impl BatchOutcome {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Precondition checked against the current state inside the batch.
///
/// By default the condition reads the operation's own key and database.
/// Without [`Condition::exact`], a stored value matches when it starts with
/// the expected encoded value; with it, the two must be identical.
#[derive(Debug, Clone)]
pub struct Condition {
    db: Option<Database>,
    key: Option<Key>,
    expected: Option<Value>,
    exact: bool,
}

impl Condition {
    /// The key must hold `value`
    pub fn equals<V: Into<Value>>(value: V) -> Self {
        Condition {
            db: None,
            key: None,
            expected: Some(value.into()),
            exact: false,
        }
    }

    /// The key must not exist
    pub fn absent() -> Self {
        Condition {
            db: None,
            key: None,
            expected: None,
            exact: false,
        }
    }

    /// Require the stored value to equal the expected one byte for byte
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Check another key, possibly in another database
    pub fn on<K: Into<Key>>(mut self, db: &Database, key: K) -> Self {
        self.db = Some(db.clone());
        self.key = Some(key.into());
        self
    }
}

/// One write of a batch. A missing value means delete.
#[derive(Debug, Clone)]
pub struct BatchOperation {
    db: Database,
    key: Key,
    value: Option<Value>,
    condition: Option<Condition>,
}

impl BatchOperation {
    pub fn put<K: Into<Key>, V: Into<Value>>(db: &Database, key: K, value: V) -> Self {
        BatchOperation {
            db: db.clone(),
            key: key.into(),
            value: Some(value.into()),
            condition: None,
        }
    }

    pub fn delete<K: Into<Key>>(db: &Database, key: K) -> Self {
        BatchOperation {
            db: db.clone(),
            key: key.into(),
            value: None,
            condition: None,
        }
    }

    /// Apply only if `condition` holds when this operation is reached
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    fn prepare(&self, env: &Environment) -> Result<PreparedOp> {
        if !self.db.belongs_to(env) {
            return Err(Error::ForeignDatabase);
        }
        let condition = match &self.condition {
            Some(condition) => {
                let db = condition.db.as_ref().unwrap_or(&self.db);
                if !db.belongs_to(env) {
                    return Err(Error::ForeignDatabase);
                }
                let key = condition.key.as_ref().unwrap_or(&self.key);
                Some(PreparedCondition {
                    db: db.clone(),
                    key: encode_key(key, db.key_type())?,
                    expected: condition.expected.as_ref().map(encode_value),
                    exact: condition.exact,
                })
            }
            None => None,
        };
        Ok(PreparedOp {
            db: self.db.clone(),
            key: encode_key(&self.key, self.db.key_type())?,
            value: self.value.as_ref().map(encode_value),
            condition,
        })
    }
}

/// Options for [`Environment::batch_write`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    progress: bool,
    write_flags: WriteFlags,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the outcomes computed so far after every operation
    pub fn progress(mut self, on: bool) -> Self {
        self.progress = on;
        self
    }

    /// Flags applied to every put
    pub fn write_flags(mut self, flags: WriteFlags) -> Self {
        self.write_flags = flags;
        self
    }
}

struct PreparedCondition {
    db: Database,
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    exact: bool,
}

struct PreparedOp {
    db: Database,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    condition: Option<PreparedCondition>,
}

/// Whether the stored value fails to satisfy the expectation.
fn differs(stored: Option<&[u8]>, expected: Option<&[u8]>, exact: bool) -> bool {
    match (stored, expected) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(stored), Some(expected)) if exact => stored != expected,
        (Some(stored), Some(expected)) => {
            stored.len() < expected.len() || &stored[..expected.len()] != expected
        }
    }
}

fn apply(txn: &mut Transaction, op: &PreparedOp, flags: WriteFlags) -> Result<BatchOutcome> {
    if let Some(condition) = &op.condition {
        let different = {
            let tree = txn.tree(&condition.db)?;
            let stored = tree.get(&condition.key)?;
            differs(stored, condition.expected.as_deref(), condition.exact)
        };
        if different {
            return Ok(BatchOutcome::ConditionNotMet);
        }
    }

    match &op.value {
        Some(value) => {
            txn.put_raw(&op.db, &op.key, value, flags)?;
            Ok(BatchOutcome::Applied)
        }
        None => {
            if txn.del_raw(&op.db, &op.key, None)? {
                Ok(BatchOutcome::Applied)
            } else {
                Ok(BatchOutcome::NotFound)
            }
        }
    }
}

fn run(
    txn: &mut Transaction,
    ops: &[PreparedOp],
    options: BatchOptions,
    report: &mut dyn FnMut(Vec<BatchOutcome>),
) -> Result<Vec<BatchOutcome>> {
    let mut outcomes = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let outcome = apply(txn, op, options.write_flags)?;
        trace!("batch item {} -> {:?}", index, outcome);
        outcomes.push(outcome);
        if options.progress {
            report(outcomes.clone());
        }
    }
    Ok(outcomes)
}

impl Environment {
    /// Apply `operations` in order inside one write transaction on a worker.
    ///
    /// Fails immediately when a key does not match its database's key type or
    /// another write transaction is live. The task completes with one
    /// outcome per operation once the transaction commits, or with the first
    /// engine error, in which case nothing was written.
    pub fn batch_write(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> Result<WorkerTask<Vec<BatchOutcome>, Vec<BatchOutcome>>> {
        let prepared = operations
            .iter()
            .map(|op| op.prepare(self))
            .collect::<Result<Vec<_>>>()?;
        let mut txn = self.begin_txn(false)?;

        WorkerTask::spawn("lumodb-batch", move |report| {
            match run(&mut txn, &prepared, options, report) {
                Ok(outcomes) => {
                    txn.commit()?;
                    debug!("batch of {} operations committed", outcomes.len());
                    Ok(outcomes)
                }
                Err(err) => {
                    // Already aborted if the environment was closed meanwhile.
                    let _ = txn.abort();
                    debug!("batch of {} operations aborted: {}", prepared.len(), err);
                    Err(err)
                }
            }
        })
    }
}
