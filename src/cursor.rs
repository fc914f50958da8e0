use std::sync::Arc;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::key::{decode_key, encode_key, resolve_key_type, Key, KeyOptions, KeyType};
use crate::transaction::{Transaction, ValueView};
use crate::tree::{Node, Tree};
use crate::types::CursorOp;
use crate::value::{decode_value, encode_value, Value};

/// Cursor position: a node and one of its values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    sort_key: Vec<u8>,
    index: usize,
}

impl Position {
    fn first_of(sort_key: &[u8]) -> Self {
        Position {
            sort_key: sort_key.to_vec(),
            index: 0,
        }
    }

    fn last_of(sort_key: &[u8], node: &Node) -> Self {
        Position {
            sort_key: sort_key.to_vec(),
            index: node.values.len().saturating_sub(1),
        }
    }
}

/// Ordered iteration over a database within one transaction.
///
/// Positioning methods return the key at the new position, or `None` when no
/// such position exists. Holding the transaction mutably keeps values read
/// through the cursor valid until the cursor moves or is dropped.
pub struct Cursor<'txn> {
    txn: &'txn mut Transaction,
    db: Database,
    key_type: KeyType,
    position: Option<Position>,
    /// Sort key of the item removed by the last `del`; the cursor already
    /// sits on its successor.
    deleted: Option<Vec<u8>>,
    /// Moved past the last item; forward moves keep reporting the end until
    /// an absolute positioning call.
    at_end: bool,
}

impl<'txn> Cursor<'txn> {
    /// Open a cursor. An explicit key type hint must agree with the
    /// database's key type.
    pub fn open(txn: &'txn mut Transaction, db: &Database, keys: &KeyOptions) -> Result<Self> {
        let key_type = resolve_key_type(keys, Some(db.key_type()))?;
        // Validates the transaction and database up front
        txn.tree(db)?;
        Ok(Cursor {
            txn,
            db: db.clone(),
            key_type,
            position: None,
            deleted: None,
            at_end: false,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn encode(&self, tree: &Tree, key: Key) -> Result<Vec<u8>> {
        tree.sort_key(&encode_key(&key, self.key_type)?)
    }

    fn seek(&mut self, op: CursorOp, key: Option<Key>, data: Option<&Value>) -> Result<Option<Key>> {
        let tree = self.txn.tree(&self.db)?;
        let dup_op = matches!(
            op,
            CursorOp::FirstDup | CursorOp::LastDup | CursorOp::NextDup | CursorOp::PrevDup
        );
        if dup_op && !tree.is_dupsort() {
            return Err(Error::Incompatible);
        }

        let sort_key = match key {
            Some(key) => Some(self.encode(&tree, key)?),
            None => None,
        };
        let data = data.map(encode_value);
        let deleted = self.deleted.take();
        let at_end = std::mem::take(&mut self.at_end);
        let current = self.position.clone();

        let found = match op {
            CursorOp::First => tree.first().map(|(sk, _)| Position::first_of(sk)),
            CursorOp::Last => tree.last().map(|(sk, node)| Position::last_of(sk, node)),
            CursorOp::Next => match (&current, &deleted) {
                (_, Some(_)) => current.clone(),
                (None, None) if at_end => None,
                (None, None) => tree.first().map(|(sk, _)| Position::first_of(sk)),
                (Some(pos), None) => step_forward(&tree, pos),
            },
            CursorOp::Prev => match &current {
                None => tree.last().map(|(sk, node)| Position::last_of(sk, node)),
                Some(pos) => step_back(&tree, pos),
            },
            CursorOp::NextNoDup => match (&current, &deleted) {
                (Some(pos), Some(gone)) if pos.sort_key != *gone => current.clone(),
                (None, Some(_)) => None,
                (None, None) if at_end => None,
                (None, None) => tree.first().map(|(sk, _)| Position::first_of(sk)),
                (Some(pos), _) => tree.after(&pos.sort_key).map(|(sk, _)| Position::first_of(sk)),
            },
            CursorOp::PrevNoDup => match &current {
                None => tree.last().map(|(sk, node)| Position::last_of(sk, node)),
                Some(pos) => tree
                    .before(&pos.sort_key)
                    .map(|(sk, node)| Position::last_of(sk, node)),
            },
            CursorOp::FirstDup | CursorOp::LastDup | CursorOp::NextDup | CursorOp::PrevDup => {
                let pos = current.as_ref().ok_or(Error::CursorUnpositioned)?;
                let node = tree.node(&pos.sort_key).ok_or(Error::CursorUnpositioned)?;
                let index = match op {
                    CursorOp::FirstDup => Some(0),
                    CursorOp::LastDup => Some(node.values.len() - 1),
                    CursorOp::NextDup => match &deleted {
                        Some(gone) if *gone == pos.sort_key => Some(pos.index),
                        Some(_) => None,
                        None => Some(pos.index + 1),
                    },
                    _ => pos.index.checked_sub(1),
                };
                index
                    .filter(|i| *i < node.values.len())
                    .map(|index| Position {
                        sort_key: pos.sort_key.clone(),
                        index,
                    })
            }
            CursorOp::Set => sort_key
                .as_deref()
                .and_then(|sk| tree.node(sk).map(|_| Position::first_of(sk))),
            CursorOp::SetRange => sort_key
                .as_deref()
                .and_then(|sk| tree.at_or_after(sk))
                .map(|(sk, _)| Position::first_of(sk)),
            CursorOp::GetBoth | CursorOp::GetBothRange => {
                match (sort_key.as_deref(), data.as_deref()) {
                    (Some(sk), Some(data)) => tree.node(sk).and_then(|node| {
                        let index = match tree.find_dup(node, data) {
                            Ok(index) => Some(index),
                            Err(index) if op == CursorOp::GetBothRange => Some(index),
                            Err(_) => None,
                        };
                        index.filter(|i| *i < node.values.len()).map(|index| Position {
                            sort_key: sk.to_vec(),
                            index,
                        })
                    }),
                    _ => None,
                }
            }
        };

        match found {
            Some(pos) => {
                let key = self.decode_at(&tree, &pos)?;
                self.position = Some(pos);
                Ok(Some(key))
            }
            None => {
                if at_end && matches!(op, CursorOp::Next | CursorOp::NextNoDup) {
                    self.at_end = true;
                }
                // A failed lookup leaves the cursor unpositioned; a failed
                // move stays where it was.
                if matches!(
                    op,
                    CursorOp::Set | CursorOp::SetRange | CursorOp::GetBoth | CursorOp::GetBothRange
                ) {
                    self.position = None;
                }
                Ok(None)
            }
        }
    }

    fn decode_at(&self, tree: &Tree, pos: &Position) -> Result<Key> {
        let node = tree.node(&pos.sort_key).ok_or(Error::CursorUnpositioned)?;
        decode_key(&node.key, self.key_type)
    }

    pub fn first(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::First, None, None)
    }

    pub fn last(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::Last, None, None)
    }

    /// Next item, including further duplicates of the current key
    pub fn next(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::Next, None, None)
    }

    pub fn prev(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::Prev, None, None)
    }

    /// First item of the next key, skipping duplicates
    pub fn next_key(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::NextNoDup, None, None)
    }

    /// Last item of the previous key, skipping duplicates
    pub fn prev_key(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::PrevNoDup, None, None)
    }

    /// Position at exactly `key`
    pub fn go_to_key<K: Into<Key>>(&mut self, key: K) -> Result<Option<Key>> {
        self.seek(CursorOp::Set, Some(key.into()), None)
    }

    /// Position at the first key greater than or equal to `key`
    pub fn go_to_range<K: Into<Key>>(&mut self, key: K) -> Result<Option<Key>> {
        self.seek(CursorOp::SetRange, Some(key.into()), None)
    }

    pub fn first_dup(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::FirstDup, None, None)
    }

    pub fn last_dup(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::LastDup, None, None)
    }

    pub fn next_dup(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::NextDup, None, None)
    }

    pub fn prev_dup(&mut self) -> Result<Option<Key>> {
        self.seek(CursorOp::PrevDup, None, None)
    }

    /// Position at exactly `key` holding `value`. Without `DUPSORT` this
    /// matches the key's single value.
    pub fn go_to_dup<K: Into<Key>>(&mut self, key: K, value: &Value) -> Result<Option<Key>> {
        self.seek(CursorOp::GetBoth, Some(key.into()), Some(value))
    }

    /// Position at `key` and its first value greater than or equal to `value`
    pub fn go_to_dup_range<K: Into<Key>>(&mut self, key: K, value: &Value) -> Result<Option<Key>> {
        self.seek(CursorOp::GetBothRange, Some(key.into()), Some(value))
    }

    fn current_tree(&self) -> Result<(Arc<Tree>, &Position)> {
        let pos = self.position.as_ref().ok_or(Error::CursorUnpositioned)?;
        Ok((self.txn.tree(&self.db)?, pos))
    }

    pub fn current_key(&self) -> Result<Key> {
        let (tree, pos) = self.current_tree()?;
        self.decode_at(&tree, pos)
    }

    /// Copy of the value at the cursor, decoded by its stored type.
    pub fn current_value(&self) -> Result<Value> {
        self.current_view()?.to_value()
    }

    /// Zero-copy view of the value at the cursor, valid until the cursor
    /// moves.
    pub fn current_view(&self) -> Result<ValueView<'_>> {
        let (tree, pos) = self.current_tree()?;
        let exists = tree
            .node(&pos.sort_key)
            .map_or(false, |node| pos.index < node.values.len());
        if !exists {
            return Err(Error::CursorUnpositioned);
        }
        Ok(ValueView::new(tree, pos.sort_key.clone(), pos.index))
    }

    pub fn current(&self) -> Result<(Key, Value)> {
        let (tree, pos) = self.current_tree()?;
        let key = self.decode_at(&tree, pos)?;
        let value = tree
            .node(&pos.sort_key)
            .and_then(|node| node.values.get(pos.index))
            .ok_or(Error::CursorUnpositioned)?;
        Ok((key, decode_value(value, None)?))
    }

    /// Delete the item at the cursor. On `DUPSORT` databases only the
    /// current duplicate goes. The cursor moves to the following item.
    pub fn del(&mut self) -> Result<()> {
        let pos = self.position.clone().ok_or(Error::CursorUnpositioned)?;
        let dup = {
            let tree = self.txn.tree(&self.db)?;
            let node = tree.node(&pos.sort_key).ok_or(Error::NotFound)?;
            if tree.is_dupsort() {
                Some(node.values.get(pos.index).ok_or(Error::NotFound)?.clone())
            } else {
                None
            }
        };
        self.txn.del_sorted(&self.db, &pos.sort_key, dup.as_deref())?;

        let tree = self.txn.tree(&self.db)?;
        self.position = match tree.node(&pos.sort_key) {
            Some(node) if pos.index < node.values.len() => Some(pos.clone()),
            _ => tree
                .after(&pos.sort_key)
                .map(|(sk, _)| Position::first_of(sk)),
        };
        self.at_end = self.position.is_none();
        self.deleted = Some(pos.sort_key);
        Ok(())
    }

    pub fn close(self) {}
}

/// Following item in key then duplicate order.
fn step_forward(tree: &Tree, pos: &Position) -> Option<Position> {
    if let Some(node) = tree.node(&pos.sort_key) {
        if pos.index + 1 < node.values.len() {
            return Some(Position {
                sort_key: pos.sort_key.clone(),
                index: pos.index + 1,
            });
        }
    }
    tree.after(&pos.sort_key)
        .map(|(sk, _)| Position::first_of(sk))
}

/// Preceding item in key then duplicate order.
fn step_back(tree: &Tree, pos: &Position) -> Option<Position> {
    if let Some(node) = tree.node(&pos.sort_key) {
        if pos.index > 0 {
            return Some(Position {
                sort_key: pos.sort_key.clone(),
                index: (pos.index - 1).min(node.values.len() - 1),
            });
        }
    }
    tree.before(&pos.sort_key)
        .map(|(sk, node)| Position::last_of(sk, node))
}
