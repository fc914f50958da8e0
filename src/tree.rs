//! One ordered keyspace of the storage backend.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::constants::{DbFlags, WriteFlags, MAX_KEY_SIZE, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::meta::ByteReader;
use crate::types::Stat;

/// Page header bytes
const PAGE_HEADER: usize = 16;
/// Per-node header bytes
const NODE_HEADER: usize = 8;
/// Values above this size move to overflow pages
const OVERFLOW_THRESHOLD: usize = PAGE_SIZE / 2;

/// A key and its value(s). Non-`DUPSORT` trees hold exactly one value.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) key: Vec<u8>,
    pub(crate) values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tree {
    flags: DbFlags,
    /// Nodes keyed by their sort key
    nodes: BTreeMap<Vec<u8>, Node>,
    /// Number of key/value items, duplicates included
    entries: usize,
}

/// Compare two duplicate values under the tree's dup ordering.
fn dup_cmp(flags: DbFlags, a: &[u8], b: &[u8]) -> Ordering {
    if flags.contains(DbFlags::INTEGERDUP) {
        if let (Some(x), Some(y)) = (native_int(a), native_int(b)) {
            return x.cmp(&y);
        }
    }
    if flags.contains(DbFlags::REVERSEDUP) {
        return a.iter().rev().cmp(b.iter().rev());
    }
    a.cmp(b)
}

fn native_int(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        4 => bytes.try_into().ok().map(|b| u32::from_ne_bytes(b) as u64),
        8 => bytes.try_into().ok().map(u64::from_ne_bytes),
        _ => None,
    }
}

impl Tree {
    pub(crate) fn new(flags: DbFlags) -> Self {
        Tree {
            flags: flags & DbFlags::PERSISTENT,
            nodes: BTreeMap::new(),
            entries: 0,
        }
    }

    pub(crate) fn flags(&self) -> DbFlags {
        self.flags
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    pub(crate) fn is_dupsort(&self) -> bool {
        self.flags.contains(DbFlags::DUPSORT)
    }

    /// Map raw key bytes to the byte string the tree is ordered by.
    pub(crate) fn sort_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(Error::BadValSize);
        }
        if self.flags.contains(DbFlags::INTEGERKEY) {
            let n = native_int(key).ok_or(Error::BadValSize)?;
            return Ok(n.to_be_bytes().to_vec());
        }
        if self.flags.contains(DbFlags::REVERSEKEY) {
            return Ok(key.iter().rev().copied().collect());
        }
        Ok(key.to_vec())
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let sort_key = self.sort_key(key)?;
        Ok(self
            .nodes
            .get(&sort_key)
            .and_then(|node| node.values.first())
            .map(Vec::as_slice))
    }

    pub(crate) fn node(&self, sort_key: &[u8]) -> Option<&Node> {
        self.nodes.get(sort_key)
    }

    pub(crate) fn put(&mut self, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let sort_key = self.sort_key(key)?;
        let tree_flags = self.flags;
        let dupsort = self.is_dupsort();
        if dupsort && data.len() > MAX_KEY_SIZE {
            return Err(Error::BadValSize);
        }

        if flags.contains(WriteFlags::APPEND) {
            if let Some((last, _)) = self.nodes.last_key_value() {
                let order = sort_key.cmp(last);
                if order == Ordering::Less || (order == Ordering::Equal && !dupsort) {
                    return Err(Error::KeyExist);
                }
            }
        }

        let node = match self.nodes.get_mut(&sort_key) {
            None => {
                self.nodes.insert(
                    sort_key,
                    Node {
                        key: key.to_vec(),
                        values: vec![data.to_vec()],
                    },
                );
                self.entries += 1;
                return Ok(());
            }
            Some(node) => node,
        };

        if flags.contains(WriteFlags::NOOVERWRITE) {
            return Err(Error::KeyExist);
        }
        if !dupsort {
            node.values = vec![data.to_vec()];
            return Ok(());
        }
        if tree_flags.contains(DbFlags::DUPFIXED)
            && node.values.first().map_or(false, |v| v.len() != data.len())
        {
            return Err(Error::BadValSize);
        }

        match node
            .values
            .binary_search_by(|stored| dup_cmp(tree_flags, stored, data))
        {
            Ok(_) if flags.contains(WriteFlags::NODUPDATA) => Err(Error::KeyExist),
            Ok(_) => Ok(()),
            Err(pos) => {
                if flags.contains(WriteFlags::APPENDDUP) && pos != node.values.len() {
                    return Err(Error::KeyExist);
                }
                node.values.insert(pos, data.to_vec());
                self.entries += 1;
                Ok(())
            }
        }
    }

    /// Delete a key, or a single duplicate when `data` is given on a
    /// `DUPSORT` tree.
    pub(crate) fn del(&mut self, key: &[u8], data: Option<&[u8]>) -> Result<()> {
        let sort_key = self.sort_key(key)?;
        self.del_sorted(&sort_key, data)
    }

    pub(crate) fn del_sorted(&mut self, sort_key: &[u8], data: Option<&[u8]>) -> Result<()> {
        let tree_flags = self.flags;
        let dupsort = self.is_dupsort();
        let node = self.nodes.get_mut(sort_key).ok_or(Error::NotFound)?;

        match data {
            Some(data) if dupsort => {
                let pos = node
                    .values
                    .binary_search_by(|stored| dup_cmp(tree_flags, stored, data))
                    .map_err(|_| Error::NotFound)?;
                node.values.remove(pos);
                self.entries -= 1;
                if node.values.is_empty() {
                    self.nodes.remove(sort_key);
                }
            }
            _ => {
                self.entries -= node.values.len();
                self.nodes.remove(sort_key);
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.entries = 0;
    }

    pub(crate) fn first(&self) -> Option<(&[u8], &Node)> {
        self.nodes.iter().next().map(|(k, n)| (k.as_slice(), n))
    }

    pub(crate) fn last(&self) -> Option<(&[u8], &Node)> {
        self.nodes.iter().next_back().map(|(k, n)| (k.as_slice(), n))
    }

    /// First node whose sort key is strictly greater than `sort_key`.
    pub(crate) fn after(&self, sort_key: &[u8]) -> Option<(&[u8], &Node)> {
        self.nodes
            .range::<[u8], _>((Bound::Excluded(sort_key), Bound::Unbounded))
            .next()
            .map(|(k, n)| (k.as_slice(), n))
    }

    /// Last node whose sort key is strictly less than `sort_key`.
    pub(crate) fn before(&self, sort_key: &[u8]) -> Option<(&[u8], &Node)> {
        self.nodes
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(sort_key)))
            .next_back()
            .map(|(k, n)| (k.as_slice(), n))
    }

    pub(crate) fn at_or_after(&self, sort_key: &[u8]) -> Option<(&[u8], &Node)> {
        self.nodes
            .range::<[u8], _>((Bound::Included(sort_key), Bound::Unbounded))
            .next()
            .map(|(k, n)| (k.as_slice(), n))
    }

    /// Locate `data` among a node's duplicates: `Ok(index)` when present,
    /// `Err(insertion point)` otherwise.
    pub(crate) fn find_dup(&self, node: &Node, data: &[u8]) -> std::result::Result<usize, usize> {
        node.values
            .binary_search_by(|stored| dup_cmp(self.flags, stored, data))
    }

    /// Page geometry derived from serialized node sizes.
    pub(crate) fn stat(&self) -> Stat {
        let usable = PAGE_SIZE - PAGE_HEADER;
        let mut leaf_bytes = 0usize;
        let mut overflow_pages = 0usize;
        let mut key_bytes = 0usize;

        for node in self.nodes.values() {
            key_bytes += node.key.len();
            for value in &node.values {
                if value.len() > OVERFLOW_THRESHOLD {
                    overflow_pages += (value.len() + PAGE_HEADER).div_ceil(PAGE_SIZE);
                    leaf_bytes += NODE_HEADER + node.key.len() + 8;
                } else {
                    leaf_bytes += NODE_HEADER + node.key.len() + value.len();
                }
            }
        }

        let leaf_pages = if self.entries == 0 {
            0
        } else {
            leaf_bytes.div_ceil(usable).max(1)
        };

        let mut depth = u32::from(leaf_pages > 0);
        let mut branch_pages = 0usize;
        if leaf_pages > 1 {
            let avg_key = key_bytes / self.nodes.len().max(1);
            let fanout = (usable / (NODE_HEADER + avg_key + 8)).max(2);
            let mut level = leaf_pages;
            while level > 1 {
                level = level.div_ceil(fanout);
                branch_pages += level;
                depth += 1;
            }
        }

        Stat {
            psize: PAGE_SIZE as u32,
            depth,
            branch_pages,
            leaf_pages,
            overflow_pages,
            entries: self.entries,
        }
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());
        for node in self.nodes.values() {
            out.extend_from_slice(&(node.key.len() as u32).to_le_bytes());
            out.extend_from_slice(&node.key);
            out.extend_from_slice(&(node.values.len() as u32).to_le_bytes());
            for value in &node.values {
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(value);
            }
        }
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Tree> {
        let flags = DbFlags::from_bits(reader.u32()?).ok_or(Error::Corrupted)?;
        let mut tree = Tree::new(flags);
        let count = reader.u64()?;
        for _ in 0..count {
            let key_len = reader.u32()? as usize;
            let key = reader.bytes(key_len)?.to_vec();
            let sort_key = tree.sort_key(&key).map_err(|_| Error::Corrupted)?;
            let value_count = reader.u32()? as usize;
            let mut values = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                let len = reader.u32()? as usize;
                values.push(reader.bytes(len)?.to_vec());
            }
            if values.is_empty() {
                return Err(Error::Corrupted);
            }
            tree.entries += values.len();
            tree.nodes.insert(sort_key, Node { key, values });
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_order_numerically() {
        let mut tree = Tree::new(DbFlags::INTEGERKEY);
        for n in [300u32, 2, 70_000] {
            tree.put(&n.to_ne_bytes(), b"v", WriteFlags::empty()).unwrap();
        }
        let (_, first) = tree.first().unwrap();
        assert_eq!(first.key, 2u32.to_ne_bytes().to_vec());
        let (_, last) = tree.last().unwrap();
        assert_eq!(last.key, 70_000u32.to_ne_bytes().to_vec());
        assert!(matches!(
            tree.put(b"abc", b"v", WriteFlags::empty()),
            Err(Error::BadValSize)
        ));
    }

    #[test]
    fn dupsort_keeps_sorted_unique_values() {
        let mut tree = Tree::new(DbFlags::DUPSORT);
        tree.put(b"id", b"bbbbbbbb", WriteFlags::empty()).unwrap();
        tree.put(b"id", b"aaaa", WriteFlags::empty()).unwrap();
        tree.put(b"id", b"aaaa", WriteFlags::empty()).unwrap();
        assert_eq!(tree.entries(), 2);
        assert_eq!(tree.get(b"id").unwrap(), Some(&b"aaaa"[..]));
        assert!(matches!(
            tree.put(b"id", b"aaaa", WriteFlags::NODUPDATA),
            Err(Error::KeyExist)
        ));

        tree.del(b"id", Some(b"aaaa")).unwrap();
        assert_eq!(tree.get(b"id").unwrap(), Some(&b"bbbbbbbb"[..]));
        assert!(matches!(tree.del(b"id", Some(b"zz")), Err(Error::NotFound)));
    }

    #[test]
    fn dupfixed_rejects_other_sizes() {
        let mut tree = Tree::new(DbFlags::DUPSORT | DbFlags::DUPFIXED);
        tree.put(b"id", &[0; 4], WriteFlags::empty()).unwrap();
        assert!(matches!(
            tree.put(b"id", &[0; 8], WriteFlags::empty()),
            Err(Error::BadValSize)
        ));
    }

    #[test]
    fn reverse_key_orders_by_suffix() {
        let mut tree = Tree::new(DbFlags::REVERSEKEY);
        tree.put(b"ab", b"1", WriteFlags::empty()).unwrap();
        tree.put(b"ba", b"2", WriteFlags::empty()).unwrap();
        assert_eq!(tree.first().unwrap().1.key, b"ba".to_vec());
    }

    #[test]
    fn append_requires_increasing_keys() {
        let mut tree = Tree::new(DbFlags::empty());
        tree.put(b"b", b"1", WriteFlags::APPEND).unwrap();
        assert!(matches!(
            tree.put(b"a", b"1", WriteFlags::APPEND),
            Err(Error::KeyExist)
        ));
        assert!(matches!(
            tree.put(b"b", b"1", WriteFlags::NOOVERWRITE),
            Err(Error::KeyExist)
        ));
    }

    #[test]
    fn serialization_preserves_contents() {
        let mut tree = Tree::new(DbFlags::DUPSORT);
        tree.put(b"k", b"1", WriteFlags::empty()).unwrap();
        tree.put(b"k", b"2", WriteFlags::empty()).unwrap();
        let mut buf = Vec::new();
        tree.write_to(&mut buf);
        let restored = Tree::read_from(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(restored.entries(), 2);
        assert_eq!(restored.flags(), DbFlags::DUPSORT);
    }

    #[test]
    fn stat_counts_pages() {
        let mut tree = Tree::new(DbFlags::empty());
        assert_eq!(tree.stat().leaf_pages, 0);
        for i in 0..2000u32 {
            tree.put(format!("key-{:05}", i).as_bytes(), &[7; 32], WriteFlags::empty())
                .unwrap();
        }
        tree.put(b"big", &vec![1; PAGE_SIZE * 2], WriteFlags::empty())
            .unwrap();
        let stat = tree.stat();
        assert_eq!(stat.entries, 2001);
        assert!(stat.leaf_pages > 1);
        assert!(stat.branch_pages >= 1);
        assert!(stat.depth >= 2);
        assert_eq!(stat.overflow_pages, 3);
    }
}
