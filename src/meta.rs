use crate::constants::{MDB_MAGIC, PAGE_SIZE, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};
use crate::error::{Error, Result};

/// Database version
pub(crate) const MDB_VERSION: u32 = VERSION_MAJOR << 24 | VERSION_MINOR << 16 | VERSION_PATCH;

/// Serialized size of [`MetaHeader`]
pub(crate) const META_SIZE: usize = 32;

/// Fixed header at the start of the data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetaHeader {
    /// Magic number identifying the data file
    pub(crate) magic: u32,
    /// Version number
    pub(crate) version: u32,
    /// Page size the file was written with
    pub(crate) page_size: u32,
    /// Size of the map when the file was written
    pub(crate) map_size: u64,
    /// txnid that committed this file
    pub(crate) last_txnid: u64,
    /// Number of named trees following the main tree
    pub(crate) tree_count: u32,
}

impl MetaHeader {
    pub(crate) fn new(map_size: usize, last_txnid: u64, tree_count: usize) -> Self {
        MetaHeader {
            magic: MDB_MAGIC,
            version: MDB_VERSION,
            page_size: PAGE_SIZE as u32,
            map_size: map_size as u64,
            last_txnid,
            tree_count: tree_count as u32,
        }
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.page_size.to_le_bytes());
        out.extend_from_slice(&self.map_size.to_le_bytes());
        out.extend_from_slice(&self.last_txnid.to_le_bytes());
        out.extend_from_slice(&self.tree_count.to_le_bytes());
    }

    /// Parse and validate the header.
    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        if reader.remaining() < META_SIZE {
            return Err(Error::Invalid);
        }
        let magic = reader.u32()?;
        // Validate magic number
        if magic != MDB_MAGIC {
            return Err(Error::Invalid);
        }
        let version = reader.u32()?;
        // Validate version
        if version != MDB_VERSION {
            return Err(Error::VersionMismatch);
        }
        let page_size = reader.u32()?;
        if page_size as usize != PAGE_SIZE {
            return Err(Error::Incompatible);
        }
        Ok(MetaHeader {
            magic,
            version,
            page_size,
            map_size: reader.u64()?,
            last_txnid: reader.u64()?,
            tree_count: reader.u32()?,
        })
    }
}

/// Bounds-checked little-endian reader over file contents.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::Corrupted)?;
        let slice = self.buf.get(self.pos..end).ok_or(Error::Corrupted)?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let raw = self.bytes(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut buf = Vec::new();
        MetaHeader::new(PAGE_SIZE * 4, 7, 2).write_to(&mut buf);
        assert_eq!(buf.len(), META_SIZE);
        let header = MetaHeader::read_from(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(header.last_txnid, 7);
        assert_eq!(header.tree_count, 2);
    }

    #[test]
    fn rejects_foreign_files() {
        let mut buf = Vec::new();
        MetaHeader::new(PAGE_SIZE, 0, 0).write_to(&mut buf);
        buf[0] ^= 0xff;
        assert!(matches!(
            MetaHeader::read_from(&mut ByteReader::new(&buf)),
            Err(Error::Invalid)
        ));

        let mut buf = Vec::new();
        let mut header = MetaHeader::new(PAGE_SIZE, 0, 0);
        header.version += 1;
        header.write_to(&mut buf);
        assert!(matches!(
            MetaHeader::read_from(&mut ByteReader::new(&buf)),
            Err(Error::VersionMismatch)
        ));

        assert!(matches!(
            MetaHeader::read_from(&mut ByteReader::new(&[1, 2, 3])),
            Err(Error::Invalid)
        ));
    }

    #[test]
    fn reader_is_bounds_checked() {
        let mut reader = ByteReader::new(&[1, 0, 0, 0, 9]);
        assert_eq!(reader.u32().unwrap(), 1);
        assert!(matches!(reader.u64(), Err(Error::Corrupted)));
    }
}
