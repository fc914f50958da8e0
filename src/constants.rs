use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvFlags: u32 {
        const NOSUBDIR = 0x4000;
        const NOSYNC = 0x10000;
        const RDONLY = 0x20000;
        const NOMETASYNC = 0x40000;
        const WRITEMAP = 0x80000;
        const MAPASYNC = 0x100000;
        const NOTLS = 0x200000;
        const NOMEMINIT = 0x1000000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbFlags: u32 {
        const REVERSEKEY = 0x02;
        const DUPSORT = 0x04;
        const INTEGERKEY = 0x08;
        const DUPFIXED = 0x10;
        const INTEGERDUP = 0x20;
        const REVERSEDUP = 0x40;
        const CREATE = 0x40000;
    }
}

impl DbFlags {
    /// Flags that are stored with the database and must match on reopen.
    pub const PERSISTENT: DbFlags = DbFlags::REVERSEKEY
        .union(DbFlags::DUPSORT)
        .union(DbFlags::INTEGERKEY)
        .union(DbFlags::DUPFIXED)
        .union(DbFlags::INTEGERDUP)
        .union(DbFlags::REVERSEDUP);
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
    }
}

// Page and version constants
pub const PAGE_SIZE: usize = 4096;
/// Magic number for data files
pub const MDB_MAGIC: u32 = 0xBEEF_C0DE;
/// Version numbers major
pub const VERSION_MAJOR: u32 = 0;
/// Version numbers minor
pub const VERSION_MINOR: u32 = 9;
/// Version numbers patch
pub const VERSION_PATCH: u32 = 70;
/// Largest key (and sorted-duplicate value) the backend accepts
pub const MAX_KEY_SIZE: usize = 511;

pub const DEFAULT_MAX_DBS: u32 = 10;
// mdb.c's DEFAULT_READERS
pub const DEFAULT_MAX_READERS: u32 = 126;
pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024;

/// Name of the data file inside an environment directory
pub const DATA_FILE_NAME: &str = "data.mdb";
/// Name of the lock file inside an environment directory
pub const LOCK_FILE_NAME: &str = "lock.mdb";
/// Suffix appended to the data file path for the lock file under `NOSUBDIR`
pub const LOCK_FILE_SUFFIX: &str = "-lock";
