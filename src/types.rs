/// Cursor positioning operations, mirroring `MDB_cursor_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    First,
    FirstDup,
    GetBoth,
    GetBothRange,
    Last,
    LastDup,
    Next,
    NextDup,
    NextNoDup,
    Prev,
    PrevDup,
    PrevNoDup,
    Set,
    SetRange,
}

/// Database statistics matching MDB_stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Size of a database page
    pub psize: u32,
    /// Depth (height) of the B-tree
    pub depth: u32,
    /// Number of internal (non-leaf) pages
    pub branch_pages: usize,
    /// Number of leaf pages
    pub leaf_pages: usize,
    /// Number of overflow pages
    pub overflow_pages: usize,
    /// Number of data entries
    pub entries: usize,
}

/// Environment information matching MDB_envinfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    /// Address of the current memory map of the data file
    pub map_addr: usize,
    /// Size of the data memory map
    pub map_size: usize,
    /// ID of the last used page
    pub last_pgno: usize,
    /// ID of the last committed transaction
    pub last_txnid: u64,
    /// Max reader slots in the environment
    pub max_readers: u32,
    /// Max reader slots used in the environment
    pub num_readers: u32,
}
