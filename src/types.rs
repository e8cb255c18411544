use std::os::raw::c_uint;

/// Cursor positioning operations, numbered as the engine expects them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CursorOp {
    /// Move to the start of the database. Return the key and value.
    First = 0,
    /// DupSort only: move to the first value of the current key.
    FirstDup = 1,
    /// DupSort only: move to the given key and value.
    GetBoth = 2,
    /// DupSort only: move to the first value >= the given one for the given key.
    GetBothRange = 3,
    /// No movement. Return the current key and value.
    GetCurrent = 4,
    /// Move to the end of the database. Return the key and value.
    Last = 6,
    /// DupSort only: move to the last value of the current key.
    LastDup = 7,
    /// Move to the next key-value pair.
    Next = 8,
    /// DupSort only: move to the next value of the current key.
    NextDup = 9,
    /// DupSort only: move to the first value of the next key.
    NextNoDup = 11,
    /// Move to the previous key-value pair.
    Prev = 12,
    /// DupSort only: move to the previous value of the current key.
    PrevDup = 13,
    /// DupSort only: move to the last value of the previous key.
    PrevNoDup = 14,
    /// Move to the given key. Only the value is returned.
    Set = 15,
    /// Move to the given key. Return the key and value.
    SetKey = 16,
    /// Move to the first key >= the given key. Return the key and value.
    SetRange = 17,
}

impl CursorOp {
    pub(crate) fn raw(self) -> c_uint {
        self as c_uint
    }
}

/// Statistics for a database or the whole environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub psize: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

/// Environment information as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    pub mapsize: usize,
    pub last_pgno: usize,
    pub last_txnid: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}
