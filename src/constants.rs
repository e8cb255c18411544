use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u32 {
        const FIXEDMAP = 0x01;
        const NOSUBDIR = 0x4000;
        const NOSYNC = 0x10000;
        const RDONLY = 0x20000;
        const NOMETASYNC = 0x40000;
        const WRITEMAP = 0x80000;
        const MAPASYNC = 0x100000;
        /// Always added when opening: read handles move between threads.
        const NOTLS = 0x200000;
        const NOLOCK = 0x400000;
        const NORDAHEAD = 0x800000;
        const NOMEMINIT = 0x1000000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WriteFlags: u32 {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        const CURRENT = 0x40;
        const RESERVE = 0x10000;
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
    }
}

// Copy operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyFlags: u32 {
        const COMPACT = 0x01;
    }
}

/// Transaction begin flag for read-only transactions
pub(crate) const TXN_RDONLY: u32 = EnvFlags::RDONLY.bits();

/// Default number of reader slots in the engine's lock table
pub const DEFAULT_MAX_READERS: u32 = 126;
/// Default number of named sub-databases
pub const DEFAULT_MAX_DBS: u32 = 16;
/// Default maximum number of updates committed in one transaction
pub const DEFAULT_BATCH_SIZE: usize = 16;
/// Default permissions for newly created database files
pub const DEFAULT_MODE: u32 = 0o644;
