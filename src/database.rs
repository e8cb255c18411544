use std::ffi::CString;
use std::ptr;

use lmdb_sys as ffi;

use crate::constants::DbFlags;
use crate::error::{Error, IntoResult, Result};
use crate::transaction::RoTxn;
use crate::types::Stat;

/// Handle to a sub-database within the environment.
///
/// A handle opened inside an update stays valid, once that update commits,
/// until the environment is closed. A handle opened inside a view is only
/// valid within that view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Database {
    /// Database identifier
    dbi: ffi::MDB_dbi,
}

impl Database {
    /// Open a database in the environment.
    ///
    /// `None` opens the unnamed main database. With [`DbFlags::CREATE`] a
    /// named database is created if it does not exist yet, which is only
    /// possible inside an update.
    ///
    /// The engine does not allow two transactions to open a named database
    /// for the first time concurrently. Open each named database once in an
    /// update before views on other threads open it.
    pub fn open(txn: &RoTxn<'_>, name: Option<&str>, flags: DbFlags) -> Result<Self> {
        let name = match name {
            Some(n) => Some(CString::new(n).map_err(|_| Error::InvalidPath)?),
            None => None,
        };
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());

        let mut dbi: ffi::MDB_dbi = 0;
        unsafe { ffi::mdb_dbi_open(txn.raw(), name_ptr, flags.bits(), &mut dbi) }.into_result()?;
        Ok(Database { dbi })
    }

    /// Get database statistics
    pub fn stat(&self, txn: &RoTxn<'_>) -> Result<Stat> {
        let mut raw: ffi::MDB_stat = unsafe { std::mem::zeroed() };
        unsafe { ffi::mdb_stat(txn.raw(), self.dbi, &mut raw) }.into_result()?;
        Ok(Stat::from(raw))
    }

    /// Get database flags
    pub fn flags(&self, txn: &RoTxn<'_>) -> Result<DbFlags> {
        let mut flags: std::os::raw::c_uint = 0;
        unsafe { ffi::mdb_dbi_flags(txn.raw(), self.dbi, &mut flags) }.into_result()?;
        Ok(DbFlags::from_bits_truncate(flags))
    }

    pub(crate) fn dbi(&self) -> ffi::MDB_dbi {
        self.dbi
    }
}
