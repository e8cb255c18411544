use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use lmdb_sys as ffi;

use crate::constants::{DbFlags, WriteFlags};
use crate::cursor::{RoCursor, RwCursor};
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, IntoResult, Result};
use crate::types::Stat;
use crate::value::{empty_val, from_val, to_val};

/// A read-only view of an engine transaction.
///
/// Handed to the function passed to [`Client::view`](crate::Client::view),
/// and reachable from a [`RwTxn`] through `Deref`. It never commits or aborts
/// anything itself: whoever began the transaction ends it.
#[derive(Debug)]
pub struct RoTxn<'env> {
    txn: NonNull<ffi::MDB_txn>,
    _env: PhantomData<&'env Environment>,
}

impl<'env> RoTxn<'env> {
    pub(crate) fn new(txn: NonNull<ffi::MDB_txn>) -> Self {
        RoTxn {
            txn,
            _env: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> *mut ffi::MDB_txn {
        self.txn.as_ptr()
    }

    /// Get a handle to a database. See [`Database::open`].
    pub fn open_db(&self, name: Option<&str>, flags: DbFlags) -> Result<Database> {
        Database::open(self, name, flags)
    }

    /// Look up `key`.
    ///
    /// The returned bytes are owned by the database. They are valid only
    /// until a subsequent update operation, or the end of the transaction;
    /// the borrow on the transaction enforces both. Take a copy to keep them.
    pub fn get(&self, db: Database, key: &[u8]) -> Result<Option<&[u8]>> {
        let mut key_val = to_val(key);
        let mut data = empty_val();
        let rc = unsafe { ffi::mdb_get(self.raw(), db.dbi(), &mut key_val, &mut data) };
        match rc.into_result() {
            Ok(()) => Ok(Some(unsafe { from_val(&data) })),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Open a read-only cursor. It is closed when dropped, which is always
    /// before the transaction ends.
    pub fn cursor(&self, db: Database) -> Result<RoCursor<'_>> {
        RoCursor::open(self.raw(), db)
    }

    /// Statistics for `db` as seen by this transaction
    pub fn db_stat(&self, db: Database) -> Result<Stat> {
        db.stat(self)
    }
}

/// A read-write transaction, only ever reachable from inside an update.
///
/// Functions given to [`Client::update`](crate::Client::update) receive
/// `&mut RwTxn` and may run more than once, so they must not have external
/// side effects before the commit.
#[derive(Debug)]
pub struct RwTxn<'env> {
    txn: RoTxn<'env>,
    /// Some operation in this transaction hit the map-size ceiling
    map_full: bool,
    /// Committed or aborted
    finished: bool,
}

impl<'env> RwTxn<'env> {
    pub(crate) fn begin(env: &'env Environment) -> Result<Self> {
        let txn = env.begin_rw_txn()?;
        Ok(RwTxn {
            txn: RoTxn::new(txn),
            map_full: false,
            finished: false,
        })
    }

    /// Write `val` under `key`.
    ///
    /// Internally this uses `RESERVE`, which saves a copy of the value but is
    /// invalid for databases opened with `DUPSORT`: use
    /// [`put_dup_sort`](Self::put_dup_sort) for those.
    pub fn put(&mut self, db: Database, key: &[u8], val: &[u8], flags: WriteFlags) -> Result<()> {
        let mut key_val = to_val(key);
        let mut data = ffi::MDB_val {
            mv_size: val.len(),
            mv_data: ptr::null_mut(),
        };
        let flags = flags | WriteFlags::RESERVE;
        let rc = unsafe {
            ffi::mdb_put(self.raw(), db.dbi(), &mut key_val, &mut data, flags.bits())
        };
        self.track(rc)?;
        if !val.is_empty() {
            unsafe { ptr::copy_nonoverlapping(val.as_ptr(), data.mv_data as *mut u8, val.len()) };
        }
        Ok(())
    }

    /// Write `val` under `key`, safe for `DUPSORT` databases.
    ///
    /// Slower than [`put`](Self::put) by one copy of the value. Any
    /// `RESERVE` flag passed in is cleared.
    pub fn put_dup_sort(
        &mut self,
        db: Database,
        key: &[u8],
        val: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        let mut key_val = to_val(key);
        let mut data = to_val(val);
        let flags = flags - WriteFlags::RESERVE;
        let rc = unsafe {
            ffi::mdb_put(self.raw(), db.dbi(), &mut key_val, &mut data, flags.bits())
        };
        self.track(rc)
    }

    /// Delete `key`. `val` is only needed for `DUPSORT` databases, to pick
    /// one of several values; otherwise pass `None`.
    pub fn delete(&mut self, db: Database, key: &[u8], val: Option<&[u8]>) -> Result<()> {
        let mut key_val = to_val(key);
        let mut data = val.map(to_val);
        let data_ptr = data.as_mut().map_or(ptr::null_mut(), |d| d as *mut ffi::MDB_val);
        let rc = unsafe { ffi::mdb_del(self.raw(), db.dbi(), &mut key_val, data_ptr) };
        self.track(rc)
    }

    /// Open a read-write cursor. Holding it borrows the transaction mutably.
    pub fn cursor_mut(&mut self, db: Database) -> Result<RwCursor<'_>> {
        let raw = self.raw();
        RwCursor::open(raw, db, &mut self.map_full)
    }

    /// Whether any operation in this transaction reported `MapFull`
    pub(crate) fn is_map_full(&self) -> bool {
        self.map_full
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        self.finished = true;
        unsafe { ffi::mdb_txn_commit(self.raw()) }.into_result()
    }

    pub(crate) fn abort(mut self) {
        self.finished = true;
        unsafe { ffi::mdb_txn_abort(self.raw()) };
    }

    fn track(&mut self, rc: std::os::raw::c_int) -> Result<()> {
        let result = rc.into_result();
        if matches!(result, Err(Error::MapFull)) {
            self.map_full = true;
        }
        result
    }
}

impl<'env> Deref for RwTxn<'env> {
    type Target = RoTxn<'env>;

    fn deref(&self) -> &RoTxn<'env> {
        &self.txn
    }
}

impl Drop for RwTxn<'_> {
    fn drop(&mut self) {
        // Reached with an open transaction only when a transaction function
        // panicked; the engine's single write slot must be released.
        if !self.finished {
            unsafe { ffi::mdb_txn_abort(self.raw()) };
        }
    }
}
