use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

use lmdb_sys as ffi;

use crate::constants::WriteFlags;
use crate::database::Database;
use crate::error::{Error, IntoResult, Result};
use crate::types::CursorOp;
use crate::value::{empty_val, from_val, to_val};

/// Raw cursor handle, closed on drop
#[derive(Debug)]
struct RawCursor {
    cursor: NonNull<ffi::MDB_cursor>,
}

impl RawCursor {
    fn open(txn: *mut ffi::MDB_txn, db: Database) -> Result<Self> {
        let mut cursor: *mut ffi::MDB_cursor = ptr::null_mut();
        unsafe { ffi::mdb_cursor_open(txn, db.dbi(), &mut cursor) }.into_result()?;
        let cursor = NonNull::new(cursor).ok_or(Error::BadTxn)?;
        Ok(RawCursor { cursor })
    }

    /// Position the cursor. `None` when the engine reports no such entry.
    fn get(
        &self,
        op: CursorOp,
        key: Option<&[u8]>,
        val: Option<&[u8]>,
    ) -> Result<Option<(ffi::MDB_val, ffi::MDB_val)>> {
        let mut key_val = key.map_or_else(empty_val, to_val);
        let mut data_val = val.map_or_else(empty_val, to_val);
        let rc = unsafe {
            ffi::mdb_cursor_get(self.cursor.as_ptr(), &mut key_val, &mut data_val, op.raw())
        };
        match rc.into_result() {
            Ok(()) => Ok(Some((key_val, data_val))),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for RawCursor {
    fn drop(&mut self) {
        unsafe { ffi::mdb_cursor_close(self.cursor.as_ptr()) };
    }
}

/// A cursor for walking over a database, or sections of it.
///
/// The returned keys and values are owned by the database and live as long
/// as the transaction the cursor was opened in.
#[derive(Debug)]
pub struct RoCursor<'txn> {
    raw: RawCursor,
    _txn: PhantomData<&'txn ()>,
}

impl<'txn> RoCursor<'txn> {
    pub(crate) fn open(txn: *mut ffi::MDB_txn, db: Database) -> Result<Self> {
        Ok(RoCursor {
            raw: RawCursor::open(txn, db)?,
            _txn: PhantomData,
        })
    }

    /// Position the cursor, and fetch the key and value at its new position.
    ///
    /// Whether `key` and `val` are needed depends on `op`; pass `None` when
    /// they are not. Returns `None` when there is no entry to move to.
    pub fn move_and_get(
        &mut self,
        op: CursorOp,
        key: Option<&[u8]>,
        val: Option<&[u8]>,
    ) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        Ok(self
            .raw
            .get(op, key, val)?
            .map(|(k, v)| unsafe { (from_val(&k), from_val(&v)) }))
    }

    pub fn first(&mut self) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        self.move_and_get(CursorOp::First, None, None)
    }

    pub fn last(&mut self) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        self.move_and_get(CursorOp::Last, None, None)
    }

    pub fn next(&mut self) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        self.move_and_get(CursorOp::Next, None, None)
    }

    pub fn prev(&mut self) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        self.move_and_get(CursorOp::Prev, None, None)
    }

    /// Move to the first key greater than or equal to `key`
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
        self.move_and_get(CursorOp::SetRange, Some(key), None)
    }
}

/// A cursor that can also write.
///
/// Keys and values it returns borrow the cursor, so they are gone by the time
/// the next write (or move) happens.
#[derive(Debug)]
pub struct RwCursor<'txn> {
    raw: RawCursor,
    /// The owning transaction's capacity flag
    map_full: &'txn mut bool,
}

impl<'txn> RwCursor<'txn> {
    pub(crate) fn open(
        txn: *mut ffi::MDB_txn,
        db: Database,
        map_full: &'txn mut bool,
    ) -> Result<Self> {
        Ok(RwCursor {
            raw: RawCursor::open(txn, db)?,
            map_full,
        })
    }

    /// See [`RoCursor::move_and_get`].
    pub fn move_and_get(
        &mut self,
        op: CursorOp,
        key: Option<&[u8]>,
        val: Option<&[u8]>,
    ) -> Result<Option<(&[u8], &[u8])>> {
        Ok(self
            .raw
            .get(op, key, val)?
            .map(|(k, v)| unsafe { (from_val(&k), from_val(&v)) }))
    }

    pub fn first(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.move_and_get(CursorOp::First, None, None)
    }

    pub fn last(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.move_and_get(CursorOp::Last, None, None)
    }

    pub fn next(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.move_and_get(CursorOp::Next, None, None)
    }

    pub fn prev(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.move_and_get(CursorOp::Prev, None, None)
    }

    pub fn seek(&mut self, key: &[u8]) -> Result<Option<(&[u8], &[u8])>> {
        self.move_and_get(CursorOp::SetRange, Some(key), None)
    }

    /// Put a key-value pair and leave the cursor positioned on it.
    ///
    /// Like [`RwTxn::put`](crate::RwTxn::put) this uses `RESERVE`, so it is
    /// illegal on `DUPSORT` databases; use [`put_dup_sort`](Self::put_dup_sort).
    pub fn put(&mut self, key: &[u8], val: &[u8], flags: WriteFlags) -> Result<()> {
        let mut key_val = to_val(key);
        let mut data = ffi::MDB_val {
            mv_size: val.len(),
            mv_data: ptr::null_mut(),
        };
        let flags = flags | WriteFlags::RESERVE;
        let rc = unsafe {
            ffi::mdb_cursor_put(self.raw.cursor.as_ptr(), &mut key_val, &mut data, flags.bits())
        };
        self.track(rc)?;
        if !val.is_empty() {
            unsafe { ptr::copy_nonoverlapping(val.as_ptr(), data.mv_data as *mut u8, val.len()) };
        }
        Ok(())
    }

    /// Put a key-value pair, safe for `DUPSORT` databases.
    pub fn put_dup_sort(&mut self, key: &[u8], val: &[u8], flags: WriteFlags) -> Result<()> {
        let mut key_val = to_val(key);
        let mut data = to_val(val);
        let flags = flags - WriteFlags::RESERVE;
        let rc = unsafe {
            ffi::mdb_cursor_put(self.raw.cursor.as_ptr(), &mut key_val, &mut data, flags.bits())
        };
        self.track(rc)
    }

    /// Delete the entry at the cursor.
    ///
    /// The only meaningful flag is `NODUPDATA`, which on `DUPSORT` databases
    /// deletes every value of the current key.
    pub fn delete(&mut self, flags: WriteFlags) -> Result<()> {
        let rc = unsafe { ffi::mdb_cursor_del(self.raw.cursor.as_ptr(), flags.bits()) };
        self.track(rc)
    }

    fn track(&mut self, rc: c_int) -> Result<()> {
        let result = rc.into_result();
        if matches!(result, Err(Error::MapFull)) {
            *self.map_full = true;
        }
        result
    }
}
