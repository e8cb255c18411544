use std::ffi::CString;
use std::os::raw::{c_int, c_uint};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use lmdb_sys as ffi;
use log::{debug, info};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Options;
use crate::constants::{CopyFlags, EnvFlags, TXN_RDONLY};
use crate::error::{Error, IntoResult, Result};
use crate::types::{EnvInfo, Stat};

/// Shared/exclusive gate around map-size changes.
///
/// Readers and the write coordinator hold it shared while a transaction is
/// open. The coordinator holds it exclusively only while the map size changes,
/// and the environment holds it exclusively while closing.
#[derive(Debug, Default)]
pub(crate) struct ResizeLock {
    lock: RwLock<()>,
}

/// Proof that the holder keeps every transaction out of the environment
pub(crate) struct ExclusiveGuard<'a> {
    owner: &'a ResizeLock,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ResizeLock {
    pub(crate) fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub(crate) fn exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard {
            owner: self,
            _guard: self.lock.write(),
        }
    }
}

/// Owner of the engine environment handle.
///
/// The handle itself is thread-safe; everything mutable here is either atomic
/// or only changed under the exclusive [`ResizeLock`].
#[derive(Debug)]
pub struct Environment {
    /// Engine handle, valid until `closed` is set
    env: NonNull<ffi::MDB_env>,
    /// Opened with RDONLY
    read_only: bool,
    /// Current map size, always a multiple of `page_size`
    map_size: AtomicUsize,
    /// Engine page size
    page_size: usize,
    /// Size of the reader lock table
    max_readers: u32,
    /// Bumped on every successful map resize
    generation: AtomicU64,
    /// Set once the engine handle has been closed
    closed: AtomicBool,
    /// Gate for map-size changes
    resize_lock: ResizeLock,
}

// The engine serialises access to the environment internally, and NOTLS lets
// read handles move between threads.
unsafe impl Send for Environment {}
unsafe impl Sync for Environment {}

impl Environment {
    /// Open the environment at `path`.
    ///
    /// `NOTLS` is always added to the flags. The map size reported by the
    /// engine is rounded up to a whole number of pages.
    pub(crate) fn open(path: &Path, options: &Options) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        let mut env: *mut ffi::MDB_env = ptr::null_mut();
        unsafe { ffi::mdb_env_create(&mut env) }.into_result()?;
        let env = NonNull::new(env).ok_or(Error::Invalid)?;

        // The engine handle must be closed if anything after create fails
        let (map_size, page_size) = match unsafe { configure(env, &c_path, options) } {
            Ok(sizes) => sizes,
            Err(err) => {
                unsafe { ffi::mdb_env_close(env.as_ptr()) };
                return Err(err);
            }
        };

        info!(
            "opened environment at {} (map size {} bytes, page size {} bytes)",
            path.display(),
            map_size,
            page_size
        );

        Ok(Environment {
            env,
            read_only: options.is_read_only(),
            map_size: AtomicUsize::new(map_size),
            page_size,
            max_readers: options.max_readers,
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            resize_lock: ResizeLock::default(),
        })
    }

    /// Close the engine handle.
    ///
    /// Waits for every transaction holding the resize lock to finish. Calling
    /// this more than once is a no-op.
    pub(crate) fn close(&self) {
        let _exclusive = self.resize_lock.exclusive();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        unsafe { ffi::mdb_env_close(self.env.as_ptr()) };
        debug!("environment closed");
    }

    pub(crate) fn resize_lock(&self) -> &ResizeLock {
        &self.resize_lock
    }

    pub(crate) fn begin_ro_txn(&self) -> Result<NonNull<ffi::MDB_txn>> {
        self.begin_txn(TXN_RDONLY)
    }

    pub(crate) fn begin_rw_txn(&self) -> Result<NonNull<ffi::MDB_txn>> {
        self.begin_txn(0)
    }

    // Nested transactions are not supported, so there is never a parent.
    fn begin_txn(&self, flags: c_uint) -> Result<NonNull<ffi::MDB_txn>> {
        self.check_open()?;
        let mut txn: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe { ffi::mdb_txn_begin(self.env.as_ptr(), ptr::null_mut(), flags, &mut txn) }
            .into_result()?;
        NonNull::new(txn).ok_or(Error::BadTxn)
    }

    /// Reuse a reset read-only handle, taking a fresh snapshot
    pub(crate) fn renew(&self, txn: NonNull<ffi::MDB_txn>) -> Result<()> {
        self.check_open()?;
        unsafe { ffi::mdb_txn_renew(txn.as_ptr()) }.into_result()
    }

    /// Release a read-only handle's snapshot but keep the handle
    pub(crate) fn reset(&self, txn: NonNull<ffi::MDB_txn>) {
        unsafe { ffi::mdb_txn_reset(txn.as_ptr()) };
    }

    /// Set the size of the memory map.
    ///
    /// Only valid while no transactions are running, which the exclusive
    /// guard proves. Existing read handles must not be renewed afterwards;
    /// [`generation`](Self::generation) tells them apart.
    pub(crate) fn set_map_size(&self, guard: &ExclusiveGuard<'_>, size: usize) -> Result<()> {
        debug_assert!(ptr::eq(guard.owner, &self.resize_lock));
        self.check_open()?;
        if size == 0 || size % self.page_size != 0 {
            return Err(Error::Invalid);
        }
        unsafe { ffi::mdb_env_set_mapsize(self.env.as_ptr(), size) }.into_result()?;
        self.map_size.store(size, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Current map size in bytes
    pub fn map_size(&self) -> usize {
        self.map_size.load(Ordering::SeqCst)
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size of the engine's reader lock table
    pub fn max_readers(&self) -> u32 {
        self.max_readers
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of map resizes since the environment was opened
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Flush the data buffers to disk.
    ///
    /// Only needed when the environment was opened with `NOSYNC`,
    /// `NOMETASYNC` or `MAPASYNC`. With `force` the flush is synchronous.
    pub(crate) fn sync(&self, force: bool) -> Result<()> {
        self.check_open()?;
        unsafe { ffi::mdb_env_sync(self.env.as_ptr(), force as c_int) }.into_result()
    }

    /// Copy the environment to `path`, optionally compacting it.
    ///
    /// The engine runs this as a read transaction over the whole database.
    pub(crate) fn copy(&self, path: &Path, flags: CopyFlags) -> Result<()> {
        self.check_open()?;
        let c_path = path_to_cstring(path)?;
        unsafe { ffi::mdb_env_copy2(self.env.as_ptr(), c_path.as_ptr(), flags.bits()) }
            .into_result()
    }

    /// Get environment information
    pub(crate) fn info(&self) -> Result<EnvInfo> {
        self.check_open()?;
        let mut raw: ffi::MDB_envinfo = unsafe { std::mem::zeroed() };
        unsafe { ffi::mdb_env_info(self.env.as_ptr(), &mut raw) }.into_result()?;
        Ok(EnvInfo {
            mapsize: raw.me_mapsize,
            last_pgno: raw.me_last_pgno,
            last_txnid: raw.me_last_txnid,
            max_readers: raw.me_maxreaders,
            num_readers: raw.me_numreaders,
        })
    }

    /// Get statistics for the main database
    pub(crate) fn stat(&self) -> Result<Stat> {
        self.check_open()?;
        let mut raw: ffi::MDB_stat = unsafe { std::mem::zeroed() };
        unsafe { ffi::mdb_env_stat(self.env.as_ptr(), &mut raw) }.into_result()?;
        Ok(Stat::from(raw))
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::EnvClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}

impl From<ffi::MDB_stat> for Stat {
    fn from(raw: ffi::MDB_stat) -> Self {
        Stat {
            psize: raw.ms_psize,
            depth: raw.ms_depth,
            branch_pages: raw.ms_branch_pages,
            leaf_pages: raw.ms_leaf_pages,
            overflow_pages: raw.ms_overflow_pages,
            entries: raw.ms_entries,
        }
    }
}

/// Apply the options to a freshly created handle and open it.
///
/// Returns the page-aligned map size and the page size.
unsafe fn configure(
    env: NonNull<ffi::MDB_env>,
    path: &CString,
    options: &Options,
) -> Result<(usize, usize)> {
    let env = env.as_ptr();
    ffi::mdb_env_set_maxreaders(env, options.max_readers).into_result()?;
    ffi::mdb_env_set_maxdbs(env, options.max_dbs).into_result()?;
    if let Some(size) = options.map_size {
        ffi::mdb_env_set_mapsize(env, size).into_result()?;
    }

    let flags = options.flags | EnvFlags::NOTLS;
    ffi::mdb_env_open(env, path.as_ptr(), flags.bits(), options.mode as ffi::mode_t)
        .into_result()?;

    let mut stat: ffi::MDB_stat = std::mem::zeroed();
    ffi::mdb_env_stat(env, &mut stat).into_result()?;
    let page_size = stat.ms_psize as usize;

    let mut info: ffi::MDB_envinfo = std::mem::zeroed();
    ffi::mdb_env_info(env, &mut info).into_result()?;

    let map_size =
        round_up(info.me_mapsize, page_size).ok_or(Error::MapSizeOverflow(info.me_mapsize))?;
    if map_size != info.me_mapsize {
        ffi::mdb_env_set_mapsize(env, map_size).into_result()?;
    }
    Ok((map_size, page_size))
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::InvalidPath)
}

fn round_up(size: usize, page_size: usize) -> Option<usize> {
    match size % page_size {
        0 => Some(size),
        remainder => size.checked_add(page_size - remainder),
    }
}

/// Map size after one growth step: 1.5x the current size, rounded up to the
/// next whole page. `None` if that does not fit in a `usize`.
pub(crate) fn next_map_size(current: usize, page_size: usize) -> Option<usize> {
    let grown = current.checked_add(current / 2)?;
    let grown = round_up(grown, page_size)?;
    if grown > current {
        Some(grown)
    } else {
        // Only a sub-page map could fail to grow; give it a whole page more.
        current.checked_add(page_size)
    }
}
