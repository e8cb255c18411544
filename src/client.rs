use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::config::Options;
use crate::constants::CopyFlags;
use crate::coordinator::WriteCoordinator;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::reader::ReaderThrottle;
use crate::transaction::{RoTxn, RwTxn};
use crate::types::{EnvInfo, Stat};

/// State shared by an [`Lmdb`] and all of its clients
#[derive(Debug)]
struct Shared {
    env: Arc<Environment>,
    /// Read permits and the pool of reset read handles
    readers: ReaderThrottle,
    /// `None` for read-only environments
    coordinator: Option<WriteCoordinator>,
}

impl Shared {
    fn sync(&self, force: bool) -> Result<()> {
        let _shared = self.env.resize_lock().shared();
        self.env.sync(force)
    }

    // The engine runs the copy as one long read on a handle of its own, so
    // it counts as a view and needs a free reader table entry.
    fn copy(&self, path: &Path, compact: bool) -> Result<()> {
        let mut permit = self.readers.acquire()?;
        permit.release_slot();
        let _shared = self.env.resize_lock().shared();
        let flags = if compact {
            CopyFlags::COMPACT
        } else {
            CopyFlags::empty()
        };
        self.env.copy(path, flags)
    }

    fn terminate(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.terminate();
        }
        // Pooled handles are aborted while the environment is still open
        self.readers.close();
        self.env.close();
    }
}

/// An opened database and the writer thread batching its updates.
///
/// Reads and writes go through [`Client`]s, made with [`Lmdb::client`].
/// Dropping the `Lmdb` shuts it down just like
/// [`terminate_sync`](Lmdb::terminate_sync).
pub struct Lmdb {
    shared: Arc<Shared>,
}

impl Lmdb {
    /// Open the environment at `path`, which must be an existing directory
    /// (unless `NOSUBDIR` is set).
    ///
    /// Unless the environment is opened read-only, this also starts the
    /// writer thread.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Lmdb> {
        let env = Arc::new(Environment::open(path.as_ref(), &options)?);
        let coordinator = if env.is_read_only() {
            None
        } else {
            Some(WriteCoordinator::spawn(
                Arc::clone(&env),
                options.effective_batch_size(),
            )?)
        };

        Ok(Lmdb {
            shared: Arc::new(Shared {
                env,
                readers: ReaderThrottle::new(options.view_permits()),
                coordinator,
            }),
        })
    }

    /// A new client. Clients are cheap and may be shared between threads.
    pub fn client(&self) -> Client {
        Client {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Shut down: refuse new updates, finish the ones already queued, stop
    /// the writer thread and close the environment.
    ///
    /// Blocks until running views have finished. Clients that outlive this
    /// get [`Error::Terminated`] from `update` and [`Error::EnvClosed`] from
    /// everything else.
    pub fn terminate_sync(self) {
        self.shared.terminate();
        info!("terminated");
    }

    /// See [`Client::sync`]
    pub fn sync(&self, force: bool) -> Result<()> {
        self.shared.sync(force)
    }

    /// See [`Client::copy`]
    pub fn copy<P: AsRef<Path>>(&self, path: P, compact: bool) -> Result<()> {
        self.shared.copy(path.as_ref(), compact)
    }

    /// Current map size in bytes. Grows as updates need more room.
    pub fn map_size(&self) -> usize {
        self.shared.env.map_size()
    }

    pub fn page_size(&self) -> usize {
        self.shared.env.page_size()
    }

    pub fn info(&self) -> Result<EnvInfo> {
        let _shared = self.shared.env.resize_lock().shared();
        self.shared.env.info()
    }

    /// Statistics for the main database
    pub fn stat(&self) -> Result<Stat> {
        let _shared = self.shared.env.resize_lock().shared();
        self.shared.env.stat()
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.env.is_read_only()
    }

    /// The underlying environment
    pub fn environment(&self) -> &Environment {
        &self.shared.env
    }
}

impl Drop for Lmdb {
    fn drop(&mut self) {
        // No-op after terminate_sync
        self.shared.terminate();
    }
}

impl fmt::Debug for Lmdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lmdb")
            .field("map_size", &self.map_size())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// A handle for running views and updates.
///
/// Views run on read-only transactions taken from a pool shared by all
/// clients of the same [`Lmdb`]. A finished view resets its transaction and
/// leaves it in the pool for the next view to renew. The pool never holds
/// more entries of the engine's reader table than there are view permits.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Run `f` inside a read-only transaction.
    ///
    /// Blocks while the maximum number of views are already running, and
    /// while the map is being resized. Everything `f` reads is one consistent
    /// snapshot. The values it sees must be copied out to outlive the view.
    ///
    /// Do not call [`update`](Self::update) from inside `f`: if that update
    /// needs to grow the map it waits for this view to end.
    pub fn view<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&RoTxn<'_>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let env = &*self.shared.env;
        let mut permit = self.shared.readers.acquire()?;
        // Nothing can resize a read-only map
        let _shared = if env.is_read_only() {
            None
        } else {
            Some(env.resize_lock().shared())
        };

        // Dropped first, so the handle is reset under the shared lock
        let read = permit.begin(env)?;
        let txn = RoTxn::new(read.txn());
        f(&txn)
    }

    /// Run `f` inside a read-write transaction, blocking until it has been
    /// committed or has failed.
    ///
    /// `f` is batched with other clients' updates into one transaction and
    /// may run several times before it is committed, so it must not have
    /// side effects outside the transaction. When `f` returns an error,
    /// none of its writes are committed and that error is returned here;
    /// the other updates of its batch are unaffected.
    pub fn update<E, F>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&mut RwTxn<'_>) -> std::result::Result<(), E> + Send + 'static,
        E: From<Error> + Send + 'static,
    {
        match &self.shared.coordinator {
            Some(coordinator) => coordinator.submit(f),
            None => Err(E::from(Error::ReadOnly)),
        }
    }

    /// Flush the data buffers to disk. Only needed with `NOSYNC`,
    /// `NOMETASYNC` or `MAPASYNC`; `force` makes it synchronous.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.shared.sync(force)
    }

    /// Write a consistent copy of the database to the directory `path`,
    /// which must exist and be empty. `compact` omits free pages and
    /// renumbers the rest.
    ///
    /// The copy counts as a running view while it lasts, so calling it from
    /// inside a view waits forever when only one view may run at a time.
    pub fn copy<P: AsRef<Path>>(&self, path: P, compact: bool) -> Result<()> {
        self.shared.copy(path.as_ref(), compact)
    }

    /// Whether updates will still be accepted
    pub fn is_accepting_updates(&self) -> bool {
        self.shared
            .coordinator
            .as_ref()
            .map_or(false, WriteCoordinator::is_accepting)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("read_only", &self.shared.env.is_read_only())
            .field("accepting_updates", &self.is_accepting_updates())
            .finish()
    }
}
