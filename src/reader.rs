use std::marker::PhantomData;
use std::ptr::NonNull;

use lmdb_sys as ffi;
use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::env::Environment;
use crate::error::{Error, Result};

/// A read-only handle kept between reads and renewed by the next one.
///
/// Under `NOTLS` a reset handle keeps its entry in the engine's reader
/// table, so every slot counts against the reader limit until aborted.
#[derive(Debug)]
pub(crate) struct ReadSlot {
    txn: NonNull<ffi::MDB_txn>,
    /// Map generation the handle was begun under
    generation: u64,
}

// With NOTLS a reset handle may be renewed from any thread. A slot is held
// by at most one permit at a time.
unsafe impl Send for ReadSlot {}

impl ReadSlot {
    fn abort(self) {
        unsafe { ffi::mdb_txn_abort(self.txn.as_ptr()) };
    }
}

#[derive(Debug)]
struct State {
    /// Permits currently handed out
    held: u32,
    /// Reset slots waiting for a permit to pick them up
    idle: Vec<ReadSlot>,
    closed: bool,
}

/// Counting permit set bounding how many reads run at once.
///
/// Each permit stands for one entry in the engine's reader table. Idle slots
/// are pooled here and handed out together with the permits, so held
/// permits plus idle slots never exceed the capacity.
#[derive(Debug)]
pub(crate) struct ReaderThrottle {
    state: Mutex<State>,
    released: Condvar,
    capacity: u32,
}

impl ReaderThrottle {
    pub(crate) fn new(capacity: u32) -> Self {
        ReaderThrottle {
            state: Mutex::new(State {
                held: 0,
                idle: Vec::new(),
                closed: false,
            }),
            released: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Take a permit, blocking until one is free.
    ///
    /// Fails with [`Error::EnvClosed`] once the throttle has been closed,
    /// including for callers that were waiting at the time.
    pub(crate) fn acquire(&self) -> Result<ReaderPermit<'_>> {
        let mut state = self.state.lock();
        while state.held == self.capacity && !state.closed {
            self.released.wait(&mut state);
        }
        if state.closed {
            return Err(Error::EnvClosed);
        }
        state.held += 1;
        let slot = state.idle.pop();
        Ok(ReaderPermit {
            throttle: self,
            slot,
        })
    }

    /// Refuse new permits, wait for the held ones to come back, then abort
    /// every pooled slot. Must run before the environment is closed.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            self.released.notify_all();
        }
        while state.held > 0 {
            self.released.wait(&mut state);
        }
        let freed = state.idle.len();
        for slot in state.idle.drain(..) {
            slot.abort();
        }
        if freed > 0 {
            trace!("freed {} pooled read transactions", freed);
        }
    }
}

/// One held permit, possibly carrying a pooled slot. Returned on drop.
#[derive(Debug)]
pub(crate) struct ReaderPermit<'a> {
    throttle: &'a ReaderThrottle,
    slot: Option<ReadSlot>,
}

impl ReaderPermit<'_> {
    /// Start a read on this permit's slot.
    ///
    /// The slot is renewed if it has one, otherwise a new handle is begun;
    /// a handle begun before a map resize is aborted and replaced. The
    /// caller holds the shared resize lock unless the environment is
    /// read-only.
    pub(crate) fn begin<'p>(&'p mut self, env: &'p Environment) -> Result<ActiveRead<'p>> {
        let generation = env.generation();
        match self.slot.take() {
            Some(slot) if slot.generation == generation => {
                if let Err(err) = env.renew(slot.txn) {
                    slot.abort();
                    return Err(err);
                }
                trace!("renewed read transaction");
                self.slot = Some(slot);
            }
            stale => {
                if let Some(slot) = stale {
                    trace!("discarding read transaction begun before a map resize");
                    slot.abort();
                }
                let txn = env.begin_ro_txn()?;
                self.slot = Some(ReadSlot { txn, generation });
            }
        }

        let txn = match &self.slot {
            Some(slot) => slot.txn,
            None => return Err(Error::BadTxn),
        };
        Ok(ActiveRead {
            txn,
            env,
            _permit: PhantomData,
        })
    }

    /// Give up the carried slot and its reader table entry, for reads the
    /// engine runs on a handle of its own.
    pub(crate) fn release_slot(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.abort();
        }
    }
}

impl Drop for ReaderPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.throttle.state.lock();
        if let Some(slot) = self.slot.take() {
            state.idle.push(slot);
        }
        state.held -= 1;
        debug_assert!(state.held as usize + state.idle.len() <= self.throttle.capacity as usize);
        let closed = state.closed;
        drop(state);
        // close() waits on the same condvar as acquire()
        if closed {
            self.throttle.released.notify_all();
        } else {
            self.throttle.released.notify_one();
        }
    }
}

/// A running read. Resets its handle on drop, even when unwinding.
pub(crate) struct ActiveRead<'p> {
    txn: NonNull<ffi::MDB_txn>,
    env: &'p Environment,
    _permit: PhantomData<&'p mut ()>,
}

impl ActiveRead<'_> {
    pub(crate) fn txn(&self) -> NonNull<ffi::MDB_txn> {
        self.txn
    }
}

impl Drop for ActiveRead<'_> {
    fn drop(&mut self) {
        self.env.reset(self.txn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn held(throttle: &ReaderThrottle) -> u32 {
        throttle.state.lock().held
    }

    #[test]
    fn permits_are_counted() {
        let throttle = ReaderThrottle::new(2);
        let first = throttle.acquire().unwrap();
        let second = throttle.acquire().unwrap();
        assert_eq!(held(&throttle), 2);
        assert!(first.slot.is_none());
        drop(first);
        assert_eq!(held(&throttle), 1);
        drop(second);
        assert_eq!(held(&throttle), 0);
    }

    #[test]
    fn zero_capacity_still_admits_one() {
        let throttle = ReaderThrottle::new(0);
        assert_eq!(throttle.capacity, 1);
        let _permit = throttle.acquire().unwrap();
        assert_eq!(held(&throttle), 1);
    }

    #[test]
    fn acquire_waits_for_release() {
        let throttle = Arc::new(ReaderThrottle::new(1));
        let held_permit = throttle.acquire().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let throttle = Arc::clone(&throttle);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _permit = throttle.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(held_permit);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(held(&throttle), 0);
    }

    #[test]
    fn close_refuses_waiters_and_waits_for_holders() {
        let throttle = Arc::new(ReaderThrottle::new(1));
        let held_permit = throttle.acquire().unwrap();

        let waiter = {
            let throttle = Arc::clone(&throttle);
            thread::spawn(move || throttle.acquire().map(|_| ()))
        };
        let closed = Arc::new(AtomicBool::new(false));
        let closer = {
            let throttle = Arc::clone(&throttle);
            let closed = Arc::clone(&closed);
            thread::spawn(move || {
                throttle.close();
                closed.store(true, Ordering::SeqCst);
            })
        };

        assert_eq!(waiter.join().unwrap(), Err(Error::EnvClosed));
        thread::sleep(Duration::from_millis(50));
        assert!(!closed.load(Ordering::SeqCst));
        drop(held_permit);
        closer.join().unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(throttle.acquire().map(|_| ()), Err(Error::EnvClosed));
    }
}
