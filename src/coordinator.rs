//! The single writer.
//!
//! Every update is sent to one dedicated thread, which drains whatever is
//! queued into a batch and runs the whole batch inside one write transaction.
//! A function that fails is pulled out of its batch and the rest run again
//! from scratch; running out of map space grows the map and runs the batch
//! again. Nothing is committed on behalf of a function that failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::env::{next_map_size, Environment};
use crate::error::{Error, Result};
use crate::transaction::RwTxn;

/// A queued update, erased over the caller's function and error types.
pub(crate) trait WriteRequest: Send {
    /// Run the function against the batch transaction, remembering its
    /// outcome. Returns `false` if the function failed.
    fn run(&mut self, txn: &mut RwTxn<'_>) -> bool;

    /// Wake the caller. `Some(err)` replaces whatever the function returned.
    fn complete(self: Box<Self>, err: Option<Error>);
}

struct Update<F, E> {
    txn_fn: F,
    /// Error from the latest run, if it failed
    failure: Option<E>,
    done: SyncSender<std::result::Result<(), E>>,
}

impl<F, E> WriteRequest for Update<F, E>
where
    F: FnMut(&mut RwTxn<'_>) -> std::result::Result<(), E> + Send,
    E: From<Error> + Send,
{
    fn run(&mut self, txn: &mut RwTxn<'_>) -> bool {
        match (self.txn_fn)(txn) {
            Ok(()) => {
                self.failure = None;
                true
            }
            Err(err) => {
                self.failure = Some(err);
                false
            }
        }
    }

    fn complete(self: Box<Self>, err: Option<Error>) {
        let Update { failure, done, .. } = *self;
        let outcome = match (err, failure) {
            (Some(err), _) => Err(E::from(err)),
            (None, Some(failure)) => Err(failure),
            (None, None) => Ok(()),
        };
        // The caller blocks until this arrives, so the receiver is still there
        let _ = done.send(outcome);
    }
}

enum Message {
    Update(Box<dyn WriteRequest>),
    Shutdown,
}

/// Outcome of one pass over a batch
enum Attempt {
    Committed,
    MapFull,
    /// The function at this index failed and the transaction was aborted
    RequestFailed(usize),
    /// The engine failed in a way that sinks the whole batch
    Failed(Error),
}

/// Handle to the writer thread.
#[derive(Debug)]
pub(crate) struct WriteCoordinator {
    sender: SyncSender<Message>,
    accepting: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteCoordinator {
    /// Start the writer thread. `batch_size` bounds both the batch and the
    /// queue of waiting requests.
    pub(crate) fn spawn(env: Arc<Environment>, batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let (sender, receiver) = mpsc::sync_channel(batch_size);
        let writer = Writer {
            env,
            receiver,
            batch_size,
        };
        let worker = thread::Builder::new()
            .name("batchmdb-writer".into())
            .spawn(move || writer.run())?;

        Ok(WriteCoordinator {
            sender,
            accepting: AtomicBool::new(true),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `txn_fn` and block until its batch has finished.
    ///
    /// Fails with [`Error::Terminated`] once the coordinator has been shut
    /// down, including for requests that were still queued at the time.
    pub(crate) fn submit<F, E>(&self, txn_fn: F) -> std::result::Result<(), E>
    where
        F: FnMut(&mut RwTxn<'_>) -> std::result::Result<(), E> + Send + 'static,
        E: From<Error> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(E::from(Error::Terminated));
        }

        let (done, outcome) = mpsc::sync_channel(1);
        let request = Box::new(Update {
            txn_fn,
            failure: None,
            done,
        });
        if self.sender.send(Message::Update(request)).is_err() {
            return Err(E::from(Error::Terminated));
        }
        // A dropped completion means the writer went away without answering
        outcome.recv().unwrap_or_else(|_| Err(E::from(Error::Terminated)))
    }

    /// Stop accepting updates and wait for the writer thread to exit.
    ///
    /// Requests queued before this call are still run. Safe to call more
    /// than once.
    pub(crate) fn terminate(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            // Fails only if the writer is already gone
            let _ = self.sender.send(Message::Shutdown);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("writer thread panicked");
            }
            info!("write coordinator stopped");
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

struct Writer {
    env: Arc<Environment>,
    receiver: Receiver<Message>,
    batch_size: usize,
}

impl Writer {
    fn run(self) {
        let mut batch: Vec<Box<dyn WriteRequest>> = Vec::with_capacity(self.batch_size);
        loop {
            match self.receiver.recv() {
                Ok(Message::Update(request)) => batch.push(request),
                Ok(Message::Shutdown) | Err(_) => break,
            }

            let mut shutdown = false;
            while batch.len() < self.batch_size {
                match self.receiver.try_recv() {
                    Ok(Message::Update(request)) => batch.push(request),
                    Ok(Message::Shutdown) | Err(TryRecvError::Disconnected) => {
                        shutdown = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            self.run_batch(&mut batch);
            if shutdown {
                break;
            }
        }
        // Dropping a queued request wakes its caller with Terminated
        let dropped = self
            .receiver
            .try_iter()
            .filter(|message| matches!(message, Message::Update(_)))
            .count();
        if dropped > 0 {
            warn!("dropped {} updates queued after shutdown", dropped);
        }
    }

    fn run_batch(&self, batch: &mut Vec<Box<dyn WriteRequest>>) {
        debug!("running batch of {} updates", batch.len());
        let outcome = self.execute(batch);
        if let Err(err) = outcome {
            error!("batch of {} updates failed: {}", batch.len(), err);
        }
        let err = outcome.err();
        for request in batch.drain(..) {
            request.complete(err);
        }
    }

    /// Run the batch until it commits, or until nothing is left of it.
    ///
    /// Failed functions are completed here as they are removed; whatever
    /// remains in `batch` afterwards shares the returned outcome.
    fn execute(&self, batch: &mut Vec<Box<dyn WriteRequest>>) -> Result<()> {
        while !batch.is_empty() {
            let attempt = {
                let _shared = self.env.resize_lock().shared();
                self.attempt(batch)
            };
            match attempt {
                Attempt::Committed => {
                    trace!("committed batch of {} updates", batch.len());
                    return Ok(());
                }
                Attempt::Failed(err) => return Err(err),
                Attempt::RequestFailed(index) => {
                    let request = batch.remove(index);
                    warn!("update failed, rerunning {} others in its batch", batch.len());
                    request.complete(None);
                }
                Attempt::MapFull => self.grow()?,
            }
        }
        Ok(())
    }

    /// One write transaction over the whole batch. The caller holds the
    /// shared resize lock.
    fn attempt(&self, batch: &mut [Box<dyn WriteRequest>]) -> Attempt {
        let mut txn = match RwTxn::begin(&self.env) {
            Ok(txn) => txn,
            Err(err) => return Attempt::Failed(err),
        };

        for (index, request) in batch.iter_mut().enumerate() {
            let succeeded = request.run(&mut txn);
            // Checked first: a function that swallowed MapFull still ran out
            // of space.
            if txn.is_map_full() {
                txn.abort();
                return Attempt::MapFull;
            }
            if !succeeded {
                txn.abort();
                return Attempt::RequestFailed(index);
            }
        }

        match txn.commit() {
            Ok(()) => Attempt::Committed,
            Err(Error::MapFull) => Attempt::MapFull,
            Err(err) => Attempt::Failed(err),
        }
    }

    /// Grow the map by one step while holding the resize lock exclusively.
    fn grow(&self) -> Result<()> {
        let exclusive = self.env.resize_lock().exclusive();
        let current = self.env.map_size();
        let Some(grown) = next_map_size(current, self.env.page_size()) else {
            error!("cannot grow map beyond {} bytes", current);
            return Err(Error::MapSizeOverflow(current));
        };
        match self.env.set_map_size(&exclusive, grown) {
            Ok(()) => {
                debug!("map full, grew map from {} to {} bytes", current, grown);
                Ok(())
            }
            Err(err) => {
                error!("failed to grow map from {} to {} bytes: {}", current, grown, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fails;

    impl From<Error> for Fails {
        fn from(_: Error) -> Self {
            Fails
        }
    }

    fn noop<E>(_: &mut RwTxn<'_>) -> std::result::Result<(), E> {
        Ok(())
    }

    fn request<E>(
        failure: Option<E>,
    ) -> (Box<dyn WriteRequest>, Receiver<std::result::Result<(), E>>)
    where
        E: From<Error> + Send + 'static,
    {
        let (done, outcome) = mpsc::sync_channel(1);
        let request = Box::new(Update {
            txn_fn: noop::<E>,
            failure,
            done,
        });
        (request, outcome)
    }

    #[test]
    fn completion_prefers_engine_error() {
        let (request, outcome) = request(Some(Error::NotFound));
        request.complete(Some(Error::Panic));
        assert_eq!(outcome.recv().unwrap(), Err(Error::Panic));
    }

    #[test]
    fn completion_delivers_stashed_failure() {
        let (request, outcome) = request(Some(Error::KeyExist));
        request.complete(None);
        assert_eq!(outcome.recv().unwrap(), Err(Error::KeyExist));
    }

    #[test]
    fn completion_without_failure_succeeds() {
        let (request, outcome) = request::<Error>(None);
        request.complete(None);
        assert_eq!(outcome.recv().unwrap(), Ok(()));
    }

    #[test]
    fn completion_converts_into_caller_error() {
        let (request, outcome) = request::<Fails>(None);
        request.complete(Some(Error::Terminated));
        assert!(matches!(outcome.recv().unwrap(), Err(Fails)));
    }
}
