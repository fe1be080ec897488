//! Single persistence writer with a bounded wait.
//!
//! All store writes are funneled onto one thread, so storage sees a single writer no matter
//! how many threads mutate the stores. Callers block until their job finishes or the
//! configured timeout elapses. A timed-out job may still complete later; stores treat the
//! timeout as "disk state unknown" and resynchronize on their next write.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::{StorageError, StorageResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct PersistQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl PersistQueue {
    pub fn new(timeout: Duration) -> StorageResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("clipkeep-persist".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                debug!("[PersistQueue] Writer thread exiting");
            })
            .map_err(|e| StorageError::Backend(format!("Failed to spawn writer thread: {}", e)))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `op` on the writer thread and wait at most `timeout` for its result.
    pub fn run<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            // The caller may have given up waiting; nothing to do then
            let _ = reply_tx.send(op());
        });

        {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            let sender = sender.as_ref().ok_or(StorageError::WriterGone)?;
            sender.send(job).map_err(|_| StorageError::WriterGone)?;
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("[PersistQueue] Write timed out after {:?}", self.timeout);
                Err(StorageError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(StorageError::WriterGone),
        }
    }

    /// Finish queued jobs and join the writer thread. Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(sender);
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("[PersistQueue] Writer thread panicked");
            }
        }
    }
}

impl Drop for PersistQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
