//! Write Queue Module
//!
//! Bounded producer/consumer queue feeding the single writer thread.
//! Callers push `{op, key, value}` requests and receive a
//! [`WriteHandle`]; the writer drains requests in batches, applies them,
//! and resolves each handle after the batch's WAL flush.
//!
//! ## Semantics
//!
//! - **FIFO**: the writer observes requests in submission order, so
//!   sequence numbers and WAL order coincide.
//! - **Backpressure**: `push` blocks while the queue is at capacity.
//! - **Shutdown**: requests pushed after shutdown fail immediately;
//!   already-queued requests are drained by the writer, after which pops
//!   return empty batches.
//!
//! Built on `crossbeam-channel` bounded channels; the completion side of
//! each request is a one-shot bounded(1) channel that `WriteHandle::wait`
//! blocks on.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Requests and completion handles
// ------------------------------------------------------------------------------------------------

/// Operation requested of the writer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    /// Insert or overwrite a key.
    Put,

    /// Write a tombstone for a key.
    Delete,

    /// Control request: rotate the active memtable out for flushing.
    Rotate,
}

/// One queued write.
pub struct WriteRequest {
    pub op: RequestOp,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    completion: Sender<bool>,
}

impl WriteRequest {
    /// Resolves the caller's handle. Dropped handles are ignored.
    pub fn complete(self, ok: bool) {
        let _ = self.completion.send(ok);
    }
}

/// Caller-side future for one queued write.
pub struct WriteHandle {
    result: Receiver<bool>,
}

impl WriteHandle {
    /// Blocks until the writer resolves this request. Returns `false` if
    /// the request failed or the engine shut down before applying it.
    pub fn wait(self) -> bool {
        self.result.recv().unwrap_or(false)
    }

    /// A handle that already resolved to failure (used for requests
    /// rejected at push time).
    pub fn failed() -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(false);
        Self { result: rx }
    }
}

// ------------------------------------------------------------------------------------------------
// Queue
// ------------------------------------------------------------------------------------------------

/// Bounded FIFO of write requests.
pub struct WriteQueue {
    tx: Sender<WriteRequest>,
    rx: Receiver<WriteRequest>,
    shutdown: Arc<AtomicBool>,
}

impl WriteQueue {
    /// A queue holding at most `capacity` in-flight requests.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues a request, blocking while the queue is full. Returns the
    /// caller's completion handle, already failed when the queue is shut
    /// down.
    pub fn push(&self, op: RequestOp, key: Vec<u8>, value: Vec<u8>) -> WriteHandle {
        if self.is_shutdown() {
            return WriteHandle::failed();
        }

        let (completion, result) = bounded(1);
        let request = WriteRequest {
            op,
            key,
            value,
            completion,
        };

        match self.tx.send(request) {
            Ok(()) => WriteHandle { result },
            Err(_) => WriteHandle::failed(),
        }
    }

    /// Drains up to `max` requests. Blocks until at least one request
    /// arrives; returns an empty batch once the queue is shut down and
    /// drained.
    pub fn pop_batch(&self, max: usize) -> Vec<WriteRequest> {
        let mut batch = Vec::new();

        // Block for the first request, waking periodically to observe
        // shutdown.
        loop {
            match self.rx.recv_timeout(Duration::from_millis(50)) {
                Ok(request) => {
                    batch.push(request);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_shutdown() {
                        // Drain whatever raced in before the flag.
                        while batch.len() < max {
                            match self.rx.try_recv() {
                                Ok(request) => batch.push(request),
                                Err(_) => return batch,
                            }
                        }
                        return batch;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return batch,
            }
        }

        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }
        batch
    }

    /// Drains whatever is queued without blocking. Used after the writer
    /// has exited, so a push that raced the shutdown flag still gets its
    /// handle resolved.
    pub fn drain(&self) -> Vec<WriteRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    /// Marks the queue shut down. Pending pushes complete with failure;
    /// the writer drains what is already queued.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        debug!(pending = self.rx.len(), "write queue shut down");
    }

    /// True once `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no request is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
