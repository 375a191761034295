//! Attached send buffers for buffered (fire-and-forget) sends.
//!
//! A [`SendBuffer`] is a fixed-size arena owned by one worker. Each
//! [`bsend`](SendBuffer::bsend) reserves the payload plus [`BSEND_OVERHEAD`]
//! bytes of framing and hands the message to a progress engine thread, which
//! delivers it to the destination mailbox and releases the reservation.
//! [`detach`](SendBuffer::detach) blocks until everything sent through the
//! buffer has been delivered.
//!
//! # Example
//!
//! ```
//! use ferropi::{Universe, ANY_SOURCE};
//!
//! Universe::new(2)?.run(|world| {
//!     let mut buffer = world.attach_buffer(1024)?;
//!     buffer.bsend(b"hi", 0, 1)?;
//!     if world.rank() == 0 {
//!         for _ in 0..2 {
//!             let (data, _) = world.recv_vec(ANY_SOURCE, 1)?;
//!             assert_eq!(data, b"hi");
//!         }
//!     }
//!     buffer.detach()
//! })?;
//! # Ok::<(), ferropi::Error>(())
//! ```

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::debug;

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::fabric::Envelope;
use crate::request::{Completion, Request};

/// Framing bytes reserved per buffered message on top of its payload.
pub const BSEND_OVERHEAD: usize = 96;

struct Outgoing {
    dest: i32,
    envelope: Envelope,
    reserved: usize,
    completion: Arc<Completion>,
}

/// A worker's attached send buffer.
///
/// Obtained from [`Communicator::attach_buffer`]. Dropping the buffer
/// detaches it, which waits for outstanding deliveries.
pub struct SendBuffer<'c> {
    comm: &'c Communicator,
    capacity: usize,
    used: Arc<AtomicUsize>,
    queue: Option<Sender<Outgoing>>,
    progress: Option<JoinHandle<()>>,
    pending: Vec<Request>,
}

impl<'c> SendBuffer<'c> {
    pub(crate) fn attach(comm: &'c Communicator, capacity: usize) -> Result<Self> {
        let (queue, outgoing) = channel::unbounded::<Outgoing>();
        let used = Arc::new(AtomicUsize::new(0));

        let fabric = Arc::clone(comm.fabric());
        let released = Arc::clone(&used);
        let progress = thread::Builder::new()
            .name(format!("bsend-{}", comm.rank()))
            .spawn(move || {
                for message in outgoing {
                    fabric.deliver(message.dest, message.envelope);
                    released.fetch_sub(message.reserved, Ordering::SeqCst);
                    message.completion.complete();
                }
            })?;

        debug!(rank = comm.rank(), capacity, "send buffer attached");
        Ok(SendBuffer {
            comm,
            capacity,
            used,
            queue: Some(queue),
            progress: Some(progress),
            pending: Vec::new(),
        })
    }

    /// Total size of the arena in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes not currently reserved by undelivered messages.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used.load(Ordering::SeqCst))
    }

    /// Number of messages handed to the progress engine but not yet delivered.
    pub fn in_flight(&mut self) -> usize {
        self.pending.retain_mut(|request| !request.test());
        self.pending.len()
    }

    /// Copy `payload` into the arena and queue it for delivery to `dest`.
    ///
    /// Returns as soon as the copy is made; delivery is only guaranteed once
    /// the buffer is detached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferExhausted`] if the arena cannot hold the payload
    /// plus [`BSEND_OVERHEAD`] bytes.
    pub fn bsend(&mut self, payload: &[u8], dest: i32, tag: i32) -> Result<()> {
        self.comm.check_rank(dest)?;
        self.comm.fabric().check_aborted()?;

        let reserved = payload.len() + BSEND_OVERHEAD;
        let capacity = self.capacity;
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used + reserved <= capacity).then_some(used + reserved)
            })
            .map_err(|used| Error::BufferExhausted {
                requested: reserved,
                available: capacity.saturating_sub(used),
                capacity,
            })?;

        let completion = Completion::new();
        let message = Outgoing {
            dest,
            envelope: Envelope {
                source: self.comm.rank(),
                tag,
                payload: payload.to_vec(),
            },
            reserved,
            completion: Arc::clone(&completion),
        };
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::Internal("send buffer already detached".into()))?;
        queue
            .send(message)
            .map_err(|_| Error::Internal("progress engine stopped".into()))?;

        self.pending.retain_mut(|request| !request.test());
        self.pending.push(Request::new(completion));
        Ok(())
    }

    /// Detach the buffer, blocking until every message sent through it has
    /// been delivered.
    ///
    /// Returns the buffer's capacity.
    pub fn detach(mut self) -> Result<usize> {
        self.finish()?;
        Ok(self.capacity)
    }

    fn finish(&mut self) -> Result<()> {
        let Some(progress) = self.progress.take() else {
            return Ok(());
        };
        // Closing the queue lets the engine exit once it has drained it.
        drop(self.queue.take());
        Request::wait_all(mem::take(&mut self.pending));
        let joined = progress
            .join()
            .map_err(|_| Error::Internal("progress engine panicked".into()));
        self.comm.release_buffer();
        debug!(rank = self.comm.rank(), "send buffer detached");
        joined
    }
}

impl Drop for SendBuffer<'_> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
