//! Communicator handles for collective and point-to-point operations.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::buffer::SendBuffer;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::fabric::{Envelope, Fabric};
use crate::status::Status;
use crate::{ANY_SOURCE, ReduceOp};

/// A worker's handle onto its universe.
///
/// Every worker thread receives exactly one communicator from
/// [`Universe::run`](crate::Universe::run). Collective operations must be
/// called by every worker, in the same order; the communicator numbers its
/// collectives so the fabric can detect participants that disagree.
///
/// # Example
///
/// ```
/// use ferropi::{ReduceOp, Universe};
///
/// let sums = Universe::new(4)?.run(|world| {
///     world.reduce_scalar(world.rank() as u64, ReduceOp::Sum, 0)
/// })?;
/// assert_eq!(sums[0], Some(6));
/// assert_eq!(sums[1], None);
/// # Ok::<(), ferropi::Error>(())
/// ```
pub struct Communicator {
    fabric: Arc<Fabric>,
    rank: i32,
    sequence: Cell<u64>,
    buffer_attached: Cell<bool>,
    /// Communicators are bound to the worker thread they were created on
    _marker: PhantomData<*mut ()>,
}

impl Communicator {
    pub(crate) fn new(fabric: Arc<Fabric>, rank: i32) -> Self {
        Communicator {
            fabric,
            rank,
            sequence: Cell::new(0),
            buffer_attached: Cell::new(false),
            _marker: PhantomData,
        }
    }

    pub(crate) fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Get the rank of the calling worker.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Get the number of workers in the universe.
    pub fn size(&self) -> i32 {
        self.fabric.size()
    }

    /// The timeout applied to every blocking wait, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.fabric.timeout()
    }

    pub(crate) fn check_rank(&self, rank: i32) -> Result<()> {
        if (0..self.size()).contains(&rank) {
            Ok(())
        } else {
            Err(Error::InvalidRank(rank))
        }
    }

    fn check_source(&self, source: i32) -> Result<()> {
        if source == ANY_SOURCE {
            Ok(())
        } else {
            self.check_rank(source)
        }
    }

    fn next_sequence(&self) -> u64 {
        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);
        sequence
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Barrier synchronization.
    ///
    /// All workers must call this function. No worker will return until all
    /// workers have entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        let sequence = self.next_sequence();
        trace!(rank = self.rank, sequence, "barrier");
        self.fabric.barrier(sequence)
    }

    // ========================================================================
    // Buffered Point-to-Point Communication
    // ========================================================================

    /// Attach a send buffer of `capacity` bytes for buffered sends.
    ///
    /// Only one buffer may be attached at a time. The buffer is detached, and
    /// every message sent through it delivered, when the returned handle is
    /// detached or dropped.
    pub fn attach_buffer(&self, capacity: usize) -> Result<SendBuffer<'_>> {
        if self.buffer_attached.replace(true) {
            return Err(Error::BufferAlreadyAttached(self.rank));
        }
        SendBuffer::attach(self, capacity).inspect_err(|_| self.buffer_attached.set(false))
    }

    pub(crate) fn release_buffer(&self) {
        self.buffer_attached.set(false);
    }

    // ========================================================================
    // Point-to-Point Communication
    // ========================================================================

    /// Send raw bytes to another worker.
    ///
    /// The payload is copied straight into the destination's mailbox, so this
    /// never blocks.
    pub fn send(&self, data: &[u8], dest: i32, tag: i32) -> Result<()> {
        self.check_rank(dest)?;
        self.fabric.check_aborted()?;
        self.fabric.deliver(
            dest,
            Envelope {
                source: self.rank,
                tag,
                payload: data.to_vec(),
            },
        );
        Ok(())
    }

    /// Block until a message matching `(source, tag)` is pending.
    ///
    /// Use [`ANY_SOURCE`] and [`ANY_TAG`](crate::ANY_TAG) as wildcards.
    pub fn probe(&self, source: i32, tag: i32) -> Result<Status> {
        self.check_source(source)?;
        self.fabric.probe(self.rank, source, tag)
    }

    /// Check, without blocking, whether a message matching `(source, tag)` is
    /// pending.
    ///
    /// Returns the message's envelope without consuming it.
    pub fn iprobe(&self, source: i32, tag: i32) -> Result<Option<Status>> {
        self.check_source(source)?;
        self.fabric.iprobe(self.rank, source, tag)
    }

    /// Receive bytes from another worker.
    ///
    /// Blocks until a matching message is pending. Messages from the same
    /// source are received in the order they were delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if `data` is shorter than the message; the
    /// message stays queued.
    pub fn recv(&self, data: &mut [u8], source: i32, tag: i32) -> Result<Status> {
        self.check_source(source)?;
        self.fabric.recv(self.rank, data, source, tag)
    }

    /// Receive exactly one whole message, sized from its envelope.
    pub fn recv_vec(&self, source: i32, tag: i32) -> Result<(Vec<u8>, Status)> {
        let status = self.probe(source, tag)?;
        let mut data = vec![0u8; status.count];
        let status = self.recv(&mut data, status.source, status.tag)?;
        data.truncate(status.count);
        Ok((data, status))
    }

    // ========================================================================
    // Blocking Collectives
    // ========================================================================

    /// Broadcast a slice from root to all workers.
    ///
    /// # Arguments
    ///
    /// * `data` - Buffer to broadcast (input at root, output at others)
    /// * `root` - Rank of the root worker
    pub fn broadcast<T: Datatype>(&self, data: &mut [T], root: i32) -> Result<()> {
        self.check_rank(root)?;
        let sequence = self.next_sequence();
        trace!(rank = self.rank, sequence, root, len = data.len(), "broadcast");
        self.fabric.broadcast(sequence, self.rank, data, root)
    }

    /// Broadcast a single value from root, returning the root's value everywhere.
    pub fn broadcast_scalar<T: Datatype>(&self, value: T, root: i32) -> Result<T> {
        let mut data = [value];
        self.broadcast(&mut data, root)?;
        Ok(data[0])
    }

    /// Reduce values to the root worker.
    ///
    /// # Arguments
    ///
    /// * `send` - Data to send from this worker
    /// * `recv` - Buffer for result (only written at root)
    /// * `op` - Reduction operation
    /// * `root` - Rank of the root worker
    ///
    /// Non-root workers return as soon as their contribution is deposited;
    /// the root blocks until every worker has contributed.
    pub fn reduce<T: Datatype>(
        &self,
        send: &[T],
        recv: &mut [T],
        op: ReduceOp,
        root: i32,
    ) -> Result<()> {
        self.check_rank(root)?;
        Error::check_len(send.len(), recv.len())?;
        let sequence = self.next_sequence();
        trace!(rank = self.rank, sequence, root, ?op, "reduce");
        let recv = (self.rank == root).then_some(recv);
        self.fabric.reduce(sequence, self.rank, send, recv, op, root)
    }

    /// Reduce a single value, returning `Some(result)` at root and `None`
    /// elsewhere.
    pub fn reduce_scalar<T: Datatype>(
        &self,
        value: T,
        op: ReduceOp,
        root: i32,
    ) -> Result<Option<T>> {
        let send = [value];
        let mut recv = [value];
        self.reduce(&send, &mut recv, op, root)?;
        Ok((self.rank == root).then_some(recv[0]))
    }
}

// Communicators are not Send or Sync: each one carries its worker's
// collective sequence counter.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ANY_TAG;

    fn solo() -> Communicator {
        Communicator::new(Arc::new(Fabric::new(1, None)), 0)
    }

    #[test]
    fn rank_and_size() {
        let world = solo();
        assert_eq!(world.rank(), 0);
        assert_eq!(world.size(), 1);
        assert!(world.timeout().is_none());
    }

    #[test]
    fn invalid_destination_is_rejected() {
        let world = solo();
        assert!(matches!(world.send(b"x", 1, 0), Err(Error::InvalidRank(1))));
        assert!(matches!(world.iprobe(-2, 0), Err(Error::InvalidRank(-2))));
        assert!(matches!(
            world.broadcast(&mut [0u64], 3),
            Err(Error::InvalidRank(3))
        ));
    }

    #[test]
    fn reduce_rejects_mismatched_buffers() {
        let world = solo();
        let err = world
            .reduce(&[1u64, 2], &mut [0u64], ReduceOp::Sum, 0)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBuffer { expected: 2, actual: 1 }));
    }

    #[test]
    fn collectives_advance_the_sequence() {
        let world = solo();
        world.barrier().unwrap();
        world.broadcast_scalar(1u32, 0).unwrap();
        assert_eq!(world.reduce_scalar(2u32, ReduceOp::Sum, 0).unwrap(), Some(2));
        assert_eq!(world.sequence.get(), 3);
    }

    #[test]
    fn send_to_self_then_recv_vec() {
        let world = solo();
        world.send(b"ping", 0, 9).unwrap();
        let (data, status) = world.recv_vec(ANY_SOURCE, ANY_TAG).unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(status.tag, 9);
        assert_eq!(status.source, 0);
    }

    #[test]
    fn second_attach_is_rejected() {
        let world = solo();
        let buffer = world.attach_buffer(1024).unwrap();
        assert!(matches!(
            world.attach_buffer(1024),
            Err(Error::BufferAlreadyAttached(0))
        ));
        buffer.detach().unwrap();
        world.attach_buffer(1024).unwrap().detach().unwrap();
    }
}
