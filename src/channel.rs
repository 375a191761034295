//! Progress text from every worker to the coordinator.
//!
//! Workers write through a [`MessageChannel`], which owns the worker's
//! attached send buffer: [`send`](MessageChannel::send) copies the text into
//! the buffer and returns immediately, counting what it sent. The
//! coordinator learns the combined count from a reduction and then calls
//! [`drain`], which polls for pending messages from any worker until exactly
//! that many have been consumed.
//!
//! Messages from one worker arrive in the order they were sent. Messages
//! from different workers arrive in delivery order, with no ordering between
//! them.

use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use crate::buffer::{BSEND_OVERHEAD, SendBuffer};
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::{ANY_SOURCE, partition};

/// Tag every progress message travels under.
pub const PRINT_TAG: i32 = 100;

/// Largest accepted message payload, in bytes.
pub const MAX_MESSAGE_LEN: usize = 100;

/// Rank that drains and prints messages.
pub const COORDINATOR: i32 = partition::REMAINDER_HOLDER;

/// A progress message as received by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Rank that sent the message.
    pub source: i32,
    /// Message text.
    pub text: String,
}

/// A worker's outgoing progress channel.
///
/// Attaching acquires the worker's send buffer; [`detach`](Self::detach)
/// releases it and blocks until every message has been delivered. It must
/// only be detached once the worker has finished every reduction.
pub struct MessageChannel<'c> {
    buffer: SendBuffer<'c>,
    sent: u64,
}

impl<'c> MessageChannel<'c> {
    /// Attach a channel backed by a `capacity` byte send buffer.
    pub fn attach(world: &'c Communicator, capacity: usize) -> Result<Self> {
        Ok(MessageChannel {
            buffer: world.attach_buffer(capacity)?,
            sent: 0,
        })
    }

    /// Buffer capacity needed to keep `messages` maximum-length messages in
    /// flight at once.
    pub fn capacity_for(messages: usize) -> usize {
        messages * (MAX_MESSAGE_LEN + BSEND_OVERHEAD)
    }

    /// Queue `text` for the coordinator without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLong`] for text over [`MAX_MESSAGE_LEN`]
    /// bytes and [`Error::BufferExhausted`] when the buffer is full.
    pub fn send(&mut self, text: impl AsRef<str>) -> Result<()> {
        let text = text.as_ref();
        if text.len() > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLong {
                len: text.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        self.buffer.bsend(text.as_bytes(), COORDINATOR, PRINT_TAG)?;
        self.sent += 1;
        trace!(
            sent = self.sent,
            in_flight = self.buffer.in_flight(),
            available = self.buffer.available(),
            "message queued"
        );
        Ok(())
    }

    /// Messages sent through this channel so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages sent but not yet delivered to the coordinator.
    pub fn in_flight(&mut self) -> usize {
        self.buffer.in_flight()
    }

    /// Send buffer bytes still free.
    pub fn available(&self) -> usize {
        self.buffer.available()
    }

    /// Release the buffer once every message has been delivered.
    pub fn detach(self) -> Result<()> {
        self.buffer.detach().map(drop)
    }
}

/// Consume exactly `expected` progress messages on the coordinator.
///
/// Each pass checks for a pending message from any worker without blocking;
/// a pending message is received at its exact size and handed to `consume`.
/// Between empty passes the thread yields. The loop ends once `expected`
/// messages have been consumed.
///
/// # Errors
///
/// Propagates errors from `consume`. Returns [`Error::Timeout`] if the
/// universe has a timeout and no message arrives within it, and
/// [`Error::Aborted`] if another worker fails while draining.
pub fn drain<F>(world: &Communicator, expected: u64, mut consume: F) -> Result<u64>
where
    F: FnMut(Message) -> Result<()>,
{
    let mut remaining = expected;
    let mut last_progress = Instant::now();
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];

    while remaining > 0 {
        let Some(status) = world.iprobe(ANY_SOURCE, PRINT_TAG)? else {
            if let Some(timeout) = world.timeout() {
                if last_progress.elapsed() >= timeout {
                    return Err(Error::Timeout {
                        operation: "drain",
                        timeout,
                    });
                }
            }
            thread::yield_now();
            continue;
        };

        if status.count > buf.len() {
            buf.resize(status.count, 0);
        }
        let status = world.recv(&mut buf[..status.count], status.source, PRINT_TAG)?;
        let text = String::from_utf8_lossy(&buf[..status.count]).into_owned();
        consume(Message {
            source: status.source,
            text,
        })?;

        remaining -= 1;
        last_progress = Instant::now();
    }

    debug!(expected, "drain complete");
    Ok(expected)
}
