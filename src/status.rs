//! Message status information.
//!
//! This module provides the [`Status`] struct returned by probe and receive
//! operations, describing a point-to-point message's envelope.

/// Envelope of a probed or received point-to-point message.
///
/// Returned by [`Communicator::probe`](crate::Communicator::probe) and
/// [`Communicator::iprobe`](crate::Communicator::iprobe) to describe an
/// incoming message without consuming it, and by
/// [`Communicator::recv`](crate::Communicator::recv) once it has been consumed.
///
/// `count` is the payload length in bytes, so a receiver can size its buffer
/// to the message exactly before calling `recv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank that sent the message.
    pub source: i32,
    /// Tag the message was sent with.
    pub tag: i32,
    /// Payload length in bytes.
    pub count: usize,
}
