//! In-process transport shared by every worker of a universe.
//!
//! The fabric owns one mailbox per rank for point-to-point traffic and a
//! table of in-progress collectives keyed by sequence number. Every blocking
//! wait goes through [`Fabric::wait_until`], which honours the universe's
//! optional timeout and wakes up when the universe is aborted.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::datatype::{Datatype, DatatypeTag};
use crate::error::{Error, Result};
use crate::status::Status;
use crate::{ANY_SOURCE, ANY_TAG, ReduceOp};

/// A point-to-point message in transit or waiting in a mailbox.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) source: i32,
    pub(crate) tag: i32,
    pub(crate) payload: Vec<u8>,
}

impl Envelope {
    fn matches(&self, source: i32, tag: i32) -> bool {
        (source == ANY_SOURCE || self.source == source) && (tag == ANY_TAG || self.tag == tag)
    }

    fn status(&self) -> Status {
        Status {
            source: self.source,
            tag: self.tag,
            count: self.payload.len(),
        }
    }
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectiveKind {
    Barrier,
    Broadcast,
    Reduce(ReduceOp),
}

/// What a participant believes the collective at a given sequence number is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Signature {
    pub(crate) kind: CollectiveKind,
    pub(crate) root: i32,
    pub(crate) datatype: Option<DatatypeTag>,
    pub(crate) len: usize,
}

impl Signature {
    pub(crate) fn barrier() -> Self {
        Signature {
            kind: CollectiveKind::Barrier,
            root: 0,
            datatype: None,
            len: 0,
        }
    }

    pub(crate) fn of<T: Datatype>(kind: CollectiveKind, root: i32, len: usize) -> Self {
        Signature {
            kind,
            root,
            datatype: Some(T::TAG),
            len,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CollectiveKind::Barrier => return write!(f, "barrier"),
            CollectiveKind::Broadcast => write!(f, "broadcast")?,
            CollectiveKind::Reduce(op) => write!(f, "reduce({op:?})")?,
        }
        write!(f, " root={}", self.root)?;
        if let Some(tag) = self.datatype {
            write!(f, " {tag:?}[{}]", self.len)?;
        }
        Ok(())
    }
}

struct Slot {
    signature: Signature,
    arrivals: i32,
    departures: i32,
    payload: Option<Box<dyn Any + Send>>,
}

/// Shared state behind every [`Communicator`](crate::Communicator) of a universe.
pub(crate) struct Fabric {
    size: i32,
    timeout: Option<Duration>,
    mailboxes: Vec<Mailbox>,
    collectives: Mutex<HashMap<u64, Slot>>,
    progress: Condvar,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Fabric {
    pub(crate) fn new(size: i32, timeout: Option<Duration>) -> Self {
        Fabric {
            size,
            timeout,
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            collectives: Mutex::new(HashMap::new()),
            progress: Condvar::new(),
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
        }
    }

    pub(crate) fn size(&self) -> i32 {
        self.size
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    // ========================================================================
    // Abort handling
    // ========================================================================

    /// Tear the universe down, waking every blocked participant.
    ///
    /// Only the first reason is kept; later calls just re-notify.
    pub(crate) fn abort(&self, reason: String) {
        {
            let mut slot = lock(&self.abort_reason);
            if slot.is_none() {
                warn!(%reason, "aborting universe");
                *slot = Some(reason);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);

        // Notify under each lock so a waiter cannot miss the flag between
        // checking it and parking.
        for mailbox in &self.mailboxes {
            let _queue = lock(&mailbox.queue);
            mailbox.arrived.notify_all();
        }
        let _table = lock(&self.collectives);
        self.progress.notify_all();
    }

    pub(crate) fn check_aborted(&self) -> Result<()> {
        if !self.aborted.load(Ordering::SeqCst) {
            return Ok(());
        }
        let reason = lock(&self.abort_reason)
            .clone()
            .unwrap_or_else(|| "unknown cause".to_string());
        Err(Error::Aborted(reason))
    }

    /// Park on `signal` until `ready` returns true, the universe aborts, or
    /// the configured timeout elapses.
    fn wait_until<'a, T>(
        &self,
        signal: &Condvar,
        mut guard: MutexGuard<'a, T>,
        operation: &'static str,
        mut ready: impl FnMut(&mut T) -> Result<bool>,
    ) -> Result<MutexGuard<'a, T>> {
        let deadline = self.timeout.map(|timeout| (Instant::now() + timeout, timeout));
        loop {
            self.check_aborted()?;
            if ready(&mut guard)? {
                return Ok(guard);
            }
            guard = match deadline {
                None => signal.wait(guard).unwrap_or_else(PoisonError::into_inner),
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout { operation, timeout });
                    }
                    signal
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    // ========================================================================
    // Point-to-point
    // ========================================================================

    pub(crate) fn deliver(&self, dest: i32, envelope: Envelope) {
        let mailbox = &self.mailboxes[dest as usize];
        debug!(
            source = envelope.source,
            dest,
            tag = envelope.tag,
            bytes = envelope.payload.len(),
            "delivered"
        );
        lock(&mailbox.queue).push_back(envelope);
        mailbox.arrived.notify_all();
    }

    pub(crate) fn iprobe(&self, rank: i32, source: i32, tag: i32) -> Result<Option<Status>> {
        self.check_aborted()?;
        let queue = lock(&self.mailboxes[rank as usize].queue);
        Ok(queue
            .iter()
            .find(|envelope| envelope.matches(source, tag))
            .map(Envelope::status))
    }

    pub(crate) fn probe(&self, rank: i32, source: i32, tag: i32) -> Result<Status> {
        let mailbox = &self.mailboxes[rank as usize];
        let mut found = None;
        let _queue = self.wait_until(&mailbox.arrived, lock(&mailbox.queue), "probe", |queue| {
            found = queue
                .iter()
                .find(|envelope| envelope.matches(source, tag))
                .map(Envelope::status);
            Ok(found.is_some())
        })?;
        found.ok_or_else(|| Error::Internal("probe woke without a match".into()))
    }

    /// Remove the first message matching `(source, tag)` and copy it into `buf`.
    ///
    /// A message larger than `buf` is left queued and reported as truncated.
    pub(crate) fn recv(&self, rank: i32, buf: &mut [u8], source: i32, tag: i32) -> Result<Status> {
        let mailbox = &self.mailboxes[rank as usize];
        let mut position = None;
        let mut queue =
            self.wait_until(&mailbox.arrived, lock(&mailbox.queue), "recv", |queue| {
                position = queue.iter().position(|envelope| envelope.matches(source, tag));
                Ok(position.is_some())
            })?;
        let index = position.ok_or_else(|| Error::Internal("recv woke without a match".into()))?;

        let count = queue[index].payload.len();
        if count > buf.len() {
            return Err(Error::Truncated {
                count,
                capacity: buf.len(),
            });
        }
        let envelope = queue
            .remove(index)
            .ok_or_else(|| Error::Internal("matched message vanished".into()))?;
        buf[..count].copy_from_slice(&envelope.payload);
        Ok(envelope.status())
    }

    // ========================================================================
    // Collectives
    // ========================================================================

    fn join<'t>(
        table: &'t mut HashMap<u64, Slot>,
        sequence: u64,
        signature: Signature,
    ) -> Result<&'t mut Slot> {
        let slot = table.entry(sequence).or_insert_with(|| Slot {
            signature,
            arrivals: 0,
            departures: 0,
            payload: None,
        });
        if slot.signature != signature {
            return Err(Error::CollectiveMismatch {
                sequence,
                expected: slot.signature.to_string(),
                actual: signature.to_string(),
            });
        }
        slot.arrivals += 1;
        Ok(slot)
    }

    fn depart(&self, table: &mut HashMap<u64, Slot>, sequence: u64) {
        if let Some(slot) = table.get_mut(&sequence) {
            slot.departures += 1;
            if slot.departures == self.size {
                table.remove(&sequence);
            }
        }
    }

    fn arrivals(table: &HashMap<u64, Slot>, sequence: u64) -> Result<i32> {
        table
            .get(&sequence)
            .map(|slot| slot.arrivals)
            .ok_or_else(|| Error::Internal(format!("collective {sequence} disappeared")))
    }

    pub(crate) fn barrier(&self, sequence: u64) -> Result<()> {
        let mut table = lock(&self.collectives);
        Self::join(&mut table, sequence, Signature::barrier())?;
        self.progress.notify_all();

        let size = self.size;
        let mut table = self.wait_until(&self.progress, table, "barrier", |table| {
            Ok(Self::arrivals(table, sequence)? == size)
        })?;
        self.depart(&mut table, sequence);
        Ok(())
    }

    pub(crate) fn broadcast<T: Datatype>(
        &self,
        sequence: u64,
        rank: i32,
        data: &mut [T],
        root: i32,
    ) -> Result<()> {
        let signature = Signature::of::<T>(CollectiveKind::Broadcast, root, data.len());
        let mut table = lock(&self.collectives);
        let slot = Self::join(&mut table, sequence, signature)?;

        if rank == root {
            slot.payload = Some(Box::new(data.to_vec()));
            self.progress.notify_all();
            self.depart(&mut table, sequence);
            return Ok(());
        }

        let mut table = self.wait_until(&self.progress, table, "broadcast", |table| {
            Ok(table
                .get(&sequence)
                .is_some_and(|slot| slot.payload.is_some()))
        })?;
        let payload = table
            .get(&sequence)
            .and_then(|slot| slot.payload.as_ref())
            .and_then(|payload| payload.downcast_ref::<Vec<T>>())
            .ok_or_else(|| Error::Internal(format!("broadcast {sequence} lost its payload")))?;
        data.copy_from_slice(payload);
        self.depart(&mut table, sequence);
        Ok(())
    }

    /// Fold `send` into the collective's accumulator; the root additionally
    /// waits for every contribution and receives the result in `recv`.
    pub(crate) fn reduce<T: Datatype>(
        &self,
        sequence: u64,
        rank: i32,
        send: &[T],
        recv: Option<&mut [T]>,
        op: ReduceOp,
        root: i32,
    ) -> Result<()> {
        let signature = Signature::of::<T>(CollectiveKind::Reduce(op), root, send.len());
        let mut table = lock(&self.collectives);
        let slot = Self::join(&mut table, sequence, signature)?;

        if let Some(payload) = slot.payload.as_mut() {
            let acc = payload.downcast_mut::<Vec<T>>().ok_or_else(|| {
                Error::Internal(format!("reduce {sequence} holds a foreign payload"))
            })?;
            for (acc, value) in acc.iter_mut().zip(send) {
                *acc = acc.combine(*value, op);
            }
        } else {
            slot.payload = Some(Box::new(send.to_vec()));
        }
        self.progress.notify_all();

        if rank != root {
            return Ok(());
        }

        let size = self.size;
        let mut table = self.wait_until(&self.progress, table, "reduce", |table| {
            Ok(Self::arrivals(table, sequence)? == size)
        })?;
        let result = table
            .remove(&sequence)
            .and_then(|slot| slot.payload)
            .and_then(|payload| payload.downcast::<Vec<T>>().ok())
            .ok_or_else(|| Error::Internal(format!("reduce {sequence} lost its payload")))?;
        if let Some(recv) = recv {
            recv.copy_from_slice(&result);
        }
        Ok(())
    }
}
