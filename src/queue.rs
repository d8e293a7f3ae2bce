//! Bounded frame queues shared between the capture context and the bridge loop
//!
//! A queue is a fixed ring of fixed-size slots behind a mutex. Producers never
//! wait for space: when the ring is full the new frame is dropped and counted.
//! Consumers never wait for data: an empty ring simply means nothing to do.
//!
//! All access goes through [`QueueGuard`], so a caller can make a sequence of
//! operations atomic (for example dequeue and copy out) and the lock is
//! released on every exit path when the guard drops.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::{DEFAULT_QUEUE_CAPACITY, MAX_PAYLOAD_LEN};

/// Queue operation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,

    #[error("Queue is empty")]
    Empty,

    #[error("Frame too large for a queue slot: {size} bytes (max: {max})")]
    Oversized { size: usize, max: usize },

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// One queue slot: a fixed buffer and the number of bytes in use
#[derive(Clone)]
pub struct QueueEntry {
    buf: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl QueueEntry {
    fn empty() -> Self {
        Self {
            buf: [0u8; MAX_PAYLOAD_LEN],
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry").field("len", &self.len).finish()
    }
}

/// Ring state; only reachable through a held [`QueueGuard`]
struct Ring {
    slots: Box<[QueueEntry]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![QueueEntry::empty(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.len = 0;
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

/// Queue counters
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Frames accepted
    pub enqueued: u64,
    /// Frames handed to a consumer
    pub dequeued: u64,
    /// Frames refused because the ring was full
    pub dropped: u64,
    /// Frames currently queued
    pub depth: usize,
    /// Ring capacity
    pub capacity: usize,
}

/// Fixed-capacity, non-blocking FIFO of frame buffers
pub struct FrameQueue {
    name: &'static str,
    ring: Mutex<Ring>,
    capacity: usize,
    counters: Counters,
}

impl FrameQueue {
    /// Create a queue with `capacity` slots of `MAX_PAYLOAD_LEN` bytes
    pub fn new(name: &'static str, capacity: usize) -> Self {
        assert!(capacity > 0, "frame queue capacity must be non-zero");
        Self {
            name,
            ring: Mutex::new(Ring::new(capacity)),
            capacity,
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enter the critical section
    ///
    /// The ring is left consistent after every individual operation, so a
    /// panic in another holder cannot leave it half-updated; poisoning is
    /// ignored rather than propagated into the capture context.
    pub fn lock(&self) -> QueueGuard<'_> {
        let ring = self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        QueueGuard { queue: self, ring }
    }

    /// Lock, enqueue one frame, unlock
    pub fn try_enqueue(&self, frame: &[u8]) -> Result<(), QueueError> {
        self.lock().enqueue(frame)
    }

    /// Lock, dequeue one frame into `out`, unlock. Returns the frame length.
    ///
    /// A head frame that does not fit in `out` stays queued.
    pub fn dequeue_into(&self, out: &mut [u8]) -> Result<usize, QueueError> {
        let mut guard = self.lock();
        let len = guard.peek().map(QueueEntry::len).ok_or(QueueError::Empty)?;
        if out.len() < len {
            return Err(QueueError::BufferTooSmall {
                needed: len,
                available: out.len(),
            });
        }

        let entry = guard.dequeue()?;
        out[..len].copy_from_slice(entry.as_bytes());
        Ok(len)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop everything queued and rewind the ring
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dequeued: self.counters.dequeued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            depth: self.len(),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Held critical section of a [`FrameQueue`]
pub struct QueueGuard<'a> {
    queue: &'a FrameQueue,
    ring: MutexGuard<'a, Ring>,
}

impl<'a> QueueGuard<'a> {
    /// Copy `frame` into the tail slot. Fails immediately when full.
    pub fn enqueue(&mut self, frame: &[u8]) -> Result<(), QueueError> {
        if frame.len() > MAX_PAYLOAD_LEN {
            return Err(QueueError::Oversized {
                size: frame.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        if self.ring.count >= self.ring.capacity() {
            self.queue.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("{} queue full, count={}", self.queue.name, self.ring.count);
            return Err(QueueError::Full);
        }

        let ring = &mut *self.ring;
        let slot = &mut ring.slots[ring.tail];
        slot.buf[..frame.len()].copy_from_slice(frame);
        slot.len = frame.len();
        ring.tail = (ring.tail + 1) % ring.slots.len();
        ring.count += 1;

        self.queue.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Take the head entry.
    ///
    /// The returned view borrows the guard, so it cannot outlive the critical
    /// section nor survive a later enqueue into the same slot.
    pub fn dequeue(&mut self) -> Result<&QueueEntry, QueueError> {
        if self.ring.count == 0 {
            return Err(QueueError::Empty);
        }

        let ring = &mut *self.ring;
        let index = ring.head;
        ring.head = (ring.head + 1) % ring.slots.len();
        ring.count -= 1;

        self.queue.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        Ok(&ring.slots[index])
    }

    /// Head entry without removing it
    pub fn peek(&self) -> Option<&QueueEntry> {
        if self.ring.count == 0 {
            None
        } else {
            Some(&self.ring.slots[self.ring.head])
        }
    }

    pub fn len(&self) -> usize {
        self.ring.count
    }

    pub fn is_empty(&self) -> bool {
        self.ring.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.ring.count >= self.ring.capacity()
    }

    pub fn clear(&mut self) {
        self.ring.reset();
    }

    #[cfg(test)]
    fn indices(&self) -> (usize, usize, usize) {
        (self.ring.head, self.ring.tail, self.ring.count)
    }
}

/// The two directions of the bridge
///
/// `outbound` carries captured radio frames towards the block channel and is
/// drained by the bridge loop. `inbound` is the mirror path from the channel
/// to the radio; it is fully usable but the default loop injects received
/// frames directly and does not route them through it.
#[derive(Debug)]
pub struct QueuePair {
    pub outbound: FrameQueue,
    pub inbound: FrameQueue,
}

impl QueuePair {
    pub fn new(capacity: usize) -> Self {
        Self {
            outbound: FrameQueue::new("outbound", capacity),
            inbound: FrameQueue::new("inbound", capacity),
        }
    }

    /// Empty both rings, each under its own lock
    pub fn clear(&self) {
        self.outbound.clear();
        self.inbound.clear();
    }
}

impl Default for QueuePair {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn frame(tag: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| tag.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new("test", 4);
        let frames: Vec<Vec<u8>> = (0..4).map(|i| frame(i * 10, 5 + i as usize)).collect();

        {
            let mut guard = queue.lock();
            for f in &frames {
                guard.enqueue(f).unwrap();
            }
        }

        let mut guard = queue.lock();
        for f in &frames {
            assert_eq!(guard.dequeue().unwrap().as_bytes(), &f[..]);
        }
        assert_eq!(guard.dequeue().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn test_full_queue_drops_new_frame() {
        let queue = FrameQueue::new("test", 3);
        for i in 0..3 {
            queue.try_enqueue(&frame(i, 8)).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.try_enqueue(&frame(99, 8)), Err(QueueError::Full));

        let mut out = [0u8; MAX_PAYLOAD_LEN];
        for i in 0..3 {
            let len = queue.dequeue_into(&mut out).unwrap();
            assert_eq!(&out[..len], &frame(i, 8)[..]);
        }

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dequeued, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.depth, 0);
    }

    #[test]
    fn test_index_invariants_across_wraparound() {
        let queue = FrameQueue::new("test", 3);
        let mut guard = queue.lock();

        for round in 0..10u8 {
            guard.enqueue(&[round]).unwrap();
            guard.enqueue(&[round, round]).unwrap();
            assert_eq!(guard.dequeue().unwrap().as_bytes(), &[round]);

            let (head, tail, count) = guard.indices();
            assert!(head < 3 && tail < 3 && count <= 3);
            assert_eq!(tail, (head + count) % 3);

            assert_eq!(guard.dequeue().unwrap().as_bytes(), &[round, round]);
        }
        assert!(guard.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let queue = FrameQueue::new("test", 2);
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            queue.try_enqueue(&big),
            Err(QueueError::Oversized { size: MAX_PAYLOAD_LEN + 1, max: MAX_PAYLOAD_LEN })
        );
        assert!(queue.is_empty());
        assert_eq!(queue.stats().dropped, 0);

        queue.try_enqueue(&vec![0xab; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dequeue_into_short_buffer_keeps_frame() {
        let queue = FrameQueue::new("test", 2);
        queue.try_enqueue(&[1, 2, 3, 4]).unwrap();

        let mut small = [0u8; 2];
        assert_eq!(
            queue.dequeue_into(&mut small),
            Err(QueueError::BufferTooSmall { needed: 4, available: 2 })
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().dequeued, 0);

        let mut out = [0u8; 4];
        assert_eq!(queue.dequeue_into(&mut out), Ok(4));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(queue.dequeue_into(&mut out), Err(QueueError::Empty));
    }

    #[test]
    fn test_entry_is_a_copy() {
        let queue = FrameQueue::new("test", 2);
        let mut source = vec![1u8, 2, 3];
        queue.try_enqueue(&source).unwrap();
        source[0] = 42;

        let mut guard = queue.lock();
        assert_eq!(guard.peek().unwrap().as_bytes(), &[1, 2, 3]);
        assert_eq!(guard.dequeue().unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_clear_pair() {
        let pair = QueuePair::new(2);
        pair.outbound.try_enqueue(&[1]).unwrap();
        pair.inbound.try_enqueue(&[2]).unwrap();

        pair.clear();
        assert!(pair.outbound.is_empty());
        assert!(pair.inbound.is_empty());

        // Rewound ring keeps working
        pair.outbound.try_enqueue(&[3]).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(pair.outbound.dequeue_into(&mut out), Ok(1));
        assert_eq!(out[0], 3);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue = Arc::new(FrameQueue::new("test", 4));
        let producer_queue = Arc::clone(&queue);

        let producer = thread::spawn(move || {
            let mut accepted = Vec::new();
            for i in 0..200u16 {
                let bytes = i.to_le_bytes();
                if producer_queue.try_enqueue(&bytes).is_ok() {
                    accepted.push(i);
                }
            }
            accepted
        });

        let mut received = Vec::new();
        let mut out = [0u8; MAX_PAYLOAD_LEN];
        loop {
            match queue.dequeue_into(&mut out) {
                Ok(len) => {
                    assert_eq!(len, 2);
                    received.push(u16::from_le_bytes([out[0], out[1]]));
                }
                Err(QueueError::Empty) if producer.is_finished() => {
                    if queue.is_empty() {
                        break;
                    }
                }
                Err(_) => thread::yield_now(),
            }
        }

        let accepted = producer.join().unwrap();
        assert_eq!(received, accepted);
        let stats = queue.stats();
        assert_eq!(stats.enqueued + stats.dropped, 200);
    }
}
