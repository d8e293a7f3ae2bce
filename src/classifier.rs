//! Capture-side frame classification
//!
//! Runs in the capture context for every frame the radio reports. Only two
//! kinds of traffic are relayed to the block channel:
//!
//! - Probe Responses addressed to this station or broadcast
//! - downlink data (toDS=0, fromDS=1) addressed to this station or broadcast
//!
//! Downlink multicast is noticed and logged but never relayed. Everything
//! else is ignored without side effects.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::{CapturedFrame, FrameKind, MacAddress};
use crate::queue::{QueueError, QueuePair};
use crate::radio::{CaptureSink, OwnAddress};

/// Classification outcome for one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Relay the full captured frame to the block channel
    Forward,
    /// Selected for relay but refused by the queue (full, or too large for a slot)
    Dropped,
    /// Downlink multicast: observed, not relayed
    Multicast,
    /// Not of interest
    Ignore,
}

#[derive(Debug, Default)]
struct Counters {
    seen: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    oversized: AtomicU64,
    multicast: AtomicU64,
    ignored: AtomicU64,
}

/// Snapshot of classifier counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Frames delivered by the capture context
    pub seen: u64,
    /// Frames queued for the block channel
    pub forwarded: u64,
    /// Frames selected for relay but refused by a full queue
    pub dropped: u64,
    /// Frames selected for relay but too large for a queue slot
    pub oversized: u64,
    /// Downlink multicast frames observed
    pub multicast: u64,
    /// Frames not of interest
    pub ignored: u64,
}

/// Decides which captured frames reach the outbound queue
pub struct Classifier {
    own_address: Arc<OwnAddress>,
    queues: Arc<QueuePair>,
    counters: Counters,
}

impl Classifier {
    pub fn new(own_address: Arc<OwnAddress>, queues: Arc<QueuePair>) -> Self {
        Self {
            own_address,
            queues,
            counters: Counters::default(),
        }
    }

    /// Decide what to do with a frame without touching the queue.
    ///
    /// May fetch and cache the own address on first use. Never returns
    /// [`Verdict::Dropped`]; only [`Classifier::route`] does.
    pub fn classify(&self, frame: &CapturedFrame<'_>) -> Verdict {
        match frame.kind() {
            FrameKind::Management => {
                if !frame.is_probe_response() {
                    return Verdict::Ignore;
                }
                match frame.destination() {
                    Some(dst) if self.is_for_us(&dst) => Verdict::Forward,
                    _ => Verdict::Ignore,
                }
            }
            FrameKind::Data => {
                if !frame.is_from_distribution_system() {
                    return Verdict::Ignore;
                }
                match frame.destination() {
                    Some(dst) if self.is_for_us(&dst) => Verdict::Forward,
                    Some(dst) if dst.is_multicast() => Verdict::Multicast,
                    _ => Verdict::Ignore,
                }
            }
            FrameKind::Control | FrameKind::Misc => Verdict::Ignore,
        }
    }

    /// Classify and, when selected, copy the frame into the outbound queue.
    ///
    /// Returns [`Verdict::Forward`] only if the frame was actually queued.
    pub fn route(&self, frame: &CapturedFrame<'_>) -> Verdict {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);

        match self.classify(frame) {
            Verdict::Forward => self.enqueue(frame),
            Verdict::Multicast => {
                self.counters.multicast.fetch_add(1, Ordering::Relaxed);
                log::debug!("Multicast downlink frame: {}", frame);
                Verdict::Multicast
            }
            verdict @ (Verdict::Ignore | Verdict::Dropped) => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                verdict
            }
        }
    }

    fn enqueue(&self, frame: &CapturedFrame<'_>) -> Verdict {
        let result = self.queues.outbound.lock().enqueue(frame.as_bytes());
        match result {
            Ok(()) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                Verdict::Forward
            }
            Err(QueueError::Oversized { size, .. }) => {
                self.counters.oversized.fetch_add(1, Ordering::Relaxed);
                log::debug!("Not relaying oversized {:?} frame ({} bytes)", frame.kind(), size);
                Verdict::Dropped
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Verdict::Dropped
            }
        }
    }

    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            seen: self.counters.seen.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            oversized: self.counters.oversized.load(Ordering::Relaxed),
            multicast: self.counters.multicast.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }

    fn is_for_us(&self, dst: &MacAddress) -> bool {
        dst.is_broadcast() || self.own_address.matches(dst)
    }
}

impl CaptureSink for Classifier {
    fn on_frame(&self, frame: &[u8], kind: FrameKind) {
        self.route(&CapturedFrame::new(frame, kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FLAG_FROM_DS, FLAG_TO_DS, MAC_HEADER_LEN};
    use crate::testing::MockRadio;
    use crate::MAX_PAYLOAD_LEN;

    const OWN: [u8; 6] = [0x24, 0x0a, 0xc4, 0x11, 0x22, 0x33];
    const OTHER: [u8; 6] = [0x24, 0x0a, 0xc4, 0x99, 0x88, 0x77];
    const MCAST: [u8; 6] = [0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb];

    fn setup(capacity: usize) -> (Classifier, Arc<QueuePair>) {
        let radio = Arc::new(MockRadio::new(MacAddress::new(OWN)));
        let own = Arc::new(OwnAddress::new(radio));
        let queues = Arc::new(QueuePair::new(capacity));
        (Classifier::new(own, Arc::clone(&queues)), queues)
    }

    fn build(fc: [u8; 2], dst: [u8; 6], body_len: usize) -> Vec<u8> {
        let mut data = vec![0u8; MAC_HEADER_LEN + body_len];
        data[0..2].copy_from_slice(&fc);
        data[4..10].copy_from_slice(&dst);
        data[10..16].copy_from_slice(&OTHER);
        for (i, b) in data[MAC_HEADER_LEN..].iter_mut().enumerate() {
            *b = i as u8;
        }
        data
    }

    #[test]
    fn test_probe_response_to_us_is_forwarded_whole() {
        let (classifier, queues) = setup(4);
        let frame = build([0x50, 0x00], OWN, 100);

        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Forward);

        let mut guard = queues.outbound.lock();
        let entry = guard.dequeue().unwrap();
        assert_eq!(entry.len(), frame.len());
        assert_eq!(entry.as_bytes(), &frame[..]);
    }

    #[test]
    fn test_probe_response_broadcast_forwarded() {
        let (classifier, queues) = setup(4);
        let frame = build([0x50, 0x00], [0xff; 6], 10);
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Forward);
        assert_eq!(queues.outbound.len(), 1);
    }

    #[test]
    fn test_probe_response_for_other_station_ignored() {
        let (classifier, queues) = setup(4);
        let frame = build([0x50, 0x00], OTHER, 10);
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Ignore);
        assert!(queues.outbound.is_empty());
    }

    #[test]
    fn test_other_management_subtypes_ignored() {
        let (classifier, queues) = setup(4);
        // Beacon, and a Probe Response with the retry flag set
        for fc in [[0x80, 0x00], [0x50, 0x08]] {
            let frame = build(fc, [0xff; 6], 10);
            assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Ignore);
        }
        assert!(queues.outbound.is_empty());
    }

    #[test]
    fn test_downlink_data_routing() {
        let (classifier, queues) = setup(4);

        let to_us = build([0x08, FLAG_FROM_DS], OWN, 40);
        assert_eq!(classifier.on_frame_verdict(&to_us, FrameKind::Data), Verdict::Forward);

        let bcast = build([0x08, FLAG_FROM_DS], [0xff; 6], 40);
        assert_eq!(classifier.on_frame_verdict(&bcast, FrameKind::Data), Verdict::Forward);

        let mcast = build([0x08, FLAG_FROM_DS], MCAST, 40);
        assert_eq!(classifier.on_frame_verdict(&mcast, FrameKind::Data), Verdict::Multicast);

        let other = build([0x08, FLAG_FROM_DS], OTHER, 40);
        assert_eq!(classifier.on_frame_verdict(&other, FrameKind::Data), Verdict::Ignore);

        assert_eq!(queues.outbound.len(), 2);
        let stats = classifier.stats();
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.multicast, 1);
        assert_eq!(stats.ignored, 1);
    }

    #[test]
    fn test_uplink_data_never_forwarded() {
        let (classifier, queues) = setup(4);
        for flags in [FLAG_TO_DS, FLAG_TO_DS | FLAG_FROM_DS, 0] {
            for dst in [OWN, [0xff; 6]] {
                let frame = build([0x08, flags], dst, 20);
                assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Data), Verdict::Ignore);
            }
        }
        assert!(queues.outbound.is_empty());
    }

    #[test]
    fn test_control_and_misc_ignored() {
        let (classifier, queues) = setup(4);
        let frame = build([0x50, 0x00], OWN, 10);
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Control), Verdict::Ignore);
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Misc), Verdict::Ignore);
        assert!(queues.outbound.is_empty());
    }

    #[test]
    fn test_truncated_frames_ignored() {
        let (classifier, _queues) = setup(4);
        assert_eq!(classifier.on_frame_verdict(&[0x50, 0x00, 0, 0, 0xff], FrameKind::Management), Verdict::Ignore);
        assert_eq!(classifier.on_frame_verdict(&[], FrameKind::Data), Verdict::Ignore);
    }

    #[test]
    fn test_full_queue_drops_silently() {
        let (classifier, queues) = setup(2);
        let frame = build([0x50, 0x00], OWN, 10);
        for _ in 0..2 {
            assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Forward);
        }
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Dropped);
        assert_eq!(classifier.classify(&CapturedFrame::new(&frame, FrameKind::Management)), Verdict::Forward);
        assert_eq!(queues.outbound.len(), 2);
        assert_eq!(classifier.stats().dropped, 1);
        assert_eq!(queues.outbound.stats().dropped, 1);
    }

    #[test]
    fn test_oversized_frame_not_queued() {
        let (classifier, queues) = setup(2);
        let frame = build([0x50, 0x00], OWN, MAX_PAYLOAD_LEN);
        assert_eq!(classifier.on_frame_verdict(&frame, FrameKind::Management), Verdict::Dropped);
        assert!(queues.outbound.is_empty());
        assert_eq!(classifier.stats().oversized, 1);
    }

    impl Classifier {
        fn on_frame_verdict(&self, data: &[u8], kind: FrameKind) -> Verdict {
            self.route(&CapturedFrame::new(data, kind))
        }
    }
}
