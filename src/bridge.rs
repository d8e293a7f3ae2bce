//! Bridge loop
//!
//! A single task drives the block channel. Each iteration arms one
//! transaction carrying the frame prepared on the previous iteration, acts on
//! whatever the peer clocked in, then prepares the next outbound frame from
//! the queue. Outbound data therefore lags the queue by one transaction.
//!
//! Nothing here is fatal: malformed blocks, transport failures and injection
//! errors are logged and counted, and the loop carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::link::{self, DecodeError, LinkEncoder};
use crate::queue::QueuePair;
use crate::radio::RadioInterface;
use crate::transport::{Transport, TransportError, TRANSACTION_LEN};
use crate::MAX_PAYLOAD_LEN;

/// Inbound payload length reserved for hardware control commands
pub const COMMAND_LEN: usize = 2;

/// Loop timing and thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Upper bound on one transaction
    pub exchange_timeout: Duration,
    /// Pause between transactions
    pub poll_interval: Duration,
    /// Inbound payloads longer than this are radio frames (a bare MAC header)
    pub inject_threshold: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1),
            inject_threshold: crate::frame::MAC_HEADER_LEN,
        }
    }
}

/// Two-byte hardware control message from the channel peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub opcode: u8,
    pub argument: u8,
}

impl ControlCommand {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            &[opcode, argument] => Some(Self { opcode, argument }),
            _ => None,
        }
    }
}

/// What a received block asks the bridge to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    /// Inject the payload of this length onto the radio
    Inject(usize),
    /// Hardware control command; accepted and not acted on
    Command(ControlCommand),
    /// Valid frame with nothing to process
    Nothing,
}

impl InboundAction {
    /// Decode a received block and decide what it means
    pub fn from_block(block: &[u8], inject_threshold: usize) -> Result<Self, DecodeError> {
        let len = link::decode(block)?;

        if len > inject_threshold {
            return Ok(InboundAction::Inject(len));
        }
        if len == COMMAND_LEN {
            if let Some(command) = link::payload(block, len).and_then(ControlCommand::parse) {
                return Ok(InboundAction::Command(command));
            }
        }
        Ok(InboundAction::Nothing)
    }
}

#[derive(Debug, Default)]
struct Counters {
    exchanges: AtomicU64,
    timeouts: AtomicU64,
    invalid_argument: AtomicU64,
    out_of_memory: AtomicU64,
    transport_other: AtomicU64,
    rx_frames: AtomicU64,
    rx_idle: AtomicU64,
    rx_invalid: AtomicU64,
    injected: AtomicU64,
    inject_errors: AtomicU64,
    commands: AtomicU64,
    tx_frames: AtomicU64,
    encode_errors: AtomicU64,
}

/// Bridge loop statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub started_at: DateTime<Utc>,
    /// Successful transactions
    pub exchanges: u64,
    pub timeouts: u64,
    pub invalid_argument: u64,
    pub out_of_memory: u64,
    pub transport_other: u64,
    /// Valid frames received
    pub rx_frames: u64,
    /// Blocks that did not start like a frame (idle peer)
    pub rx_idle: u64,
    /// Blocks that started like a frame but failed validation
    pub rx_invalid: u64,
    pub injected: u64,
    pub inject_errors: u64,
    pub commands: u64,
    /// Frames prepared for transmission
    pub tx_frames: u64,
    pub encode_errors: u64,
}

/// Read-only handle on a running loop's counters
#[derive(Debug, Clone)]
pub struct BridgeMonitor {
    counters: Arc<Counters>,
    started_at: DateTime<Utc>,
}

impl BridgeMonitor {
    pub fn stats(&self) -> BridgeStats {
        let c = &self.counters;
        BridgeStats {
            started_at: self.started_at,
            exchanges: c.exchanges.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            invalid_argument: c.invalid_argument.load(Ordering::Relaxed),
            out_of_memory: c.out_of_memory.load(Ordering::Relaxed),
            transport_other: c.transport_other.load(Ordering::Relaxed),
            rx_frames: c.rx_frames.load(Ordering::Relaxed),
            rx_idle: c.rx_idle.load(Ordering::Relaxed),
            rx_invalid: c.rx_invalid.load(Ordering::Relaxed),
            injected: c.injected.load(Ordering::Relaxed),
            inject_errors: c.inject_errors.load(Ordering::Relaxed),
            commands: c.commands.load(Ordering::Relaxed),
            tx_frames: c.tx_frames.load(Ordering::Relaxed),
            encode_errors: c.encode_errors.load(Ordering::Relaxed),
        }
    }
}

/// The polling loop between the outbound queue, the radio and the channel
pub struct BridgeLoop<T: Transport> {
    transport: T,
    radio: Arc<dyn RadioInterface>,
    queues: Arc<QueuePair>,
    settings: BridgeSettings,
    encoder: LinkEncoder,
    rx: Vec<u8>,
    send_buf: Box<[u8; MAX_PAYLOAD_LEN]>,
    monitor: BridgeMonitor,
}

impl<T: Transport> BridgeLoop<T> {
    pub fn new(transport: T, radio: Arc<dyn RadioInterface>, queues: Arc<QueuePair>, settings: BridgeSettings) -> Self {
        Self {
            transport,
            radio,
            queues,
            settings,
            encoder: LinkEncoder::new(),
            rx: vec![0u8; TRANSACTION_LEN],
            send_buf: Box::new([0u8; MAX_PAYLOAD_LEN]),
            monitor: BridgeMonitor {
                counters: Arc::new(Counters::default()),
                started_at: Utc::now(),
            },
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn monitor(&self) -> BridgeMonitor {
        self.monitor.clone()
    }

    pub fn stats(&self) -> BridgeStats {
        self.monitor.stats()
    }

    /// Frame that the next transaction will carry, if any
    pub fn pending_tx(&self) -> Option<&[u8]> {
        if self.encoder.is_empty() {
            None
        } else {
            Some(self.encoder.frame())
        }
    }

    /// Run until `shutdown` becomes true or its sender goes away
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Bridge loop started (timeout {:?}, poll {:?})",
            self.settings.exchange_timeout,
            self.settings.poll_interval
        );

        loop {
            let stopping = *shutdown.borrow_and_update();
            if stopping {
                break;
            }
            tokio::select! {
                _ = self.step() => {}
                _ = stop_requested(&mut shutdown) => break,
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        log::info!("Bridge loop stopped");
    }

    /// One iteration: transaction, inbound handling, next outbound frame.
    ///
    /// Returns the inbound action, or `None` when the transaction failed.
    pub async fn step(&mut self) -> Option<InboundAction> {
        self.rx.fill(0);

        let tx = if self.encoder.is_empty() {
            None
        } else {
            Some(self.encoder.frame())
        };
        let result = self
            .transport
            .exchange(tx, &mut self.rx, self.settings.exchange_timeout)
            .await;

        let action = match result {
            Ok(()) => {
                self.monitor.counters.exchanges.fetch_add(1, Ordering::Relaxed);
                Some(self.handle_inbound().await)
            }
            Err(e) => {
                self.record_exchange_error(&e);
                None
            }
        };

        self.prepare_next();
        action
    }

    async fn handle_inbound(&mut self) -> InboundAction {
        let counters = &self.monitor.counters;

        let action = match InboundAction::from_block(&self.rx, self.settings.inject_threshold) {
            Ok(action) => action,
            Err(e) if e.is_idle() => {
                counters.rx_idle.fetch_add(1, Ordering::Relaxed);
                log::trace!("Idle block: {}", e);
                return InboundAction::Nothing;
            }
            Err(e) => {
                counters.rx_invalid.fetch_add(1, Ordering::Relaxed);
                log::debug!("Discarding received block: {}", e);
                return InboundAction::Nothing;
            }
        };
        counters.rx_frames.fetch_add(1, Ordering::Relaxed);

        match action {
            InboundAction::Inject(len) => {
                let Some(frame) = link::payload(&self.rx, len) else {
                    return InboundAction::Nothing;
                };
                match self.radio.inject(frame).await {
                    Ok(()) => {
                        counters.injected.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Injected {} byte frame", len);
                    }
                    Err(e) => {
                        counters.inject_errors.fetch_add(1, Ordering::Relaxed);
                        log::warn!("Frame injection failed: {}", e);
                    }
                }
            }
            InboundAction::Command(command) => {
                counters.commands.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "Control command opcode={:#04x} argument={:#04x} ignored",
                    command.opcode,
                    command.argument
                );
            }
            InboundAction::Nothing => {
                log::trace!("Received frame with nothing to process");
            }
        }
        action
    }

    fn record_exchange_error(&self, error: &TransportError) {
        let counters = &self.monitor.counters;
        match error {
            TransportError::TimedOut => {
                counters.timeouts.fetch_add(1, Ordering::Relaxed);
                log::debug!("Block channel transaction timed out");
            }
            TransportError::InvalidArgument(msg) => {
                counters.invalid_argument.fetch_add(1, Ordering::Relaxed);
                log::error!("Block channel rejected transaction arguments: {}", msg);
            }
            TransportError::OutOfMemory => {
                counters.out_of_memory.fetch_add(1, Ordering::Relaxed);
                log::error!("Block channel out of memory");
            }
            TransportError::Other(msg) => {
                counters.transport_other.fetch_add(1, Ordering::Relaxed);
                log::warn!("Block channel transaction failed: {}", msg);
            }
        }
    }

    fn prepare_next(&mut self) {
        // Copy out under the lock; encoding happens after it is released.
        let len = {
            let mut guard = self.queues.outbound.lock();
            match guard.dequeue() {
                Ok(entry) => {
                    let len = entry.len();
                    self.send_buf[..len].copy_from_slice(entry.as_bytes());
                    len
                }
                Err(_) => 0,
            }
        };

        if len == 0 {
            self.encoder.clear();
            return;
        }

        let counters = &self.monitor.counters;
        match self.encoder.encode(&self.send_buf[..len]) {
            Ok(frame_len) => {
                counters.tx_frames.fetch_add(1, Ordering::Relaxed);
                log::trace!("Prepared {} byte link frame", frame_len);
            }
            Err(e) => {
                counters.encode_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("Could not encode outbound frame: {}", e);
            }
        }
    }
}

/// Resolves once `shutdown` holds true or its sender is dropped
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}
