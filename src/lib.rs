//! # radiolink-bridge
//!
//! Bridge between a radio capturing IEEE 802.11 frames in promiscuous mode and
//! a fixed-size, polled block channel (an SPI-style full-duplex link).
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `frame`: captured 802.11 frame views and MAC address helpers
//! - `link`: byte-oriented link framing codec used on the block channel
//! - `queue`: bounded, lock-guarded frame queues shared between contexts
//! - `classifier`: capture-side filtering that decides what gets relayed
//! - `radio`: radio collaborator interface, own-address cache and host backend
//! - `transport`: block channel collaborator interface and host backend
//! - `bridge`: the polling loop tying capture to transport
//! - `config`: configuration loading and validation

pub mod bridge;
pub mod classifier;
pub mod config;
pub mod frame;
pub mod link;
pub mod queue;
pub mod radio;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::{
    bridge::{BridgeLoop, BridgeMonitor, BridgeSettings, BridgeStats, ControlCommand, InboundAction},
    classifier::{Classifier, ClassifierStats, Verdict},
    config::BridgeConfig,
    frame::{CapturedFrame, FrameKind, MacAddress},
    link::{DecodeError, LinkEncoder, LinkError},
    queue::{FrameQueue, QueueEntry, QueueError, QueuePair, QueueStats},
    radio::{CaptureSink, OwnAddress, RadioInterface},
    transport::{Transport, TransportError},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link framing error: {0}")]
    Link(#[from] LinkError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Radio error: {0}")]
    Radio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest payload carried by a single link frame (and stored per queue slot)
pub const MAX_PAYLOAD_LEN: usize = 512;

/// Number of slots in each frame queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
