//! Radio collaborator interface
//!
//! The bridge needs three things from the radio: the local interface address,
//! a way to put frames back on the air, and a capture callback. Association,
//! authentication and the promiscuous-mode driver setup stay behind this
//! trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::frame::{FrameKind, MacAddress};
use crate::{BridgeError, Result};

/// Receiver of captured frames
///
/// Called from the capture context for every frame that passes the
/// promiscuous filter. Implementations must not block or await.
pub trait CaptureSink: Send + Sync {
    fn on_frame(&self, frame: &[u8], kind: FrameKind);
}

/// Radio backend used by the bridge
#[async_trait]
pub trait RadioInterface: Send + Sync {
    /// Hardware address of the station interface
    fn mac_address(&self) -> Result<MacAddress>;

    /// Transmit a raw 802.11 frame
    async fn inject(&self, frame: &[u8]) -> Result<()>;

    /// Enable promiscuous capture and deliver frames to `sink`
    async fn start_capture(&self, sink: Arc<dyn CaptureSink>, filter: PromiscuousFilter) -> Result<()>;

    /// Disable promiscuous capture
    async fn stop_capture(&self) -> Result<()>;
}

/// Own interface address, fetched from the radio on first use and cached
///
/// Concurrent first callers may both query the radio; they read the same
/// value and only one write wins. Later reads do not lock.
pub struct OwnAddress {
    cell: OnceLock<MacAddress>,
    radio: Arc<dyn RadioInterface>,
    failures: AtomicU64,
}

impl OwnAddress {
    pub fn new(radio: Arc<dyn RadioInterface>) -> Self {
        Self {
            cell: OnceLock::new(),
            radio,
            failures: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Result<MacAddress> {
        if let Some(addr) = self.cell.get() {
            return Ok(*addr);
        }
        let fetched = self.radio.mac_address()?;
        let addr = *self.cell.get_or_init(|| fetched);
        log::info!("Own interface address: {}", addr);
        Ok(addr)
    }

    /// True when `addr` is this interface's address. False if the radio
    /// cannot report one yet; only the first such failure is logged at warn.
    pub fn matches(&self, addr: &MacAddress) -> bool {
        match self.get() {
            Ok(own) => own == *addr,
            Err(e) => {
                if self.failures.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!("Own address unavailable: {}", e);
                } else {
                    log::debug!("Own address still unavailable: {}", e);
                }
                false
            }
        }
    }

    /// Failed address lookups so far
    pub fn lookup_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn is_cached(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for OwnAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnAddress").field("cached", &self.cell.get()).finish()
    }
}

/// Frame kinds the capture backend passes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiscuousFilter {
    pub management: bool,
    pub control: bool,
    pub data: bool,
    pub misc: bool,
}

impl PromiscuousFilter {
    pub const ALL: PromiscuousFilter = PromiscuousFilter {
        management: true,
        control: true,
        data: true,
        misc: true,
    };

    pub fn accepts(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Management => self.management,
            FrameKind::Control => self.control,
            FrameKind::Data => self.data,
            FrameKind::Misc => self.misc,
        }
    }

    /// Names of the enabled frame kinds
    pub fn describe(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.management {
            kinds.push("management");
        }
        if self.control {
            kinds.push("control");
        }
        if self.data {
            kinds.push("data");
        }
        if self.misc {
            kinds.push("misc");
        }
        kinds
    }
}

impl Default for PromiscuousFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Largest datagram accepted on the capture feed (kind tag + frame)
const CAPTURE_DATAGRAM_MAX: usize = 2048;

/// Host-side radio backend speaking UDP
///
/// Captured frames arrive as datagrams of `[kind][802.11 frame...]`, where
/// `kind` is the raw [`FrameKind`] tag. Injected frames are sent as bare
/// datagrams to `inject_peer`.
pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    inject_peer: Option<SocketAddr>,
    mac: MacAddress,
    capture_task: Mutex<Option<JoinHandle<()>>>,
    captured: Arc<AtomicU64>,
    injected: AtomicU64,
}

impl UdpRadio {
    pub async fn bind(bind: SocketAddr, inject_peer: Option<SocketAddr>, mac: MacAddress) -> Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        log::info!("UDP radio listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            inject_peer,
            mac,
            capture_task: Mutex::new(None),
            captured: Arc::new(AtomicU64::new(0)),
            injected: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Frames delivered to the capture sink so far
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Frames sent to the injection peer so far
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    async fn run_capture(
        socket: Arc<UdpSocket>,
        sink: Arc<dyn CaptureSink>,
        filter: PromiscuousFilter,
        captured: Arc<AtomicU64>,
    ) {
        let mut buf = vec![0u8; CAPTURE_DATAGRAM_MAX];

        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    log::error!("Capture socket receive failed: {}", e);
                    break;
                }
            };

            let Some((&tag, frame)) = buf[..len].split_first() else {
                continue;
            };
            let Some(kind) = FrameKind::from_raw(tag) else {
                log::debug!("Unknown capture kind {} from {}", tag, source);
                continue;
            };
            if !filter.accepts(kind) {
                continue;
            }

            captured.fetch_add(1, Ordering::Relaxed);
            sink.on_frame(frame, kind);
        }

        log::warn!("Capture task exiting");
    }
}

#[async_trait]
impl RadioInterface for UdpRadio {
    fn mac_address(&self) -> Result<MacAddress> {
        Ok(self.mac)
    }

    async fn inject(&self, frame: &[u8]) -> Result<()> {
        let peer = self
            .inject_peer
            .ok_or_else(|| BridgeError::Radio("No injection peer configured".to_string()))?;
        self.socket.send_to(frame, peer).await?;
        self.injected.fetch_add(1, Ordering::Relaxed);
        log::trace!("Injected {} byte frame to {}", frame.len(), peer);
        Ok(())
    }

    async fn start_capture(&self, sink: Arc<dyn CaptureSink>, filter: PromiscuousFilter) -> Result<()> {
        let mut task = self.capture_task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() {
            return Err(BridgeError::Radio("Capture already running".to_string()));
        }

        log::info!("Promiscuous filter: {}", filter.describe().join(", "));

        let socket = Arc::clone(&self.socket);
        let captured = Arc::clone(&self.captured);
        *task = Some(tokio::spawn(Self::run_capture(socket, sink, filter, captured)));
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        let task = self.capture_task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = task {
            handle.abort();
            log::info!("Capture stopped");
        }
        Ok(())
    }
}
