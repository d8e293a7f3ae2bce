//! Mock collaborators for unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::{FrameKind, MacAddress};
use crate::radio::{CaptureSink, PromiscuousFilter, RadioInterface};
use crate::transport::{validate_buffers, Transport, TransportError};
use crate::{BridgeError, Result};

/// Radio that records injections and lets tests push captured frames
pub struct MockRadio {
    mac: MacAddress,
    mac_queries: AtomicUsize,
    injected: Mutex<Vec<Vec<u8>>>,
    sink: Mutex<Option<Arc<dyn CaptureSink>>>,
    fail_inject: AtomicBool,
    fail_mac: AtomicBool,
}

impl MockRadio {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            mac_queries: AtomicUsize::new(0),
            injected: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            fail_inject: AtomicBool::new(false),
            fail_mac: AtomicBool::new(false),
        }
    }

    pub fn mac_queries(&self) -> usize {
        self.mac_queries.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> Vec<Vec<u8>> {
        self.injected.lock().unwrap().clone()
    }

    pub fn set_fail_inject(&self, fail: bool) {
        self.fail_inject.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_mac(&self, fail: bool) {
        self.fail_mac.store(fail, Ordering::SeqCst);
    }

    /// Hand a frame to the registered sink as the capture context would
    pub fn deliver(&self, frame: &[u8], kind: FrameKind) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_frame(frame, kind);
        }
    }
}

#[async_trait]
impl RadioInterface for MockRadio {
    fn mac_address(&self) -> Result<MacAddress> {
        self.mac_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_mac.load(Ordering::SeqCst) {
            return Err(BridgeError::Radio("interface not up".to_string()));
        }
        Ok(self.mac)
    }

    async fn inject(&self, frame: &[u8]) -> Result<()> {
        if self.fail_inject.load(Ordering::SeqCst) {
            return Err(BridgeError::Radio("injection refused".to_string()));
        }
        self.injected.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn start_capture(&self, sink: Arc<dyn CaptureSink>, _filter: PromiscuousFilter) -> Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        self.sink.lock().unwrap().take();
        Ok(())
    }
}

/// Transport replaying scripted transaction outcomes
///
/// Each exchange pops one script entry: `Ok(block)` copies `block` into the
/// receive buffer, `Err(e)` fails the exchange. An exhausted script behaves
/// like an idle peer clocking out zeros. Every exchange's transmit side is
/// recorded.
#[derive(Default)]
pub struct MockTransport {
    script: VecDeque<std::result::Result<Vec<u8>, TransportError>>,
    sent: Arc<Mutex<Vec<Option<Vec<u8>>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rx(&mut self, block: Vec<u8>) -> &mut Self {
        self.script.push_back(Ok(block));
        self
    }

    pub fn push_error(&mut self, error: TransportError) -> &mut Self {
        self.script.push_back(Err(error));
        self
    }

    /// Shared view of the transmit log, usable after the transport is moved
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Option<Vec<u8>>>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exchange(
        &mut self,
        tx: Option<&[u8]>,
        rx: &mut [u8],
        _timeout: Duration,
    ) -> std::result::Result<(), TransportError> {
        validate_buffers(tx, rx)?;
        self.sent.lock().unwrap().push(tx.map(|t| t.to_vec()));

        match self.script.pop_front() {
            Some(Ok(block)) => {
                rx[..block.len()].copy_from_slice(&block);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }
}
