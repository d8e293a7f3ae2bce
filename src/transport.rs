//! Block channel collaborator interface
//!
//! The channel moves one fixed-size block in each direction per transaction,
//! whatever the size of the frame inside it. The bridge side is the passive
//! end: it arms a transaction and waits, up to a timeout, for the peer to
//! clock it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::link::MAX_FRAME_LEN;

/// Bytes moved in each direction by one transaction
pub const TRANSACTION_LEN: usize = MAX_FRAME_LEN;

/// Transaction failures, one variant per distinguishable driver outcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transaction timed out")]
    TimedOut,

    #[error("Invalid transaction argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory setting up transaction")]
    OutOfMemory,

    #[error("Transaction failed: {0}")]
    Other(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::TimedOut,
            ErrorKind::InvalidInput => TransportError::InvalidArgument(e.to_string()),
            ErrorKind::OutOfMemory => TransportError::OutOfMemory,
            _ => TransportError::Other(e.to_string()),
        }
    }
}

/// Polled full-duplex block channel
#[async_trait]
pub trait Transport: Send {
    /// Run one transaction.
    ///
    /// `tx` is the block to clock out, or `None` to send nothing meaningful.
    /// `rx` receives exactly the block clocked in by the peer and must be at
    /// least [`TRANSACTION_LEN`] bytes.
    async fn exchange(
        &mut self,
        tx: Option<&[u8]>,
        rx: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// Check the buffers handed to [`Transport::exchange`]
pub fn validate_buffers(tx: Option<&[u8]>, rx: &[u8]) -> Result<(), TransportError> {
    if rx.len() < TRANSACTION_LEN {
        return Err(TransportError::InvalidArgument(format!(
            "receive buffer {} bytes, need {}",
            rx.len(),
            TRANSACTION_LEN
        )));
    }
    if let Some(tx) = tx {
        if tx.len() > TRANSACTION_LEN {
            return Err(TransportError::InvalidArgument(format!(
                "transmit block {} bytes, max {}",
                tx.len(),
                TRANSACTION_LEN
            )));
        }
    }
    Ok(())
}

/// Host emulation of the block channel over TCP
///
/// The bridge listens and the peer (the channel master) connects. Each
/// transaction is one block written by the master followed by one block
/// written back by the bridge. A transaction that times out or fails drops
/// the connection, since a partial block would desynchronise the stream; the
/// next transaction waits for the master to reconnect.
pub struct TcpTransport {
    listener: TcpListener,
    stream: Option<TcpStream>,
    block: Vec<u8>,
}

impl TcpTransport {
    pub async fn listen(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Block channel listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            stream: None,
            block: vec![0u8; TRANSACTION_LEN],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn transact(&mut self, rx: &mut [u8]) -> std::io::Result<()> {
        if self.stream.is_none() {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            log::info!("Block channel master connected from {}", peer);
            self.stream = Some(stream);
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "no channel master"))?;
        stream.read_exact(&mut rx[..TRANSACTION_LEN]).await?;
        stream.write_all(&self.block).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(
        &mut self,
        tx: Option<&[u8]>,
        rx: &mut [u8],
        limit: Duration,
    ) -> Result<(), TransportError> {
        validate_buffers(tx, rx)?;

        self.block.fill(0);
        if let Some(tx) = tx {
            self.block[..tx.len()].copy_from_slice(tx);
        }

        let result = match timeout(limit, self.transact(rx)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => TransportError::from(e),
            Err(_) => TransportError::TimedOut,
        };

        if self.stream.take().is_some() {
            log::debug!("Dropping block channel connection after {}", result);
        }
        Err(result)
    }
}
