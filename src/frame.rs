//! Captured IEEE 802.11 frame views
//!
//! The capture context hands the bridge raw 802.11 MPDUs (no radiotap header)
//! tagged with the kind reported by the radio. Only the handful of header
//! fields needed for relay filtering are parsed here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BridgeError, Result};

/// Length of an IEEE 802.11 MAC address
pub const MAC_ADDR_LEN: usize = 6;

/// Offset of address 1 (receiver / destination)
pub const DESTINATION_OFFSET: usize = 4;

/// Offset of address 2 (transmitter / source)
pub const SOURCE_OFFSET: usize = 10;

/// Offset of address 3 (BSSID for most management and data frames)
pub const BSSID_OFFSET: usize = 16;

/// Length of a basic management / data MAC header
pub const MAC_HEADER_LEN: usize = 24;

/// Frame control bytes of a Probe Response (type 0, subtype 5, no flags)
pub const PROBE_RESPONSE_SIGNATURE: [u8; 2] = [0x50, 0x00];

/// To-DS bit in the frame control flags byte
pub const FLAG_TO_DS: u8 = 0x01;

/// From-DS bit in the frame control flags byte
pub const FLAG_FROM_DS: u8 = 0x02;

/// Packet kind reported by the radio for a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Management frames (beacon, probe, auth, ...)
    Management = 0,
    /// Control frames (RTS, CTS, ACK, ...)
    Control = 1,
    /// Data frames
    Data = 2,
    /// Anything else the radio could not classify
    Misc = 3,
}

impl FrameKind {
    /// Map the raw packet-type tag used on the capture feed
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Management),
            1 => Some(Self::Control),
            2 => Some(Self::Data),
            3 => Some(Self::Misc),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

/// IEEE 802.11 MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; MAC_ADDR_LEN]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; MAC_ADDR_LEN]);

    pub const fn new(octets: [u8; MAC_ADDR_LEN]) -> Self {
        Self(octets)
    }

    /// Read an address from `data` at `offset`, if the slice is long enough
    pub fn from_slice_at(data: &[u8], offset: usize) -> Option<Self> {
        let bytes = data.get(offset..offset + MAC_ADDR_LEN)?;
        let mut addr = [0u8; MAC_ADDR_LEN];
        addr.copy_from_slice(bytes);
        Some(Self(addr))
    }

    pub fn octets(&self) -> [u8; MAC_ADDR_LEN] {
        self.0
    }

    /// All-ones address
    pub fn is_broadcast(&self) -> bool {
        self.0.iter().all(|&b| b == 0xff)
    }

    /// Group bit set in the first octet (broadcast is also multicast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut addr = [0u8; MAC_ADDR_LEN];
        let mut parts = s.split(|c| c == ':' || c == '-');

        for octet in addr.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| BridgeError::InvalidParameter(format!("MAC address too short: {}", s)))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| BridgeError::InvalidParameter(format!("Invalid MAC octet '{}' in {}", part, s)))?;
        }

        if parts.next().is_some() {
            return Err(BridgeError::InvalidParameter(format!("MAC address too long: {}", s)));
        }

        Ok(Self(addr))
    }
}

/// Borrowed view of a frame delivered by the capture context
///
/// Valid only for the duration of the capture callback; anything that must
/// outlive it is copied into a queue slot.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    data: &'a [u8],
    kind: FrameKind,
}

impl<'a> CapturedFrame<'a> {
    pub fn new(data: &'a [u8], kind: FrameKind) -> Self {
        Self { data, kind }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Raw captured bytes, header and body
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The two frame control bytes, as captured
    pub fn frame_control(&self) -> Option<[u8; 2]> {
        match self.data {
            [b0, b1, ..] => Some([*b0, *b1]),
            _ => None,
        }
    }

    /// Probe Response with no frame control flags set
    pub fn is_probe_response(&self) -> bool {
        self.frame_control() == Some(PROBE_RESPONSE_SIGNATURE)
    }

    pub fn to_ds(&self) -> bool {
        self.flags() & FLAG_TO_DS != 0
    }

    pub fn from_ds(&self) -> bool {
        self.flags() & FLAG_FROM_DS != 0
    }

    /// Downlink traffic relayed by an access point (toDS=0, fromDS=1)
    pub fn is_from_distribution_system(&self) -> bool {
        !self.to_ds() && self.from_ds()
    }

    pub fn destination(&self) -> Option<MacAddress> {
        MacAddress::from_slice_at(self.data, DESTINATION_OFFSET)
    }

    pub fn source(&self) -> Option<MacAddress> {
        MacAddress::from_slice_at(self.data, SOURCE_OFFSET)
    }

    pub fn bssid(&self) -> Option<MacAddress> {
        MacAddress::from_slice_at(self.data, BSSID_OFFSET)
    }

    fn flags(&self) -> u8 {
        self.data.get(1).copied().unwrap_or(0)
    }
}

impl fmt::Display for CapturedFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "802.11 {:?} frame, len={}, src={}, dst={}",
            self.kind,
            self.data.len(),
            self.source().map_or_else(|| "-".to_string(), |a| a.to_string()),
            self.destination().map_or_else(|| "-".to_string(), |a| a.to_string()),
        )
    }
}
