//! Protocol tags, endpoint roles and path-derived sizing.
//!
//! Every segment carries one [`Protocol`] tag that names both its kind (data,
//! ack, session control) and, for data/ack, the direction of travel.  A
//! session only accepts tags that could legally be addressed to its
//! [`Role`]; see [`Protocol::is_inbound_for`].

use std::fmt;

use crate::error::{Error, Result};
use crate::segment::METADATA_LEN;

/// Largest payload accepted by a single `Session::write` call.
pub const MAX_PDU: usize = 16 * 1024;

/// Bytes reserved per segment for the underlay's nonce and AEAD tags.
pub const UNDERLAY_OVERHEAD: usize = 56;

/// Smallest and largest MTU a session may be configured with.
pub const MIN_MTU: usize = 576;
pub const MAX_MTU: usize = 9000;

/// Direction-and-kind marker stamped on every segment.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    CloseSessionRequest = 4,
    CloseSessionResponse = 5,
    DataClientToServer = 6,
    DataServerToClient = 7,
    AckClientToServer = 8,
    AckServerToClient = 9,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            4 => Protocol::CloseSessionRequest,
            5 => Protocol::CloseSessionResponse,
            6 => Protocol::DataClientToServer,
            7 => Protocol::DataServerToClient,
            8 => Protocol::AckClientToServer,
            9 => Protocol::AckServerToClient,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_data(self) -> bool {
        matches!(self, Protocol::DataClientToServer | Protocol::DataServerToClient)
    }

    pub fn is_ack(self) -> bool {
        matches!(self, Protocol::AckClientToServer | Protocol::AckServerToClient)
    }

    pub fn is_session_control(self) -> bool {
        matches!(
            self,
            Protocol::CloseSessionRequest | Protocol::CloseSessionResponse
        )
    }

    /// Whether a segment tagged `self` may be delivered to an endpoint of `role`.
    ///
    /// Session control tags are direction-free; data and ack tags must point
    /// towards `role`.
    pub fn is_inbound_for(self, role: Role) -> bool {
        match self {
            Protocol::CloseSessionRequest | Protocol::CloseSessionResponse => true,
            Protocol::DataServerToClient | Protocol::AckServerToClient => role == Role::Client,
            Protocol::DataClientToServer | Protocol::AckClientToServer => role == Role::Server,
        }
    }

    /// Data tag used by an endpoint of `role` when it sends.
    pub fn outbound_data(role: Role) -> Self {
        match role {
            Role::Client => Protocol::DataClientToServer,
            Role::Server => Protocol::DataServerToClient,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which end of the underlay owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    fn header_len(self) -> usize {
        match self {
            IpVersion::V4 => 20,
            IpVersion::V6 => 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    fn header_len(self) -> usize {
        match self {
            TransportProtocol::Tcp => 20,
            TransportProtocol::Udp => 8,
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Largest payload one segment can carry on the given path.
///
/// ```text
/// mtu - ip header - transport header - segment metadata - underlay overhead
/// ```
///
/// Never returns 0, so fragment counting always terminates.
pub fn max_fragment_size(mtu: usize, ip_version: IpVersion, transport: TransportProtocol) -> usize {
    mtu.saturating_sub(ip_version.header_len())
        .saturating_sub(transport.header_len())
        .saturating_sub(METADATA_LEN)
        .saturating_sub(UNDERLAY_OVERHEAD)
        .max(1)
}

/// Number of fragments needed to carry `len` bytes in pieces of `fragment_size`.
///
/// An empty write still occupies one segment.  Fails when the count does not
/// fit the 8-bit fragment counter.
pub fn fragment_count(len: usize, fragment_size: usize) -> Result<usize> {
    let n = if len > fragment_size {
        (len - 1) / fragment_size + 1
    } else {
        1
    };
    if n > usize::from(u8::MAX) + 1 {
        return Err(Error::InvalidArgument(format!(
            "{len} bytes need {n} fragments of {fragment_size} bytes"
        )));
    }
    Ok(n)
}
