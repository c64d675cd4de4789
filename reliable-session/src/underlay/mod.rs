//! Underlay abstraction: the network transport segments travel over.
//!
//! A session never touches sockets.  It asks its [`Underlay`] for address and
//! path information, and hands it one [`Segment`] at a time to put on the
//! wire.  In the other direction the underlay pushes decoded segments into
//! the channel returned by [`crate::session::Session::inbound`].

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{IpVersion, TransportProtocol};
use crate::segment::Segment;

pub mod tcp;

pub use tcp::TcpUnderlay;

#[async_trait]
pub trait Underlay: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    fn ip_version(&self) -> IpVersion;

    fn transport_protocol(&self) -> TransportProtocol;

    /// Put exactly one segment on the wire.
    async fn write_segment(&self, seg: &Segment) -> Result<()>;
}

/// IP version of the path towards `addr`.
pub fn ip_version_of(addr: &SocketAddr) -> IpVersion {
    match addr {
        SocketAddr::V4(_) => IpVersion::V4,
        SocketAddr::V6(_) => IpVersion::V6,
    }
}
