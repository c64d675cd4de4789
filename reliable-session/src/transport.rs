//! Transport strategies.
//!
//! How a session moves segments between its trees and the underlay depends on
//! the underlay's transport kind.  The choice is made once, when the underlay
//! is attached ([`select`]), instead of being re-checked for every segment.
//!
//! Only the stream (TCP) strategy exists.  A stream underlay already delivers
//! bytes reliably and in order, so data goes straight to the receive queue and
//! acknowledgements carry no work.  Datagram transports will need their own
//! strategy with send/receive buffering; until then they are refused.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::{Role, TransportProtocol};
use crate::segment::Segment;
use crate::segment_tree::SegmentTree;
use crate::underlay::Underlay;

/// The four ordered buffers a session owns.
#[derive(Debug)]
pub struct Queues {
    /// Segments waiting to be sent.
    pub send_queue: SegmentTree,
    /// Segments sent but not acknowledged.
    pub send_buf: SegmentTree,
    /// Segments received whose acknowledgement has not been sent.
    pub recv_buf: SegmentTree,
    /// Segments waiting to be read by the application.
    pub recv_queue: SegmentTree,
}

impl Queues {
    pub fn new(capacity: usize) -> Self {
        Self {
            send_queue: SegmentTree::new(capacity),
            send_buf: SegmentTree::new(capacity),
            recv_buf: SegmentTree::new(capacity),
            recv_queue: SegmentTree::new(capacity),
        }
    }
}

/// What an accepted inbound segment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Data,
    Ack,
    /// Close request/response; owned by the session multiplexer.
    Control,
}

/// Check an inbound segment's tag against the receiving session's role.
pub fn classify(role: Role, seg: &Segment) -> Result<Inbound> {
    let protocol = seg.protocol();
    if !protocol.is_inbound_for(role) {
        return Err(Error::InvalidArgument(format!(
            "{protocol} segment delivered to a {role:?} session"
        )));
    }
    if protocol.is_data() {
        Ok(Inbound::Data)
    } else if protocol.is_ack() {
        Ok(Inbound::Ack)
    } else {
        Ok(Inbound::Control)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn protocol(&self) -> TransportProtocol;

    /// Take the next segment to send, if one is ready, without waiting.
    fn next_outbound(&self, queues: &Queues) -> Result<Option<Segment>>;

    /// Put one outbound segment on the wire.
    async fn write_segment(&self, underlay: &dyn Underlay, seg: Segment, queues: &Queues) -> Result<()>;

    /// Accept one classified inbound data segment.
    async fn input_data(&self, seg: Segment, queues: &Queues) -> Result<()>;

    /// Accept one classified inbound ack segment.
    async fn input_ack(&self, seg: Segment, queues: &Queues) -> Result<()>;
}

/// Pick the strategy for `protocol`.
pub fn select(protocol: TransportProtocol) -> Result<Arc<dyn Transport>> {
    match protocol {
        TransportProtocol::Tcp => Ok(Arc::new(TcpTransport)),
        other => Err(Error::Unsupported(format!("transport protocol {other}"))),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Tcp
    }

    fn next_outbound(&self, queues: &Queues) -> Result<Option<Segment>> {
        match queues.send_queue.delete_min() {
            Ok(seg) => Ok(Some(seg)),
            Err(Error::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_segment(&self, underlay: &dyn Underlay, seg: Segment, _queues: &Queues) -> Result<()> {
        // The stream is reliable; nothing is kept for retransmission.
        underlay.write_segment(&seg).await
    }

    async fn input_data(&self, seg: Segment, queues: &Queues) -> Result<()> {
        if !queues.recv_queue.insert_blocking(seg).await {
            log::debug!("[tcp-transport] dropped duplicate data segment");
        }
        Ok(())
    }

    async fn input_ack(&self, _seg: Segment, _queues: &Queues) -> Result<()> {
        // A stream underlay needs no ack bookkeeping.
        Ok(())
    }
}
