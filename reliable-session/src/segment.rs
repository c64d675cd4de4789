//! Segment definitions and their wire format.
//!
//! A [`Segment`] is the atomic unit a session hands to, and receives from, the
//! underlay: a fixed-size metadata header followed by a payload slice.  This
//! module is responsible for:
//! - Defining the two metadata shapes ([`DataAck`] and [`SessionControl`]).
//! - Serialising a segment into a byte buffer ready for the underlay.
//! - Deserialising a metadata header, rejecting unknown tags and short input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Both shapes occupy exactly
//! [`METADATA_LEN`] bytes so a stream reader can always pull a fixed header
//! before it knows which shape it holds.
//!
//! ```text
//! data / ack:
//!  +----------+------------+-------+-----------+--------+----------+-------------+
//!  | protocol | session id |  seq  | unack seq | window | fragment | payload len |
//!  |    1     |     4      |   4   |     4     |   2    |    1     |      2      |
//!  +----------+------------+-------+-----------+--------+----------+-------------+
//!
//! close request / response:
//!  +----------+------------+-------+--------+-------------+---------+
//!  | protocol | session id |  seq  | status | payload len | padding |
//!  |    1     |     4      |   4   |   1    |      2      |    6    |
//!  +----------+------------+-------+--------+-------------+---------+
//! ```

use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// Byte length of every encoded metadata header.
pub const METADATA_LEN: usize = 18;

const OFF_PROTOCOL: usize = 0;
const OFF_SESSION_ID: usize = 1;
const OFF_SEQ: usize = 5;

const OFF_UNACK_SEQ: usize = 9;
const OFF_WINDOW: usize = 13;
const OFF_FRAGMENT: usize = 15;
const OFF_DATA_PAYLOAD_LEN: usize = 16;

const OFF_STATUS: usize = 9;
const OFF_CONTROL_PAYLOAD_LEN: usize = 10;

/// Sequencing, ack and fragment information of a data or ack segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAck {
    pub protocol: Protocol,
    pub session_id: u32,
    /// Monotonic per direction.
    pub seq: u32,
    pub un_ack_seq: u32,
    /// Remaining receive capacity advertised by the sender.
    pub window_size: u16,
    /// Descending counter; 0 marks the last piece of one logical write.
    pub fragment: u8,
    pub payload_len: u16,
}

/// Metadata of a close request or close response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionControl {
    pub protocol: Protocol,
    pub session_id: u32,
    pub seq: u32,
    pub status: u8,
    pub payload_len: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    DataAck(DataAck),
    SessionControl(SessionControl),
}

impl Metadata {
    pub fn protocol(&self) -> Protocol {
        match self {
            Metadata::DataAck(m) => m.protocol,
            Metadata::SessionControl(m) => m.protocol,
        }
    }

    pub fn payload_len(&self) -> u16 {
        match self {
            Metadata::DataAck(m) => m.payload_len,
            Metadata::SessionControl(m) => m.payload_len,
        }
    }

    /// Serialise into exactly [`METADATA_LEN`] bytes.
    pub fn encode(&self) -> [u8; METADATA_LEN] {
        let mut buf = [0u8; METADATA_LEN];
        match self {
            Metadata::DataAck(m) => {
                buf[OFF_PROTOCOL] = m.protocol.to_u8();
                buf[OFF_SESSION_ID..OFF_SESSION_ID + 4].copy_from_slice(&m.session_id.to_be_bytes());
                buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&m.seq.to_be_bytes());
                buf[OFF_UNACK_SEQ..OFF_UNACK_SEQ + 4].copy_from_slice(&m.un_ack_seq.to_be_bytes());
                buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&m.window_size.to_be_bytes());
                buf[OFF_FRAGMENT] = m.fragment;
                buf[OFF_DATA_PAYLOAD_LEN..OFF_DATA_PAYLOAD_LEN + 2]
                    .copy_from_slice(&m.payload_len.to_be_bytes());
            }
            Metadata::SessionControl(m) => {
                buf[OFF_PROTOCOL] = m.protocol.to_u8();
                buf[OFF_SESSION_ID..OFF_SESSION_ID + 4].copy_from_slice(&m.session_id.to_be_bytes());
                buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&m.seq.to_be_bytes());
                buf[OFF_STATUS] = m.status;
                buf[OFF_CONTROL_PAYLOAD_LEN..OFF_CONTROL_PAYLOAD_LEN + 2]
                    .copy_from_slice(&m.payload_len.to_be_bytes());
            }
        }
        buf
    }

    /// Parse a metadata header from the first [`METADATA_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_LEN {
            return Err(Error::Decode(format!(
                "metadata needs {METADATA_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let protocol = Protocol::from_u8(buf[OFF_PROTOCOL])
            .ok_or_else(|| Error::Decode(format!("unknown protocol tag {}", buf[OFF_PROTOCOL])))?;
        let session_id = read_u32(buf, OFF_SESSION_ID);
        let seq = read_u32(buf, OFF_SEQ);

        if protocol.is_session_control() {
            return Ok(Metadata::SessionControl(SessionControl {
                protocol,
                session_id,
                seq,
                status: buf[OFF_STATUS],
                payload_len: read_u16(buf, OFF_CONTROL_PAYLOAD_LEN),
            }));
        }
        Ok(Metadata::DataAck(DataAck {
            protocol,
            session_id,
            seq,
            un_ack_seq: read_u32(buf, OFF_UNACK_SEQ),
            window_size: read_u16(buf, OFF_WINDOW),
            fragment: buf[OFF_FRAGMENT],
            payload_len: read_u16(buf, OFF_DATA_PAYLOAD_LEN),
        }))
    }
}

/// One unit on the wire: metadata plus the payload it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn protocol(&self) -> Protocol {
        self.metadata.protocol()
    }

    pub fn session_id(&self) -> u32 {
        match &self.metadata {
            Metadata::DataAck(m) => m.session_id,
            Metadata::SessionControl(m) => m.session_id,
        }
    }

    /// Ordering key inside a [`crate::segment_tree::SegmentTree`].
    pub fn seq(&self) -> u32 {
        match &self.metadata {
            Metadata::DataAck(m) => m.seq,
            Metadata::SessionControl(m) => m.seq,
        }
    }

    /// Fragment counter of a data or ack segment.
    ///
    /// Session control segments are never fragmented and have no counter.
    pub fn fragment(&self) -> Result<u8> {
        match &self.metadata {
            Metadata::DataAck(m) => Ok(m.fragment),
            Metadata::SessionControl(m) => Err(Error::Decode(format!(
                "{} segment carries no fragment counter",
                m.protocol
            ))),
        }
    }

    /// Serialise header and payload into one buffer.
    ///
    /// Fails if the declared payload length disagrees with the payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let declared = usize::from(self.metadata.payload_len());
        if declared != self.payload.len() {
            return Err(Error::InvalidArgument(format!(
                "payload_len is {declared} but payload has {} bytes",
                self.payload.len()
            )));
        }
        let mut buf = Vec::with_capacity(METADATA_LEN + self.payload.len());
        buf.extend_from_slice(&self.metadata.encode());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse one complete segment (header followed by exactly its payload).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let metadata = Metadata::decode(buf)?;
        let payload = &buf[METADATA_LEN..];
        if payload.len() != usize::from(metadata.payload_len()) {
            return Err(Error::Decode(format!(
                "payload_len is {} but {} bytes follow the header",
                metadata.payload_len(),
                payload.len()
            )));
        }
        Ok(Segment {
            metadata,
            payload: payload.to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}
