//! Error taxonomy shared by every layer of the session core.
//!
//! Application-facing calls ([`crate::session::Session::read`],
//! [`crate::session::Session::write`], ...) return [`Error`] synchronously and
//! never tear the session down.  The long-lived input/output loops wrap these
//! errors with `anyhow` context instead and terminate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A single write exceeded [`crate::protocol::MAX_PDU`]; nothing was queued.
    #[error("short write")]
    ShortWrite,

    /// The destination buffer cannot hold the next reassembled message.
    #[error("short buffer")]
    ShortBuffer,

    /// An argument (or an inbound segment) is inconsistent with the session.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Non-blocking dequeue found nothing.  Used only for polling.
    #[error("segment tree is empty")]
    Empty,

    /// The operation or transport kind is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Network processing was requested before an underlay was attached.
    #[error("session is not attached to an underlay")]
    NotAttached,

    /// The session has started closing, or the underlay read side was retired.
    #[error("closed")]
    Closed,

    /// Bytes on the wire, or metadata in memory, do not form a valid segment.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
