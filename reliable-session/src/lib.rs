//! `reliable-session`: ordered, fragmented, flow-controlled sessions
//! multiplexed over an underlay transport.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────────────────────────────┐
//!  │                  Session                   │
//!  │  read / write / close        (application) │
//!  │  send_queue  send_buf  recv_buf  recv_queue│
//!  │  input loop            output loop (network)│
//!  └────┬──────────────────────────────▲────────┘
//!       │ write_segment                │ inbound channel
//!  ┌────▼──────────────────────────────┴────────┐
//!  │        Underlay (e.g. TcpUnderlay)         │
//!  └────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`protocol`]: protocol tags, roles, MTU-derived fragment sizing
//! - [`segment`]: segment metadata and wire format
//! - [`segment_tree`]: bounded ordered buffer with blocking and polling access
//! - [`session`]: application I/O and the two network loops
//! - [`transport`]: per-transport strategy, chosen once per session
//! - [`underlay`]: the transport abstraction and its TCP implementation
//! - [`state`]: session lifecycle
//! - [`config`]: per-session tuning
//! - [`error`]: error taxonomy

pub mod config;
pub mod error;
pub mod protocol;
pub mod segment;
pub mod segment_tree;
pub mod session;
pub mod state;
pub mod transport;
pub mod underlay;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use protocol::{IpVersion, Protocol, Role, TransportProtocol, MAX_PDU};
pub use segment::Segment;
pub use segment_tree::SegmentTree;
pub use session::{Session, SessionTasks};
pub use state::SessionState;
pub use underlay::{TcpUnderlay, Underlay};
