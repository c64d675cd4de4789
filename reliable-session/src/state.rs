//! Session lifecycle states.
//!
//! ```text
//!  INIT ──attach──▶ ATTACHED ──▶ OPENING ──▶ ESTABLISHED
//!                                                 │
//!                                          close  │
//!                                                 ▼
//!                                  CLOSED ◀── CLOSING
//! ```
//!
//! The session itself only performs `Init → Attached` (on attach) and
//! `→ Closing → Closed` (on close).  Opening and establishment are driven by
//! whoever routes sessions by ID.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionState {
    /// Constructed, no underlay yet.
    #[default]
    Init,
    /// An underlay is attached; network processing may run.
    Attached,
    Opening,
    Established,
    /// Close has begun; no new Read/Write is admitted.
    Closing,
    Closed,
}

impl SessionState {
    /// Whether an underlay has been attached at some point.
    pub fn is_attached(self) -> bool {
        self >= SessionState::Attached
    }

    /// Whether new application I/O must be refused.
    pub fn is_closing(self) -> bool {
        self >= SessionState::Closing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Attached => "ATTACHED",
            SessionState::Opening => "OPENING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
