//! Per-session tuning knobs.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{MAX_MTU, MIN_MTU};

/// Default number of segments each of a session's trees may hold.
pub const DEFAULT_TREE_CAPACITY: usize = 4096;

/// Default depth of the channel the underlay feeds inbound segments into.
pub const DEFAULT_CHAN_CAPACITY: usize = 256;

/// How long the output loop sleeps after finding the send queue empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const DEFAULT_MTU: usize = 1400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// L2 maximum transmission unit of the path; bounds fragment size.
    pub mtu: usize,
    /// Capacity of sendQueue, sendBuf, recvBuf and recvQueue.
    pub tree_capacity: usize,
    /// Capacity of the inbound segment channel.
    pub chan_capacity: usize,
    /// Output loop back-off when the send queue is empty.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            tree_capacity: DEFAULT_TREE_CAPACITY,
            chan_capacity: DEFAULT_CHAN_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_tree_capacity(mut self, capacity: usize) -> Self {
        self.tree_capacity = capacity;
        self
    }

    pub fn with_chan_capacity(mut self, capacity: usize) -> Self {
        self.chan_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(Error::InvalidArgument(format!(
                "mtu {} outside {MIN_MTU}..={MAX_MTU}",
                self.mtu
            )));
        }
        // The advertised window is a u16.
        if self.tree_capacity == 0 || self.tree_capacity > usize::from(u16::MAX) {
            return Err(Error::InvalidArgument(format!(
                "tree capacity {} outside 1..={}",
                self.tree_capacity,
                u16::MAX
            )));
        }
        if self.chan_capacity == 0 {
            return Err(Error::InvalidArgument("channel capacity must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidArgument("poll interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SessionConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tree_capacity, 4096);
        assert_eq!(cfg.chan_capacity, 256);
        assert_eq!(cfg.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn mtu_out_of_range_is_rejected() {
        assert!(SessionConfig::default().with_mtu(100).validate().is_err());
        assert!(SessionConfig::default().with_mtu(65_000).validate().is_err());
        assert!(SessionConfig::default().with_mtu(MIN_MTU).validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(SessionConfig::default().with_tree_capacity(0).validate().is_err());
        assert!(SessionConfig::default().with_chan_capacity(0).validate().is_err());
        assert!(SessionConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
