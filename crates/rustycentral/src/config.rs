//! Connection configuration

use crate::constants::*;
use crate::gatt::{CharacteristicId, ConnectionPriority, Phy};
use std::time::Duration;

/// Tunables for one [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How long a connect attempt may take to bring the link up
    pub connect_timeout: Duration,
    /// Pause between link-up and the MTU request
    pub settle_delay: Duration,
    pub requested_mtu: u16,
    pub priority: ConnectionPriority,
    pub phy: Phy,
    pub auto_connect: bool,
    /// Requests that may be queued or in flight at once
    pub queue_capacity: usize,
    /// Resends of a failed write chunk before the write fails
    pub max_write_resends: u8,
    /// Characteristics to enable notifications on every time the connection
    /// becomes ready
    pub observe_on_connect: Vec<CharacteristicId>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            requested_mtu: MTU_CEILING,
            priority: ConnectionPriority::Balanced,
            phy: Phy::Le2M,
            auto_connect: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_write_resends: MAX_WRITE_RESENDS,
            observe_on_connect: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn observe(mut self, id: CharacteristicId) -> Self {
        self.observe_on_connect.push(id);
        self
    }
}
