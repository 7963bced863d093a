//! Connection states

use crate::gatt::GattStatus;
use std::fmt;

/// Why a connection attempt ended in [`ConnectionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The link was not ready before the connect timeout expired.
    Timeout,
    /// The transport rejected or dropped the link while connecting.
    Transport(GattStatus),
    /// Attribute discovery failed.
    Discovery(GattStatus),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timed out"),
            FailureReason::Transport(status) => write!(f, "transport error {}", status),
            FailureReason::Discovery(status) => write!(f, "discovery error {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    NegotiatingMtu,
    DiscoveringAttributes,
    Connected,
    /// The peripheral or the stack started tearing the link down.
    Disconnecting,
    /// We asked the transport to disconnect and are waiting for it to confirm.
    DisconnectRequested,
    Failed(FailureReason),
    /// The transport reported a link state code we do not know.
    Invalid(u8),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::NegotiatingMtu => "Negotiating MTU",
            ConnectionState::DiscoveringAttributes => "Discovering attributes",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::DisconnectRequested => "Disconnect requested",
            ConnectionState::Failed(_) => "Failed",
            ConnectionState::Invalid(_) => "Invalid",
        }
    }

    /// The link layer is up, whether or not setup has finished.
    pub fn is_link_up(&self) -> bool {
        matches!(
            self,
            ConnectionState::NegotiatingMtu
                | ConnectionState::DiscoveringAttributes
                | ConnectionState::Connected
        )
    }

    /// A connect attempt is running.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::NegotiatingMtu
                | ConnectionState::DiscoveringAttributes
        )
    }

    /// States in which a running connect attempt has ended without a link.
    pub fn ends_attempt(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::Failed(_)
                | ConnectionState::Invalid(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failed(reason) => write!(f, "Failed ({})", reason),
            ConnectionState::Invalid(code) => write!(f, "Invalid (0x{:02x})", code),
            other => f.write_str(other.label()),
        }
    }
}
