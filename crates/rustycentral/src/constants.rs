//! Protocol and engine constants

use std::time::Duration;

// Per-packet overhead carried by every ATT PDU
pub const L2CAP_HEADER_SIZE: usize = 4;
pub const ATT_HEADER_SIZE: usize = 3;
pub const PACKET_OVERHEAD: usize = L2CAP_HEADER_SIZE + ATT_HEADER_SIZE;

// MTU bounds
pub const MTU_FLOOR: u16 = 27;
pub const MTU_CEILING: u16 = 517;

/// Usable payload when MTU negotiation fails.
pub const MIN_USABLE_PAYLOAD: usize = MTU_FLOOR as usize - PACKET_OVERHEAD;
/// Usable payload at the largest MTU we ever request.
pub const MAX_USABLE_PAYLOAD: usize = MTU_CEILING as usize - PACKET_OVERHEAD;

// Connection defaults
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(6_000);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
pub const MAX_WRITE_RESENDS: u8 = 3;

// Client Characteristic Configuration descriptor
pub const CLIENT_CHAR_CONFIG_UUID: u16 = 0x2902;
pub const CCCD_ENABLE_NOTIFICATION: [u8; 2] = [0x01, 0x00];
pub const CCCD_ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];

// Link state codes reported by the transport
pub const LINK_STATE_DISCONNECTED: u8 = 0x00;
pub const LINK_STATE_CONNECTING: u8 = 0x01;
pub const LINK_STATE_CONNECTED: u8 = 0x02;
pub const LINK_STATE_DISCONNECTING: u8 = 0x03;

// Advertising data types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_INCOMPLETE_UUID16: u8 = 0x02;
pub const AD_TYPE_COMPLETE_UUID16: u8 = 0x03;
pub const AD_TYPE_INCOMPLETE_UUID32: u8 = 0x04;
pub const AD_TYPE_COMPLETE_UUID32: u8 = 0x05;
pub const AD_TYPE_INCOMPLETE_UUID128: u8 = 0x06;
pub const AD_TYPE_COMPLETE_UUID128: u8 = 0x07;
pub const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_APPEARANCE: u8 = 0x19;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;
