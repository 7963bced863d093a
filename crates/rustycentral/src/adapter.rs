//! Transport adapter contract
//!
//! The engine never talks to Bluetooth hardware itself. A platform backend
//! implements [`BleAdapter`] and [`GattHandle`]: every method only *issues* a
//! command and returns immediately, and the outcome arrives later as an event
//! on the channel the engine handed over when the scan or connection started.
//! A backend must deliver at most one completion event per issued command.

use crate::advertisement::Advertisement;
use crate::error::Result;
use crate::gatt::{
    AttributeHandle, ConnectionPriority, DiscoveredService, GattStatus, Phy, WriteType,
};
use crate::scan::ScanFailure;
use crate::uuid::Uuid;
use std::fmt;
use tokio::sync::mpsc;

/// Stable address of a peripheral as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(address: impl Into<String>) -> Self {
        PeripheralId(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(address: &str) -> Self {
        PeripheralId::new(address)
    }
}

/// One advertising report.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub rssi: i16,
    pub advertisement: Advertisement,
}

/// Adapter-side scan filter, applied by the controller where supported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFilter {
    pub address: Option<PeripheralId>,
    pub name: Option<String>,
    pub service_uuid: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Request scan responses in addition to advertisements
    pub active: bool,
}

/// Results of an in-progress scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Discovered(DiscoveredPeripheral),
    Failed(ScanFailure),
}

pub type ScanEventSender = mpsc::UnboundedSender<ScanEvent>;

/// Link options for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Let the controller connect whenever the peripheral becomes available
    pub auto_connect: bool,
    pub phy: Phy,
}

/// Completion events for commands issued on a [`GattHandle`].
///
/// Status values are the transport's raw numeric codes; the engine maps them
/// through [`GattStatus::from`].
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// Link-layer state change. `state` uses the `LINK_STATE_*` codes.
    ConnectionStateChanged { status: u16, state: u8 },
    MtuChanged { mtu: u16, status: u16 },
    AttributesDiscovered {
        status: u16,
        services: Vec<DiscoveredService>,
    },
    CharacteristicRead {
        handle: AttributeHandle,
        status: u16,
        value: Vec<u8>,
    },
    CharacteristicWritten { handle: AttributeHandle, status: u16 },
    DescriptorRead {
        handle: AttributeHandle,
        status: u16,
        value: Vec<u8>,
    },
    DescriptorWritten { handle: AttributeHandle, status: u16 },
    /// A notification or indication pushed by the peripheral
    CharacteristicChanged {
        handle: AttributeHandle,
        value: Vec<u8>,
    },
}

pub type GattEventSender = mpsc::UnboundedSender<GattEvent>;

/// Platform BLE adapter.
pub trait BleAdapter: Send + Sync {
    /// Starts a scan. Reports arrive on `events` until [`BleAdapter::stop_scan`].
    fn start_scan(
        &self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        events: ScanEventSender,
    ) -> std::result::Result<(), ScanFailure>;

    fn stop_scan(&self);

    /// Opens a transport handle to `peripheral` and starts connecting.
    fn connect(
        &self,
        peripheral: &PeripheralId,
        options: LinkOptions,
        events: GattEventSender,
    ) -> Result<Box<dyn GattHandle>>;
}

/// A live transport handle to one peripheral.
///
/// Every command returns as soon as it is issued. An `Err` means the command
/// was refused and no completion event will follow.
pub trait GattHandle: Send + Sync {
    /// Reconnects in place after a soft disconnect. Events for the new link go
    /// to `events`.
    fn reconnect(&self, events: GattEventSender) -> Result<()>;

    fn disconnect(&self);

    /// Releases the handle. No events are delivered afterwards.
    fn close(&self);

    fn request_mtu(&self, mtu: u16) -> std::result::Result<(), GattStatus>;

    fn discover_attributes(&self) -> std::result::Result<(), GattStatus>;

    fn read_characteristic(&self, handle: AttributeHandle)
        -> std::result::Result<(), GattStatus>;

    fn read_descriptor(&self, handle: AttributeHandle) -> std::result::Result<(), GattStatus>;

    fn write_characteristic(
        &self,
        handle: AttributeHandle,
        value: &[u8],
        write_type: WriteType,
    ) -> std::result::Result<(), GattStatus>;

    fn write_descriptor(
        &self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> std::result::Result<(), GattStatus>;

    /// Turns local delivery of notifications for a characteristic on or off.
    /// Returns whether the transport accepted the change.
    fn set_notification(&self, handle: AttributeHandle, enabled: bool) -> bool;

    /// Best effort; returns whether the transport accepted the request.
    fn request_connection_priority(&self, priority: ConnectionPriority) -> bool;
}
