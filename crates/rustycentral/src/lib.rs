//! RustyCentral - A Bluetooth Low Energy central transport engine
//!
//! This library drives the central side of BLE on top of a platform transport:
//! it scans for peripherals, walks each connection through MTU negotiation and
//! attribute discovery, and serializes GATT reads, writes and notification
//! subscriptions on the link, splitting large writes into MTU-sized chunks and
//! resending chunks the peripheral rejects.
//!
//! The platform side is abstracted behind [`BleAdapter`] and [`GattHandle`];
//! everything here runs on tokio.

pub mod adapter;
pub mod advertisement;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod gatt;
pub mod registry;
pub mod scan;
pub mod uuid;

#[cfg(test)]
mod mock;

// Re-export common types for convenience
pub use adapter::{
    BleAdapter, DiscoveredPeripheral, GattEvent, GattHandle, LinkOptions, PeripheralId, ScanEvent,
    ScanFilter, ScanMode, ScanSettings,
};
pub use advertisement::{AdRecord, Advertisement};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, FailureReason};
pub use error::{Error, Result};
pub use gatt::{
    AttributeCatalog, AttributeId, CharacteristicId, CharacteristicProperties, DescriptorId,
    GattStatus, NotificationEvent, Request, ServiceId, WriteType,
};
pub use registry::{DeviceRegistry, KnownPeripheral};
pub use scan::{ScanFailure, ScanManager, ScanRequest};
pub use uuid::Uuid;
