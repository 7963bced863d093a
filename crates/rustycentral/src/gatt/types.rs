//! Common types for GATT operations
//!
//! Attribute identifiers are path-qualified: a characteristic is named by its
//! service and its own UUID, a descriptor by its characteristic and its own
//! UUID. Handles are the transport's opaque attribute references.

use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

/// Opaque reference the transport uses to address one attribute.
pub type AttributeHandle = u16;

/// Identifies a service by UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    pub fn characteristic(self, uuid: impl Into<Uuid>) -> CharacteristicId {
        CharacteristicId::new(self, uuid)
    }
}

/// Identifies a characteristic within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    pub service: ServiceId,
    pub uuid: Uuid,
}

impl CharacteristicId {
    pub fn new(service: ServiceId, uuid: impl Into<Uuid>) -> Self {
        CharacteristicId {
            service,
            uuid: uuid.into(),
        }
    }

    pub fn descriptor(self, uuid: impl Into<Uuid>) -> DescriptorId {
        DescriptorId {
            characteristic: self,
            uuid: uuid.into(),
        }
    }
}

/// Identifies a descriptor within a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub uuid: Uuid,
}

/// Any addressable attribute in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    Service(ServiceId),
    Characteristic(CharacteristicId),
    Descriptor(DescriptorId),
}

impl From<ServiceId> for AttributeId {
    fn from(id: ServiceId) -> Self {
        AttributeId::Service(id)
    }
}

impl From<CharacteristicId> for AttributeId {
    fn from(id: CharacteristicId) -> Self {
        AttributeId::Characteristic(id)
    }
}

impl From<DescriptorId> for AttributeId {
    fn from(id: DescriptorId) -> Self {
        AttributeId::Descriptor(id)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service ({})", self.0)
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - characteristic ({})", self.service, self.uuid)
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - descriptor ({})", self.characteristic, self.uuid)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeId::Service(id) => id.fmt(f),
            AttributeId::Characteristic(id) => id.fmt(f),
            AttributeId::Descriptor(id) => id.fmt(f),
        }
    }
}

bitflags! {
    /// Characteristic properties as declared by the peripheral
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.intersects(
            Self::WRITE | Self::WRITE_WITHOUT_RESPONSE | Self::AUTHENTICATED_SIGNED_WRITES,
        )
    }

    /// True when the peripheral can push values, by notification or indication.
    pub fn supports_notify(&self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteType {
    #[default]
    WithResponse,
    WithoutResponse,
    Signed,
}

/// Connection interval preference requested once attributes are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPriority {
    #[default]
    Balanced,
    High,
    LowPower,
}

/// Physical layer preference for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phy {
    Le1M,
    #[default]
    Le2M,
    LeCoded,
}

/// A descriptor as reported by attribute discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDescriptor {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
}

/// A characteristic as reported by attribute discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    /// Value handle
    pub handle: AttributeHandle,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<DiscoveredDescriptor>,
}

/// A service as reported by attribute discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
    pub is_primary: bool,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// A value pushed by the peripheral for a characteristic with notify or
/// indicate enabled. Not ordered with respect to queued requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub id: CharacteristicId,
    pub value: Vec<u8>,
}
