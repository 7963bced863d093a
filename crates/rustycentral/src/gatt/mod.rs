//! GATT client side: attribute identifiers, the attribute catalog, status
//! codes and the request pipeline that serializes operations on a link.

pub mod catalog;
pub mod pipeline;
pub mod request;
pub mod status;
pub mod types;


pub use catalog::{AttributeCatalog, CharacteristicEntry, DescriptorEntry, ServiceEntry};
pub use pipeline::RequestPipeline;
pub use request::{NotifyCallback, ReadCallback, Request, WriteCallback, WritePayload};
pub use status::GattStatus;
pub use types::{
    AttributeHandle, AttributeId, CharacteristicId, CharacteristicProperties, ConnectionPriority,
    DescriptorId, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService,
    NotificationEvent, Phy, ServiceId, WriteType,
};
