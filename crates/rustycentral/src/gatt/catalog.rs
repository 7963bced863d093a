//! Attribute catalog
//!
//! Snapshot of a peripheral's services, characteristics and descriptors keyed
//! by their path-qualified identifiers. A catalog is built once from a
//! discovery result and never mutated; rediscovery builds a new one.

use super::types::{
    AttributeHandle, AttributeId, CharacteristicId, CharacteristicProperties, DescriptorId,
    DiscoveredService, ServiceId,
};
use crate::uuid::Uuid;
use log::{debug, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub id: ServiceId,
    pub handle: AttributeHandle,
    pub is_primary: bool,
    pub characteristics: Vec<CharacteristicId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicEntry {
    pub id: CharacteristicId,
    /// Value handle
    pub handle: AttributeHandle,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<DescriptorId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub id: DescriptorId,
    pub handle: AttributeHandle,
}

#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    services: HashMap<ServiceId, ServiceEntry>,
    characteristics: HashMap<CharacteristicId, CharacteristicEntry>,
    descriptors: HashMap<DescriptorId, DescriptorEntry>,
    by_value_handle: HashMap<AttributeHandle, CharacteristicId>,
}

impl AttributeCatalog {
    /// An empty catalog, used until the first discovery completes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks the discovered hierarchy once and indexes every attribute.
    ///
    /// When the peripheral exposes the same UUID twice at one level the first
    /// occurrence wins, since identifiers cannot tell them apart.
    pub fn build(services: &[DiscoveredService]) -> Self {
        let mut catalog = Self::new();

        for service in services {
            let service_id = ServiceId(service.uuid);
            if catalog.services.contains_key(&service_id) {
                warn!("Duplicate {} ignored", service_id);
                continue;
            }

            let mut characteristic_ids = Vec::with_capacity(service.characteristics.len());
            for characteristic in &service.characteristics {
                let characteristic_id = service_id.characteristic(characteristic.uuid);
                if catalog.characteristics.contains_key(&characteristic_id) {
                    warn!("Duplicate {} ignored", characteristic_id);
                    continue;
                }

                let mut descriptor_ids = Vec::with_capacity(characteristic.descriptors.len());
                for descriptor in &characteristic.descriptors {
                    let descriptor_id = characteristic_id.descriptor(descriptor.uuid);
                    if catalog.descriptors.contains_key(&descriptor_id) {
                        continue;
                    }
                    catalog.descriptors.insert(
                        descriptor_id,
                        DescriptorEntry {
                            id: descriptor_id,
                            handle: descriptor.handle,
                        },
                    );
                    descriptor_ids.push(descriptor_id);
                }

                catalog
                    .by_value_handle
                    .entry(characteristic.handle)
                    .or_insert(characteristic_id);
                catalog.characteristics.insert(
                    characteristic_id,
                    CharacteristicEntry {
                        id: characteristic_id,
                        handle: characteristic.handle,
                        properties: characteristic.properties,
                        descriptors: descriptor_ids,
                    },
                );
                characteristic_ids.push(characteristic_id);
            }

            catalog.services.insert(
                service_id,
                ServiceEntry {
                    id: service_id,
                    handle: service.handle,
                    is_primary: service.is_primary,
                    characteristics: characteristic_ids,
                },
            );
        }

        debug!(
            "Attribute catalog built: {} services, {} characteristics, {} descriptors",
            catalog.service_count(),
            catalog.characteristic_count(),
            catalog.descriptor_count()
        );

        catalog
    }

    pub fn service(&self, id: &ServiceId) -> Option<&ServiceEntry> {
        self.services.get(id)
    }

    pub fn characteristic(&self, id: &CharacteristicId) -> Option<&CharacteristicEntry> {
        self.characteristics.get(id)
    }

    pub fn descriptor(&self, id: &DescriptorId) -> Option<&DescriptorEntry> {
        self.descriptors.get(id)
    }

    /// Finds the characteristic whose value lives at `handle`.
    pub fn characteristic_by_handle(&self, handle: AttributeHandle) -> Option<&CharacteristicEntry> {
        self.by_value_handle
            .get(&handle)
            .and_then(|id| self.characteristics.get(id))
    }

    /// Descriptor `uuid` of `characteristic`, if both exist.
    pub fn descriptor_of(
        &self,
        characteristic: &CharacteristicId,
        uuid: Uuid,
    ) -> Option<&DescriptorEntry> {
        self.descriptors.get(&characteristic.descriptor(uuid))
    }

    pub fn contains(&self, id: &AttributeId) -> bool {
        match id {
            AttributeId::Service(id) => self.services.contains_key(id),
            AttributeId::Characteristic(id) => self.characteristics.contains_key(id),
            AttributeId::Descriptor(id) => self.descriptors.contains_key(id),
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.services.values()
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicEntry> {
        self.characteristics.values()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.characteristics.len()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
