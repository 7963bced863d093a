//! Device registry
//!
//! Explicit store of every peripheral seen while scanning. The application
//! creates one at start-up and shares it with the components that look
//! peripherals up. Entries are added on first discovery, refreshed by later
//! reports, and only ever removed by the application.

use crate::adapter::{DiscoveredPeripheral, PeripheralId};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

/// What the registry knows about one peripheral.
#[derive(Debug, Clone)]
pub struct KnownPeripheral {
    pub latest: DiscoveredPeripheral,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub times_seen: u64,
}

impl KnownPeripheral {
    /// Name from the latest advertisement, with the address as fallback.
    pub fn label(&self) -> String {
        match self.latest.advertisement.local_name() {
            Some(name) => format!("{} ({})", name, self.latest.id),
            None => format!("«UNKNOWN NAME» ({})", self.latest.id),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    peripherals: RwLock<HashMap<PeripheralId, KnownPeripheral>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report. Returns `true` the first time a peripheral is seen.
    pub fn record(&self, peripheral: &DiscoveredPeripheral) -> bool {
        let now = Instant::now();
        let mut peripherals = self
            .peripherals
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match peripherals.get_mut(&peripheral.id) {
            Some(known) => {
                known.latest = peripheral.clone();
                known.last_seen = now;
                known.times_seen += 1;
                false
            }
            None => {
                peripherals.insert(
                    peripheral.id.clone(),
                    KnownPeripheral {
                        latest: peripheral.clone(),
                        first_seen: now,
                        last_seen: now,
                        times_seen: 1,
                    },
                );
                true
            }
        }
    }

    /// Looks up one peripheral.
    pub fn get(&self, id: &PeripheralId) -> Option<KnownPeripheral> {
        self.peripherals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Every known peripheral, in no particular order.
    pub fn all(&self) -> Vec<KnownPeripheral> {
        self.peripherals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peripherals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets a peripheral; it is added again on its next report.
    pub fn remove(&self, id: &PeripheralId) -> Option<KnownPeripheral> {
        self.peripherals
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }
}
