//! Registry of known irons, keyed by platform identifier.

use chrono::{DateTime, Utc};
use log::debug;

use crate::core::bluetooth::transport::Advertisement;
use crate::core::bluetooth::types::DeviceHandle;

/// Known devices in first-seen order
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or refreshes the entry for an advertisement.
    ///
    /// Returns true when the visible record changed.
    pub fn upsert(&mut self, advertisement: &Advertisement) -> bool {
        if let Some(existing) = self.get_mut(&advertisement.id) {
            let mut changed = false;
            if let Some(rssi) = advertisement.rssi {
                changed |= existing.rssi != rssi;
                existing.rssi = rssi;
            }
            if advertisement.name.is_some() && existing.name != advertisement.name {
                existing.name = advertisement.name.clone();
                changed = true;
            }
            if advertisement.address.is_some() && existing.address != advertisement.address {
                existing.address = advertisement.address.clone();
                changed = true;
            }
            return changed;
        }

        debug!(
            "New device {} ({:?}), RSSI {:?}",
            advertisement.id, advertisement.name, advertisement.rssi
        );
        let mut handle = DeviceHandle::new(
            advertisement.id.clone(),
            advertisement.name.clone(),
            advertisement.rssi.unwrap_or(i16::MIN),
        );
        handle.address = advertisement.address.clone();
        self.devices.push(handle);
        true
    }

    /// Merges persisted records into the registry.
    ///
    /// Records already seen over the air keep their live signal and name and
    /// pick up the persisted identity fields.
    pub fn restore(&mut self, records: Vec<DeviceHandle>) {
        for record in records {
            match self.get_mut(&record.id) {
                Some(existing) => {
                    if existing.name.is_none() {
                        existing.name = record.name;
                    }
                    if existing.address.is_none() {
                        existing.address = record.address;
                    }
                    existing.build = existing.build.take().or(record.build);
                    existing.serial_number = existing.serial_number.take().or(record.serial_number);
                    existing.device_id = existing.device_id.take().or(record.device_id);
                    existing.variation = record.variation;
                }
                None => {
                    self.devices.push(DeviceHandle {
                        connected: false,
                        connected_at: None,
                        ..record
                    });
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&DeviceHandle> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut DeviceHandle> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Marks `id` connected and every other device disconnected.
    pub fn mark_connected(&mut self, id: &str, at: DateTime<Utc>) {
        for device in &mut self.devices {
            if device.id == id {
                device.connected = true;
                device.connected_at = Some(at);
            } else {
                device.connected = false;
                device.connected_at = None;
            }
        }
    }

    pub fn mark_disconnected(&mut self, id: &str) {
        if let Some(device) = self.get_mut(id) {
            device.connected = false;
            device.connected_at = None;
        }
    }

    pub fn list(&self) -> Vec<DeviceHandle> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::IronColor;

    fn advert(id: &str, rssi: i16) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: Some("Pinecil".to_string()),
            address: None,
            rssi: Some(rssi),
        }
    }

    #[test]
    fn test_rediscovery_updates_in_place() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.upsert(&advert("A", -55)));
        assert!(registry.upsert(&advert("A", -70)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A").unwrap().rssi, -70);
    }

    #[test]
    fn test_identical_advertisement_is_not_a_change() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&advert("A", -55));
        assert!(!registry.upsert(&advert("A", -55)));
    }

    #[test]
    fn test_missing_name_keeps_known_name() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&advert("A", -55));
        registry.upsert(&Advertisement {
            id: "A".into(),
            name: None,
            address: None,
            rssi: None,
        });
        let device = registry.get("A").unwrap();
        assert_eq!(device.name.as_deref(), Some("Pinecil"));
        assert_eq!(device.rssi, -55);
    }

    #[test]
    fn test_restore_merges_instead_of_duplicating() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&advert("A", -58));

        let mut persisted = DeviceHandle::new("A", Some("Bench iron".into()), -90);
        persisted.build = Some("v2.22".into());
        persisted.variation = IronColor::Pink;
        persisted.connected = true;
        let other = DeviceHandle::new("B", None, -75);
        registry.restore(vec![persisted, other]);

        assert_eq!(registry.len(), 2);
        let a = registry.get("A").unwrap();
        assert_eq!(a.rssi, -58);
        assert_eq!(a.name.as_deref(), Some("Pinecil"));
        assert_eq!(a.build.as_deref(), Some("v2.22"));
        assert_eq!(a.variation, IronColor::Pink);
        assert!(!registry.get("B").unwrap().connected);
    }

    #[test]
    fn test_only_one_device_connected() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&advert("A", -50));
        registry.upsert(&advert("B", -60));

        registry.mark_connected("A", Utc::now());
        registry.mark_connected("B", Utc::now());
        let connected: Vec<_> = registry.list().into_iter().filter(|d| d.connected).collect();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, "B");
    }
}
