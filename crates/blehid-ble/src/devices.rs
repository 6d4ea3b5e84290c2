//! Connected device table
//!
//! Subscription snapshots from the Report characteristic are the only input:
//! each snapshot is diffed against the table to find new and departed
//! centrals.

use std::collections::HashSet;

use dashmap::DashMap;

use blehid_core::{ConnectedDevice, DeviceId};

use crate::gatt::SubscribedClient;

/// Devices added and removed by one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionChange {
    pub connected: Vec<ConnectedDevice>,
    pub disconnected: Vec<ConnectedDevice>,
}

impl ConnectionChange {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

/// Concurrent map of currently subscribed centrals
#[derive(Debug, Default)]
pub struct ConnectionTable {
    devices: DashMap<DeviceId, ConnectedDevice>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the table with the current set of subscribers
    pub fn apply_snapshot(&self, clients: &[SubscribedClient]) -> ConnectionChange {
        let current: HashSet<&DeviceId> = clients.iter().map(|c| &c.session_id).collect();
        let mut change = ConnectionChange::default();

        for client in clients {
            if self.devices.contains_key(&client.session_id) {
                continue;
            }
            let mut device = ConnectedDevice::new(
                client.session_id.clone(),
                client
                    .name
                    .clone()
                    .unwrap_or_else(|| client.session_id.to_string()),
            );
            device.address = client.address.clone();
            device.authenticated = client.authenticated;
            device.encrypted = client.encrypted;
            self.devices.insert(device.id.clone(), device.clone());
            change.connected.push(device);
        }

        // Collect first; removing while iterating a DashMap deadlocks
        let departed: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|entry| !current.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in departed {
            if let Some((_, mut device)) = self.devices.remove(&id) {
                device.mark_disconnected();
                change.disconnected.push(device);
            }
        }

        change
    }

    pub fn get(&self, id: &DeviceId) -> Option<ConnectedDevice> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Snapshot of every tracked device, ordered by id
    pub fn list(&self) -> Vec<ConnectedDevice> {
        let mut devices: Vec<ConnectedDevice> =
            self.devices.iter().map(|entry| entry.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn record_delivery(&self, id: &DeviceId) {
        if let Some(mut device) = self.devices.get_mut(id) {
            device.record_delivery();
        }
    }

    pub fn touch(&self, id: &DeviceId) {
        if let Some(mut device) = self.devices.get_mut(id) {
            device.touch();
        }
    }

    pub fn set_metadata(&self, id: &DeviceId, key: &str, value: impl Into<String>) -> bool {
        match self.devices.get_mut(id) {
            Some(mut device) => {
                device.metadata.insert(key.to_string(), value.into());
                device.touch();
                true
            }
            None => false,
        }
    }

    /// Remove every device, marking each disconnected
    pub fn drain_all(&self) -> Vec<ConnectedDevice> {
        let mut drained = Vec::new();
        for id in self.ids() {
            if let Some((_, mut device)) = self.devices.remove(&id) {
                device.mark_disconnected();
                drained.push(device);
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(devices: &[ConnectedDevice]) -> Vec<&str> {
        devices.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_snapshot_diff() {
        let table = ConnectionTable::new();
        let a = SubscribedClient::new("a");
        let b = SubscribedClient::new("b");

        let change = table.apply_snapshot(&[a.clone()]);
        assert_eq!(ids(&change.connected), vec!["a"]);
        assert!(change.disconnected.is_empty());

        let change = table.apply_snapshot(&[a.clone(), b.clone()]);
        assert_eq!(ids(&change.connected), vec!["b"]);

        let change = table.apply_snapshot(&[b]);
        assert!(change.connected.is_empty());
        assert_eq!(ids(&change.disconnected), vec!["a"]);
        assert!(!change.disconnected[0].is_connected());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_repeated_snapshot_is_noop() {
        let table = ConnectionTable::new();
        let clients = vec![SubscribedClient::new("a")];
        table.apply_snapshot(&clients);
        assert!(table.apply_snapshot(&clients).is_empty());
    }

    #[test]
    fn test_metadata_and_drain() {
        let table = ConnectionTable::new();
        table.apply_snapshot(&[SubscribedClient::new("a"), SubscribedClient::new("b")]);
        assert!(table.set_metadata(&DeviceId::new("a"), "host_command", "suspend"));
        assert!(!table.set_metadata(&DeviceId::new("zz"), "host_command", "suspend"));
        table.record_delivery(&DeviceId::new("a"));
        assert_eq!(table.get(&DeviceId::new("a")).unwrap().reports_delivered, 1);

        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|d| !d.is_connected()));
        assert!(table.is_empty());
    }
}
