//! Global identities for adapter-reported objects
//!
//! Adapters name things by local handles that mean nothing across adapters or
//! reconnects. Objects reporting a hardware fingerprint get the same global
//! id every time they appear; everything else gets a fresh one.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::compositor::{DeviceId, OutputId};

/// Fingerprint to global id arena
#[derive(Debug, Default)]
pub struct IdentityTable {
    devices: HashMap<String, DeviceId>,
    outputs: HashMap<String, OutputId>,
    live_devices: HashSet<DeviceId>,
    live_outputs: HashSet<OutputId>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity for an appearing device
    pub fn acquire_device(&mut self, fingerprint: Option<&str>) -> DeviceId {
        let id = match fingerprint {
            Some(fp) => match self.devices.get(fp) {
                Some(id) if self.live_devices.contains(id) => {
                    warn!("Device fingerprint {} is already in use, assigning a new id", fp);
                    DeviceId::new()
                }
                Some(id) => {
                    debug!("Device {} reappeared as {:?}", fp, id);
                    *id
                }
                None => {
                    let id = DeviceId::new();
                    self.devices.insert(fp.to_string(), id);
                    id
                }
            },
            None => DeviceId::new(),
        };
        self.live_devices.insert(id);
        id
    }

    /// Identity for an appearing output
    pub fn acquire_output(&mut self, fingerprint: Option<&str>) -> OutputId {
        let id = match fingerprint {
            Some(fp) => match self.outputs.get(fp) {
                Some(id) if self.live_outputs.contains(id) => {
                    warn!("Output fingerprint {} is already in use, assigning a new id", fp);
                    OutputId::new()
                }
                Some(id) => {
                    debug!("Output {} reappeared as {:?}", fp, id);
                    *id
                }
                None => {
                    let id = OutputId::new();
                    self.outputs.insert(fp.to_string(), id);
                    id
                }
            },
            None => OutputId::new(),
        };
        self.live_outputs.insert(id);
        id
    }

    pub fn release_device(&mut self, id: DeviceId) {
        self.live_devices.remove(&id);
    }

    pub fn release_output(&mut self, id: OutputId) {
        self.live_outputs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_survives_reconnect() {
        let mut table = IdentityTable::new();
        let first = table.acquire_device(Some("046d:c52b:1234"));
        table.release_device(first);
        let second = table.acquire_device(Some("046d:c52b:1234"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_fingerprint_is_always_new() {
        let mut table = IdentityTable::new();
        let first = table.acquire_output(None);
        table.release_output(first);
        assert_ne!(first, table.acquire_output(None));
    }

    #[test]
    fn test_duplicate_live_fingerprint() {
        let mut table = IdentityTable::new();
        let first = table.acquire_output(Some("DEL:U2720Q:ABC"));
        let second = table.acquire_output(Some("DEL:U2720Q:ABC"));
        assert_ne!(first, second);
    }
}
