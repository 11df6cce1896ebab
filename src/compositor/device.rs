//! Device registry
//!
//! Tracks input devices as adapters hot-plug and remove them. A device that
//! reports a hardware fingerprint keeps its record (as `Detached`) after
//! removal so a reconnect resumes the same identity and settings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};

use crate::backend::AdapterId;
use crate::compositor::OutputId;
use crate::error::{ObjectKind, StaleReference};

/// Unique identifier for devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        DeviceId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

bitflags::bitflags! {
    /// What a device can do
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceCapabilities: u32 {
        const POINTER = 1 << 0;
        const KEYBOARD = 1 << 1;
        const TOUCH = 1 << 2;
        const TABLET = 1 << 3;
        const OUTPUT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Attached,
    Detached,
}

/// What a backend adapter reports about a newly discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub capabilities: DeviceCapabilities,
    /// Stable hardware identity (e.g. vendor:product:serial), if known
    pub fingerprint: Option<String>,
    /// Seat the device belongs to; `None` for the default seat
    pub seat: Option<String>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, capabilities: DeviceCapabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
            fingerprint: None,
            seat: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_seat(mut self, seat: impl Into<String>) -> Self {
        self.seat = Some(seat.into());
        self
    }
}

/// An input device known to the compositor
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub capabilities: DeviceCapabilities,
    /// Adapter the device was last seen on
    pub adapter: AdapterId,
    pub state: ConnectionState,
    pub fingerprint: Option<String>,
    /// Seat name
    pub seat: String,
    /// Output absolute events of this device map onto
    pub mapped_output: Option<OutputId>,
}

/// Registry of all devices
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
}

impl DeviceRegistry {
    /// Create a new device registry
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    /// Record a device discovery
    ///
    /// If the id belongs to a detached device, the record is reattached and
    /// keeps its output mapping.
    pub fn attach(
        &mut self,
        id: DeviceId,
        adapter: AdapterId,
        info: DeviceInfo,
        default_seat: &str,
    ) -> &Device {
        let seat = info.seat.unwrap_or_else(|| default_seat.to_string());
        let device = self.devices.entry(id).or_insert_with(|| Device {
            id,
            name: info.name.clone(),
            capabilities: info.capabilities,
            adapter,
            state: ConnectionState::Detached,
            fingerprint: info.fingerprint.clone(),
            seat: seat.clone(),
            mapped_output: None,
        });

        if device.state == ConnectionState::Detached && device.adapter != adapter {
            debug!("Device {} moved to adapter {:?}", device.name, adapter);
        }
        device.name = info.name;
        device.capabilities = info.capabilities;
        device.adapter = adapter;
        device.fingerprint = info.fingerprint;
        device.seat = seat;
        device.state = ConnectionState::Attached;

        info!(
            "Device attached: {} ({:?}, {:?})",
            device.name, device.id, device.capabilities
        );
        device
    }

    /// Record a device removal
    ///
    /// Devices without a fingerprint are forgotten entirely.
    pub fn detach(&mut self, id: DeviceId) -> Result<Device, StaleReference> {
        let device = self
            .devices
            .get_mut(&id)
            .filter(|d| d.state == ConnectionState::Attached)
            .ok_or(StaleReference::new(ObjectKind::Device, id.0))?;

        device.state = ConnectionState::Detached;
        let snapshot = device.clone();
        if snapshot.fingerprint.is_none() {
            self.devices.remove(&id);
        }

        info!("Device detached: {} ({:?})", snapshot.name, id);
        Ok(snapshot)
    }

    /// Get an attached device
    pub fn get(&self, id: DeviceId) -> Result<&Device, StaleReference> {
        self.devices
            .get(&id)
            .filter(|d| d.state == ConnectionState::Attached)
            .ok_or(StaleReference::new(ObjectKind::Device, id.0))
    }

    /// Get a device record regardless of its connection state
    pub fn record(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Map a device's absolute events onto an output
    pub fn map_to_output(
        &mut self,
        id: DeviceId,
        output: Option<OutputId>,
    ) -> Result<(), StaleReference> {
        let device = self
            .devices
            .get_mut(&id)
            .ok_or(StaleReference::new(ObjectKind::Device, id.0))?;
        device.mapped_output = output;
        Ok(())
    }

    /// Drop every mapping onto a removed output
    pub fn output_removed(&mut self, output: OutputId) {
        for device in self.devices.values_mut() {
            if device.mapped_output == Some(output) {
                debug!("Unmapping {} from removed output {:?}", device.name, output);
                device.mapped_output = None;
            }
        }
    }

    /// Iterate attached devices
    pub fn attached(&self) -> impl Iterator<Item = &Device> {
        self.devices
            .values()
            .filter(|d| d.state == ConnectionState::Attached)
    }

    /// Union of capabilities of attached devices on a seat
    pub fn seat_capabilities(&self, seat: &str) -> DeviceCapabilities {
        self.attached()
            .filter(|d| d.seat == seat)
            .fold(DeviceCapabilities::empty(), |caps, d| caps | d.capabilities)
    }

    /// Number of attached devices
    pub fn len(&self) -> usize {
        self.attached().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyboard() -> DeviceInfo {
        DeviceInfo::new("kbd", DeviceCapabilities::KEYBOARD)
    }

    #[test]
    fn test_attach_detach() {
        let mut registry = DeviceRegistry::new();
        let adapter = AdapterId::new();
        let id = DeviceId::new();

        registry.attach(id, adapter, keyboard(), "seat0");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().seat, "seat0");

        let removed = registry.detach(id).unwrap();
        assert_eq!(removed.state, ConnectionState::Detached);
        assert!(registry.get(id).is_err());
        // No fingerprint, nothing kept
        assert!(registry.record(id).is_none());
    }

    #[test]
    fn test_fingerprinted_device_keeps_record() {
        let mut registry = DeviceRegistry::new();
        let adapter = AdapterId::new();
        let id = DeviceId::new();
        let output = OutputId::new();

        registry.attach(id, adapter, keyboard().with_fingerprint("046d:c31c"), "seat0");
        registry.map_to_output(id, Some(output)).unwrap();
        registry.detach(id).unwrap();

        assert_eq!(
            registry.record(id).map(|d| d.state),
            Some(ConnectionState::Detached)
        );

        registry.attach(id, adapter, keyboard().with_fingerprint("046d:c31c"), "seat0");
        assert_eq!(registry.get(id).unwrap().mapped_output, Some(output));
    }

    #[test]
    fn test_double_detach_is_stale() {
        let mut registry = DeviceRegistry::new();
        let id = DeviceId::new();
        registry.attach(id, AdapterId::new(), keyboard(), "seat0");
        registry.detach(id).unwrap();

        let err = registry.detach(id).unwrap_err();
        assert_eq!(err.kind, ObjectKind::Device);
    }

    #[test]
    fn test_seat_capabilities() {
        let mut registry = DeviceRegistry::new();
        let adapter = AdapterId::new();
        registry.attach(DeviceId::new(), adapter, keyboard(), "seat0");
        registry.attach(
            DeviceId::new(),
            adapter,
            DeviceInfo::new("touchscreen", DeviceCapabilities::TOUCH).with_seat("seat1"),
            "seat0",
        );

        assert_eq!(
            registry.seat_capabilities("seat0"),
            DeviceCapabilities::KEYBOARD
        );
        assert_eq!(registry.seat_capabilities("seat1"), DeviceCapabilities::TOUCH);
    }

    #[test]
    fn test_output_removed_unmaps() {
        let mut registry = DeviceRegistry::new();
        let id = DeviceId::new();
        let output = OutputId::new();
        registry.attach(
            id,
            AdapterId::new(),
            DeviceInfo::new("tablet", DeviceCapabilities::TABLET),
            "seat0",
        );
        registry.map_to_output(id, Some(output)).unwrap();
        registry.output_removed(output);
        assert_eq!(registry.get(id).unwrap().mapped_output, None);
    }
}
