//! Backend multiplexer
//!
//! Owns every attached adapter and merges what they report into one stream
//! of [`MuxEvent`]s keyed by global ids. Each event carries a sequence number
//! that increases per adapter; output discoveries also get a global discovery
//! number so arrangement does not depend on which adapter was polled first.
//!
//! Adapters prove liveness by producing events. One that stays silent past
//! the heartbeat timeout on more consecutive checks than the retry limit
//! allows is detached by force.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use super::identity::IdentityTable;
use super::{AdapterId, BackendAdapter, BackendEvent, Committed, LocalHandle};
use crate::compositor::{DeviceId, DeviceInfo, OutputId, OutputInfo, OutputMode};
use crate::error::{ObjectKind, StaleReference};
use crate::input::InputEvent;
use crate::renderer::{ComposedFrame, RenderError};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("unknown adapter {0:?}")]
    UnknownAdapter(AdapterId),
    #[error("frame for output {output:?} failed: {source}")]
    Render {
        output: OutputId,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Stale(#[from] StaleReference),
}

/// A normalized backend event
#[derive(Debug, Clone, PartialEq)]
pub struct MuxEvent {
    pub adapter: AdapterId,
    /// Per-adapter, strictly increasing
    pub seq: u64,
    pub kind: MuxEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MuxEventKind {
    DeviceAdded { device: DeviceId, info: DeviceInfo },
    DeviceRemoved { device: DeviceId },
    OutputAdded {
        output: OutputId,
        info: OutputInfo,
        discovery: u64,
    },
    OutputRemoved { output: OutputId },
    OutputModeChanged { output: OutputId, mode: OutputMode },
    Input { device: DeviceId, event: InputEvent },
}

/// An adapter detached for not responding
#[derive(Debug)]
pub struct ForcedDetach {
    pub adapter: AdapterId,
    pub name: String,
    /// Removal events for everything the adapter owned
    pub removals: Vec<MuxEvent>,
}

struct AdapterSlot {
    adapter: Box<dyn BackendAdapter>,
    last_seen: Instant,
    /// Consecutive overdue heartbeat checks
    strikes: u32,
    seq: u64,
    devices: BTreeMap<LocalHandle, DeviceId>,
    outputs: BTreeMap<LocalHandle, OutputId>,
}

impl AdapterSlot {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn heartbeat_deadline(&self, timeout: Duration) -> Instant {
        self.last_seen + timeout * (self.strikes + 1)
    }
}

/// Aggregates all backend adapters
pub struct BackendMultiplexer {
    adapters: BTreeMap<AdapterId, AdapterSlot>,
    identities: IdentityTable,
    /// Which adapter drives each output
    output_owners: HashMap<OutputId, (AdapterId, LocalHandle)>,
    next_discovery: u64,
    heartbeat_timeout: Duration,
    retry_limit: u32,
}

impl BackendMultiplexer {
    pub fn new(heartbeat_timeout: Duration, retry_limit: u32) -> Self {
        Self {
            adapters: BTreeMap::new(),
            identities: IdentityTable::new(),
            output_owners: HashMap::new(),
            next_discovery: 0,
            heartbeat_timeout,
            retry_limit,
        }
    }

    /// Register an adapter; its events are forwarded from the next poll on
    pub fn attach(&mut self, adapter: Box<dyn BackendAdapter>, now: Instant) -> AdapterId {
        let id = AdapterId::new();
        info!(
            "Attaching {:?} adapter {} as {:?}",
            adapter.kind(),
            adapter.name(),
            id
        );
        self.adapters.insert(
            id,
            AdapterSlot {
                adapter,
                last_seen: now,
                strikes: 0,
                seq: 0,
                devices: BTreeMap::new(),
                outputs: BTreeMap::new(),
            },
        );
        id
    }

    /// Stop forwarding an adapter's events
    ///
    /// Returns a removal for every device, then every output, it still owned.
    pub fn detach(&mut self, id: AdapterId) -> Result<Vec<MuxEvent>, MuxError> {
        let mut slot = self
            .adapters
            .remove(&id)
            .ok_or(MuxError::UnknownAdapter(id))?;
        info!("Detaching adapter {} ({:?})", slot.adapter.name(), id);

        let mut removals = Vec::with_capacity(slot.devices.len() + slot.outputs.len());
        for device in std::mem::take(&mut slot.devices).into_values() {
            self.identities.release_device(device);
            removals.push(MuxEvent {
                adapter: id,
                seq: slot.next_seq(),
                kind: MuxEventKind::DeviceRemoved { device },
            });
        }
        for output in std::mem::take(&mut slot.outputs).into_values() {
            self.identities.release_output(output);
            self.output_owners.remove(&output);
            removals.push(MuxEvent {
                adapter: id,
                seq: slot.next_seq(),
                kind: MuxEventKind::OutputRemoved { output },
            });
        }
        Ok(removals)
    }

    /// Drain every adapter, in attachment order
    pub fn poll(&mut self, now: Instant) -> Vec<MuxEvent> {
        let mut events = Vec::new();
        for (&id, slot) in self.adapters.iter_mut() {
            let raw: Vec<BackendEvent> = slot.adapter.poll().collect();
            if raw.is_empty() {
                continue;
            }
            slot.last_seen = now;
            slot.strikes = 0;

            for event in raw {
                let kind = match Self::normalize(
                    &mut self.identities,
                    &mut self.output_owners,
                    &mut self.next_discovery,
                    id,
                    slot,
                    event,
                ) {
                    Some(kind) => kind,
                    None => continue,
                };
                events.push(MuxEvent {
                    adapter: id,
                    seq: slot.next_seq(),
                    kind,
                });
            }
        }
        events
    }

    fn normalize(
        identities: &mut IdentityTable,
        output_owners: &mut HashMap<OutputId, (AdapterId, LocalHandle)>,
        next_discovery: &mut u64,
        id: AdapterId,
        slot: &mut AdapterSlot,
        event: BackendEvent,
    ) -> Option<MuxEventKind> {
        let name = slot.adapter.name();
        match event {
            BackendEvent::Heartbeat => None,
            BackendEvent::DeviceAdded { handle, info } => {
                if slot.devices.contains_key(&handle) {
                    warn!("{}: device handle {} added twice, ignoring", name, handle);
                    return None;
                }
                let device = identities.acquire_device(info.fingerprint.as_deref());
                slot.devices.insert(handle, device);
                Some(MuxEventKind::DeviceAdded { device, info })
            }
            BackendEvent::DeviceRemoved { handle } => match slot.devices.remove(&handle) {
                Some(device) => {
                    identities.release_device(device);
                    Some(MuxEventKind::DeviceRemoved { device })
                }
                None => {
                    warn!("{}: removal of unknown device handle {}", name, handle);
                    None
                }
            },
            BackendEvent::OutputAdded { handle, info } => {
                if slot.outputs.contains_key(&handle) {
                    warn!("{}: output handle {} added twice, ignoring", name, handle);
                    return None;
                }
                let output = identities.acquire_output(info.fingerprint().as_deref());
                slot.outputs.insert(handle, output);
                output_owners.insert(output, (id, handle));
                *next_discovery += 1;
                Some(MuxEventKind::OutputAdded {
                    output,
                    info,
                    discovery: *next_discovery,
                })
            }
            BackendEvent::OutputRemoved { handle } => match slot.outputs.remove(&handle) {
                Some(output) => {
                    identities.release_output(output);
                    output_owners.remove(&output);
                    Some(MuxEventKind::OutputRemoved { output })
                }
                None => {
                    warn!("{}: removal of unknown output handle {}", name, handle);
                    None
                }
            },
            BackendEvent::OutputModeChanged { handle, mode } => match slot.outputs.get(&handle) {
                Some(&output) => Some(MuxEventKind::OutputModeChanged { output, mode }),
                None => {
                    warn!("{}: mode change on unknown output handle {}", name, handle);
                    None
                }
            },
            BackendEvent::Input { device, event } => match slot.devices.get(&device) {
                Some(&device) => Some(MuxEventKind::Input { device, event }),
                None => {
                    debug!("{}: input from unknown device handle {}", name, device);
                    None
                }
            },
        }
    }

    /// Detach adapters that have been silent for too long
    pub fn check_heartbeats(&mut self, now: Instant) -> Vec<ForcedDetach> {
        let timeout = self.heartbeat_timeout;
        let mut expired = Vec::new();
        for (&id, slot) in self.adapters.iter_mut() {
            if now < slot.heartbeat_deadline(timeout) {
                continue;
            }
            slot.strikes += 1;
            if slot.strikes > self.retry_limit {
                expired.push(id);
            } else {
                debug!(
                    "Adapter {} missed heartbeat ({}/{})",
                    slot.adapter.name(),
                    slot.strikes,
                    self.retry_limit
                );
            }
        }

        let mut detached = Vec::with_capacity(expired.len());
        for id in expired {
            let name = self
                .adapters
                .get(&id)
                .map(|slot| slot.adapter.name().to_string())
                .unwrap_or_default();
            warn!("Adapter {} ({:?}) is unresponsive, detaching", name, id);
            if let Ok(removals) = self.detach(id) {
                detached.push(ForcedDetach {
                    adapter: id,
                    name,
                    removals,
                });
            }
        }
        detached
    }

    /// When the next heartbeat check could detach or strike an adapter
    pub fn next_heartbeat_deadline(&self) -> Option<Instant> {
        self.adapters
            .values()
            .map(|slot| slot.heartbeat_deadline(self.heartbeat_timeout))
            .min()
    }

    /// The adapter driving an output
    pub fn output_adapter_mut(
        &mut self,
        output: OutputId,
    ) -> Result<(&mut dyn BackendAdapter, LocalHandle), StaleReference> {
        let stale = StaleReference::new(ObjectKind::Output, output.0);
        let (adapter, handle) = *self.output_owners.get(&output).ok_or(stale)?;
        let slot = self.adapters.get_mut(&adapter).ok_or(stale)?;
        Ok((slot.adapter.as_mut(), handle))
    }

    /// Forward a composed frame to the adapter owning its output
    pub fn submit_frame(
        &mut self,
        output: OutputId,
        frame: &ComposedFrame,
    ) -> Result<Committed, MuxError> {
        let (adapter, handle) = self.output_adapter_mut(output)?;
        adapter
            .submit_frame(handle, frame)
            .map_err(|source| MuxError::Render { output, source })
    }

    pub fn adapter_name(&self, id: AdapterId) -> Option<&str> {
        self.adapters.get(&id).map(|slot| slot.adapter.name())
    }

    /// Attached adapters, in attachment order
    pub fn adapters(&self) -> impl Iterator<Item = AdapterId> + '_ {
        self.adapters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
