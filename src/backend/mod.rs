//! Backend module
//!
//! This module contains the backend side of the compositor:
//! - The [`BackendAdapter`] trait every device/output source implements
//! - The multiplexer merging all adapters into one event stream
//! - Headless and queued (threaded acquisition) adapters
//! - Event loop integration with calloop

pub mod event_loop;
pub mod headless;
pub mod identity;
pub mod multiplexer;
pub mod queued;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::compositor::{DeviceInfo, OutputInfo, OutputMode};
use crate::input::InputEvent;
use crate::renderer::{ComposedFrame, RenderError};

pub use event_loop::EventLoop;
pub use headless::{HeadlessAdapter, HeadlessHandle};
pub use identity::IdentityTable;
pub use multiplexer::{BackendMultiplexer, ForcedDetach, MuxError, MuxEvent, MuxEventKind};
pub use queued::{AdapterQueue, QueuedAdapter};

/// Unique identifier for attached adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(pub u64);

impl AdapterId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        AdapterId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where an adapter gets its devices and outputs from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Kernel modesetting
    Drm,
    /// Input devices through libinput
    Libinput,
    /// Nested inside another Wayland compositor
    NestedWayland,
    /// Nested inside an X11 server
    NestedX11,
    /// Virtual outputs and devices
    Headless,
}

/// An adapter's own name for one of its devices or outputs
pub type LocalHandle = u64;

/// What an adapter reports, in its own handles
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    DeviceAdded { handle: LocalHandle, info: DeviceInfo },
    DeviceRemoved { handle: LocalHandle },
    OutputAdded { handle: LocalHandle, info: OutputInfo },
    OutputRemoved { handle: LocalHandle },
    OutputModeChanged { handle: LocalHandle, mode: OutputMode },
    Input { device: LocalHandle, event: InputEvent },
    /// Liveness only
    Heartbeat,
}

/// A frame the adapter fully committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    /// Adapter-side frame counter
    pub seq: u64,
    /// Presentation time in milliseconds, passed to frame callbacks
    pub time: u32,
}

/// A source of devices and outputs
///
/// Adapters never block: `poll` returns whatever is ready.
pub trait BackendAdapter {
    fn kind(&self) -> AdapterKind;

    fn name(&self) -> &str;

    /// Events produced since the last poll
    fn poll(&mut self) -> Box<dyn Iterator<Item = BackendEvent> + '_>;

    /// Present a composed frame on one of the adapter's outputs
    ///
    /// `Ok` means the whole frame reached the screen.
    fn submit_frame(
        &mut self,
        output: LocalHandle,
        frame: &ComposedFrame,
    ) -> Result<Committed, RenderError>;
}
