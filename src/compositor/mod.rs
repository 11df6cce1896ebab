//! Compositor core module
//!
//! This module contains the core compositor logic including:
//! - Global compositor state and the dispatch cycle
//! - Input device and client surface registries
//! - Output description and the global output layout

pub mod device;
pub mod layout;
pub mod output;
pub mod state;
pub mod surface;

pub use device::{ConnectionState, Device, DeviceCapabilities, DeviceId, DeviceInfo, DeviceRegistry};
pub use layout::{LayoutError, OutputLayoutManager, Placement};
pub use output::{Output, OutputId, OutputInfo, OutputMode, OutputTransform, Subpixel};
pub use state::{Compositor, DispatchReport};
pub use surface::{
    BufferInfo, BufferTransform, ClientSurface, InputRegion, SurfaceId, SurfaceRef,
    SurfaceRegistry,
};
