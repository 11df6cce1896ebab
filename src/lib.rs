//! Waymux - backend, output and input coordination for Wayland compositors
//!
//! Waymux sits between the sources of hardware (DRM/KMS, libinput, a nesting
//! host, a headless test backend) and the part of a compositor that talks to
//! clients. It merges all sources into one ordered event stream, keeps the
//! global output layout, paces frames per output, and routes input to the
//! client surfaces that should receive it.
//!
//! # Architecture
//!
//! - **Backend**: [`backend::BackendAdapter`] implementations behind a
//!   [`backend::BackendMultiplexer`], driven by a calloop event loop
//! - **Compositor Core**: device and surface registries, output layout, and
//!   the [`Compositor`] that ties one dispatch turn together
//! - **Renderer**: per-output frame scheduling and frame composition
//! - **Input**: routing of raw events to surfaces, and seats owning focus
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//! use waymux::backend::{EventLoop, HeadlessAdapter};
//! use waymux::compositor::{OutputInfo, OutputMode};
//! use waymux::{Compositor, Config};
//!
//! let mut compositor = Compositor::new(Config::default());
//! let (adapter, handle) = HeadlessAdapter::new("headless");
//! compositor.attach_adapter(Box::new(adapter), Instant::now());
//! handle.add_output(OutputInfo::new("HEADLESS-1", OutputMode::new(1920, 1080, 60_000)));
//!
//! let mut event_loop = EventLoop::new()?;
//! event_loop.run(&mut compositor)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod renderer;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use compositor::Compositor;
pub use config::Config;
pub use error::CompositorError;
