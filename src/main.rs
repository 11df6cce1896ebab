//! Waymux - headless compositor core
//!
//! Runs the coordination core against a headless adapter with one virtual
//! output, keyboard and pointer. Useful for exercising configuration and
//! watching the event flow with `RUST_LOG=debug`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use log::info;

use waymux::backend::{EventLoop, HeadlessAdapter};
use waymux::compositor::{DeviceCapabilities, DeviceInfo, OutputInfo, OutputMode};
use waymux::{Compositor, Config};

const DEFAULT_CONFIG: &str = "waymux.toml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("WAYMUX_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = config_path();
    let config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!("Starting waymux on seat {}", config.seat_name);

    let mut compositor = Compositor::new(config);
    let (adapter, handle) = HeadlessAdapter::new("headless");
    compositor.attach_adapter(Box::new(adapter), Instant::now());

    handle.add_output(OutputInfo::new(
        "HEADLESS-1",
        OutputMode::new(1920, 1080, 60_000),
    ));
    handle.add_device(DeviceInfo::new(
        "virtual-keyboard",
        DeviceCapabilities::KEYBOARD,
    ));
    handle.add_device(DeviceInfo::new("virtual-pointer", DeviceCapabilities::POINTER));

    let mut event_loop = EventLoop::new()?;
    event_loop.run(&mut compositor)
}
