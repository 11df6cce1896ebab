//! Output/display description
//!
//! An [`Output`] is what a backend adapter reports about a display plus the
//! global identity the multiplexer assigned to it. Its position lives in the
//! layout, its pending damage in the frame scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::utils::Size;

/// Unique identifier for outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

impl OutputId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OutputId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Output transform (rotation/flip)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl OutputTransform {
    /// Whether the transform swaps width and height
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            OutputTransform::Rotate90
                | OutputTransform::Rotate270
                | OutputTransform::Flipped90
                | OutputTransform::Flipped270
        )
    }

    /// Apply the transform to a mode size
    pub fn transform_size(&self, size: Size) -> Size {
        if self.swaps_axes() {
            Size::new(size.h, size.w)
        } else {
            size
        }
    }
}

/// Output subpixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

/// An output mode (resolution + refresh rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Refresh rate in mHz (e.g., 60000 for 60Hz), 0 if unknown
    pub refresh: u32,
}

impl OutputMode {
    pub fn new(width: i32, height: i32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Duration of one refresh cycle, if the refresh rate is known
    pub fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh == 0 {
            return None;
        }
        Some(Duration::from_nanos(1_000_000_000_000 / self.refresh as u64))
    }
}

/// What a backend adapter reports about a newly discovered output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    /// Connector name (e.g., "eDP-1")
    pub name: String,
    pub make: String,
    pub model: String,
    pub serial: String,
    /// Physical size in millimeters
    pub physical_size: Size,
    pub subpixel: Subpixel,
    pub transform: OutputTransform,
    /// Available modes
    pub modes: Vec<OutputMode>,
    /// Index of the current mode in `modes`
    pub current_mode: Option<usize>,
    /// Scale factor
    pub scale: f64,
}

impl OutputInfo {
    /// An output with a single current mode
    pub fn new(name: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            name: name.into(),
            make: String::new(),
            model: String::new(),
            serial: String::new(),
            physical_size: Size::default(),
            subpixel: Subpixel::Unknown,
            transform: OutputTransform::Normal,
            modes: vec![mode],
            current_mode: Some(0),
            scale: 1.0,
        }
    }

    /// Set make, model and serial number
    pub fn with_edid(
        mut self,
        make: impl Into<String>,
        model: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        self.make = make.into();
        self.model = model.into();
        self.serial = serial.into();
        self
    }

    /// Stable hardware fingerprint, when the display reports a serial
    pub fn fingerprint(&self) -> Option<String> {
        if self.serial.is_empty() {
            None
        } else {
            Some(format!("{}:{}:{}", self.make, self.model, self.serial))
        }
    }
}

/// A display output (monitor)
#[derive(Debug, Clone)]
pub struct Output {
    /// Unique identifier
    pub id: OutputId,
    /// Output name (e.g., "eDP-1")
    pub name: String,
    /// Manufacturer name
    pub make: String,
    /// Model name
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Physical size in millimeters
    pub physical_size: Size,
    /// Transform applied to output
    pub transform: OutputTransform,
    /// Subpixel layout
    pub subpixel: Subpixel,
    /// Available modes
    pub modes: Vec<OutputMode>,
    /// Current mode index
    pub current_mode: Option<usize>,
    /// Scale factor
    pub scale: f64,
}

impl Output {
    /// Create an output from what the adapter reported
    pub fn new(id: OutputId, info: OutputInfo) -> Self {
        Self {
            id,
            name: info.name,
            make: info.make,
            model: info.model,
            serial: info.serial,
            physical_size: info.physical_size,
            transform: info.transform,
            subpixel: info.subpixel,
            modes: info.modes,
            current_mode: info.current_mode,
            scale: if info.scale > 0.0 { info.scale } else { 1.0 },
        }
    }

    /// Get the current mode
    pub fn current_mode(&self) -> Option<&OutputMode> {
        self.current_mode.and_then(|i| self.modes.get(i))
    }

    /// Switch to `mode`, adding it to the mode list if it is new
    pub fn set_mode(&mut self, mode: OutputMode) {
        let index = match self.modes.iter().position(|m| *m == mode) {
            Some(index) => index,
            None => {
                self.modes.push(mode);
                self.modes.len() - 1
            }
        };
        self.current_mode = Some(index);
    }

    /// Size in layout coordinates after transform and scale
    pub fn logical_size(&self) -> Size {
        let Some(mode) = self.current_mode() else {
            return Size::default();
        };
        let size = self.transform.transform_size(mode.size());
        Size::new(
            (size.w as f64 / self.scale).round() as i32,
            (size.h as f64 / self.scale).round() as i32,
        )
    }

    /// Refresh interval of the current mode
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.current_mode().and_then(OutputMode::refresh_interval)
    }
}
