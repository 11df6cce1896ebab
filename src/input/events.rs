//! Input event types
//!
//! [`InputEvent`] is what adapters report, device-relative and untargeted.
//! The router turns it into one or more [`RoutedEvent`]s addressed to a
//! surface (or to nobody).

use crate::compositor::{OutputId, SurfaceId};
use crate::input::keyboard::ModifierState;
use crate::utils::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrientation {
    Vertical,
    Horizontal,
}

/// A raw event from an input device
///
/// Absolute positions (touch, tablet, absolute pointer motion) are
/// normalized to `0.0..=1.0` over the area the device is mapped to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    /// Timestamp in milliseconds
    pub time: u32,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn new(time: u32, kind: InputKind) -> Self {
        Self { time, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    PointerMotion { dx: f64, dy: f64 },
    PointerMotionAbsolute { x: f64, y: f64 },
    PointerButton { button: u32, state: ButtonState },
    PointerAxis { orientation: AxisOrientation, delta: f64 },
    Key { keycode: u32, state: KeyState },
    Modifiers(ModifierState),
    TouchDown { slot: i32, x: f64, y: f64 },
    TouchMotion { slot: i32, x: f64, y: f64 },
    TouchUp { slot: i32 },
    TouchCancel,
    TouchFrame,
    TabletProximity { x: f64, y: f64, in_proximity: bool },
    TabletAxis { x: f64, y: f64, pressure: f64 },
    TabletTip { x: f64, y: f64, down: bool },
    TabletButton { button: u32, state: ButtonState },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEventKind {
    Motion,
    Button { button: u32, state: ButtonState },
    Axis { orientation: AxisOrientation, delta: f64 },
}

/// A pointer event addressed to a surface, or to nobody
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub surface: Option<SurfaceId>,
    pub output: Option<OutputId>,
    /// Cursor position in the global layout
    pub position: Point,
    /// Position relative to `surface`, or the global position without one
    pub local: Point,
    pub kind: PointerEventKind,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyboardEventKind {
    Key { keycode: u32, state: KeyState },
    Modifiers(ModifierState),
}

/// A keyboard event for the focused surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardEvent {
    pub surface: SurfaceId,
    pub kind: KeyboardEventKind,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEventKind {
    Down,
    Motion,
    Up,
    Cancel,
    Frame,
}

/// A touch event for the surface a touch point is pinned to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub surface: Option<SurfaceId>,
    /// Touch point; `None` for cancel and frame
    pub slot: Option<i32>,
    pub position: Point,
    pub local: Point,
    pub kind: TouchEventKind,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TabletEventKind {
    Proximity { in_proximity: bool },
    Axis { pressure: f64 },
    Tip { down: bool },
    Button { button: u32, state: ButtonState },
}

/// A tablet tool event addressed to the surface under the tool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TabletEvent {
    pub surface: Option<SurfaceId>,
    pub output: Option<OutputId>,
    pub position: Point,
    pub local: Point,
    pub kind: TabletEventKind,
    pub time: u32,
}

/// The outcome of routing one raw event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutedEvent {
    Pointer(PointerEvent),
    Keyboard(KeyboardEvent),
    Touch(TouchEvent),
    Tablet(TabletEvent),
}

impl RoutedEvent {
    /// The surface the event is addressed to
    pub fn surface(&self) -> Option<SurfaceId> {
        match self {
            RoutedEvent::Pointer(e) => e.surface,
            RoutedEvent::Keyboard(e) => Some(e.surface),
            RoutedEvent::Touch(e) => e.surface,
            RoutedEvent::Tablet(e) => e.surface,
        }
    }
}
