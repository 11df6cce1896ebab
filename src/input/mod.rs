//! Input handling module
//!
//! This module provides input events, routing, and seat management.

pub mod events;
pub mod keyboard;
pub mod pointer;
pub mod router;
pub mod seat;

pub use events::{
    AxisOrientation, ButtonState, InputEvent, InputKind, KeyState, KeyboardEvent,
    KeyboardEventKind, PointerEvent, PointerEventKind, RoutedEvent, TabletEvent,
    TabletEventKind, TouchEvent, TouchEventKind,
};
pub use keyboard::{KeyTransition, Keyboard, ModifierState};
pub use pointer::Pointer;
pub use router::{InputRouter, RouteContext, RouteError};
pub use seat::{FocusChange, FocusClass, FocusNotification, FocusState, Seat, SeatCoordinator};
