//! Input seat coordination
//!
//! A seat groups the input devices one user operates and owns that user's
//! focus. The [`SeatCoordinator`] is the only place focus changes: the
//! router reads [`FocusState`] to address events and the seat applies the
//! outcome afterwards.

use std::collections::BTreeMap;

use log::{debug, info, trace, warn};

use super::events::{
    ButtonState, KeyboardEventKind, PointerEventKind, RoutedEvent, TabletEventKind,
    TouchEventKind,
};
use super::keyboard::{KeyTransition, Keyboard};
use super::Pointer;
use crate::compositor::{
    DeviceCapabilities, DeviceRegistry, OutputLayoutManager, SurfaceId, SurfaceRegistry,
};
use crate::error::StaleReference;
use crate::utils::Point;

/// Which focus a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusClass {
    Keyboard,
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Enter,
    Leave,
}

/// Sent to a surface when it gains or loses focus
#[derive(Debug, Clone, PartialEq)]
pub struct FocusNotification {
    pub seat: String,
    pub class: FocusClass,
    pub change: FocusChange,
    pub surface: SurfaceId,
    /// Surface-local pointer position on pointer enter
    pub position: Option<Point>,
}

/// Focus of one seat
///
/// Touch points map to the surface they were pinned to at touch-down, or to
/// `None` when the touch went down over nothing or its surface is gone.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FocusState {
    keyboard: Option<SurfaceId>,
    pointer: Option<SurfaceId>,
    touch: BTreeMap<i32, Option<SurfaceId>>,
}

impl FocusState {
    pub fn keyboard(&self) -> Option<SurfaceId> {
        self.keyboard
    }

    pub fn pointer(&self) -> Option<SurfaceId> {
        self.pointer
    }

    /// Surface a touch point is pinned to; `None` for an unknown slot
    pub fn touch_target(&self, slot: i32) -> Option<Option<SurfaceId>> {
        self.touch.get(&slot).copied()
    }

    /// Active touch points
    pub fn touch_points(&self) -> impl Iterator<Item = (i32, Option<SurfaceId>)> + '_ {
        self.touch.iter().map(|(slot, surface)| (*slot, *surface))
    }

    /// Distinct surfaces with at least one touch point pinned to them
    pub fn touched_surfaces(&self) -> Vec<SurfaceId> {
        let mut surfaces: Vec<SurfaceId> = self.touch.values().flatten().copied().collect();
        surfaces.sort_unstable();
        surfaces.dedup();
        surfaces
    }

    /// Whether anything in this state still refers to `surface`
    pub fn references(&self, surface: SurfaceId) -> bool {
        self.keyboard == Some(surface)
            || self.pointer == Some(surface)
            || self.touch.values().any(|s| *s == Some(surface))
    }
}

/// Input seat that coordinates keyboard, pointer, touch and tablet
#[derive(Debug)]
pub struct Seat {
    /// Seat name
    name: String,
    /// Keyboard device
    keyboard: Keyboard,
    /// Pointer device
    pointer: Pointer,
    /// Union of the attached devices' capabilities
    capabilities: DeviceCapabilities,
    focus: FocusState,
    /// Last known tablet tool position, while in proximity
    tablet_position: Option<Point>,
}

impl Seat {
    /// Create a seat with a specific name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyboard: Keyboard::new(),
            pointer: Pointer::new(),
            capabilities: DeviceCapabilities::empty(),
            focus: FocusState::default(),
            tablet_position: None,
        }
    }

    /// Get the seat name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get seat capabilities
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Set seat capabilities
    ///
    /// Losing touch drops every active touch point; losing the last keyboard
    /// forgets held keys and modifiers.
    pub fn set_capabilities(&mut self, capabilities: DeviceCapabilities) {
        if self.capabilities == capabilities {
            return;
        }
        if !capabilities.contains(DeviceCapabilities::TOUCH) && !self.focus.touch.is_empty() {
            debug!("Seat {}: touch gone, dropping touch points", self.name);
            self.focus.touch.clear();
        }
        if !capabilities.contains(DeviceCapabilities::KEYBOARD) {
            self.keyboard.reset();
        }
        if !capabilities.contains(DeviceCapabilities::TABLET) {
            self.tablet_position = None;
        }
        info!(
            "Seat {} capabilities: {:?} -> {:?}",
            self.name, self.capabilities, capabilities
        );
        self.capabilities = capabilities;
    }

    /// Get keyboard reference
    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    /// Get pointer reference
    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn focus(&self) -> &FocusState {
        &self.focus
    }

    pub fn tablet_position(&self) -> Option<Point> {
        self.tablet_position
    }

    /// Move keyboard focus
    ///
    /// The new target is checked before anything changes. The previous
    /// surface is told it lost focus before the new one is told it gained it.
    pub fn set_keyboard_focus(
        &mut self,
        surface: Option<SurfaceId>,
        surfaces: &SurfaceRegistry,
    ) -> Result<Vec<FocusNotification>, StaleReference> {
        if self.focus.keyboard == surface {
            return Ok(Vec::new());
        }
        let entering = surface.map(|id| surfaces.get(id).map(|s| (id, s))).transpose()?;
        let old = std::mem::replace(&mut self.focus.keyboard, surface);
        debug!("Seat {}: keyboard focus {:?} -> {:?}", self.name, old, surface);

        let mut notifications = Vec::with_capacity(2);
        if let Some(old) = old {
            let leave = self.notification(FocusClass::Keyboard, FocusChange::Leave, old, None);
            if let Some(handle) = surfaces.get_alive(old) {
                handle.on_focus(&leave);
            }
            notifications.push(leave);
        }
        if let Some((id, handle)) = entering {
            let enter = self.notification(FocusClass::Keyboard, FocusChange::Enter, id, None);
            handle.on_focus(&enter);
            notifications.push(enter);
        }
        Ok(notifications)
    }

    /// Move pointer focus; `local` is the surface-local position on enter
    pub fn set_pointer_focus(
        &mut self,
        surface: Option<SurfaceId>,
        local: Point,
        surfaces: &SurfaceRegistry,
    ) -> Result<Vec<FocusNotification>, StaleReference> {
        if self.focus.pointer == surface {
            return Ok(Vec::new());
        }
        let entering = surface.map(|id| surfaces.get(id).map(|s| (id, s))).transpose()?;
        let old = std::mem::replace(&mut self.focus.pointer, surface);
        debug!("Seat {}: pointer focus {:?} -> {:?}", self.name, old, surface);

        let mut notifications = Vec::with_capacity(2);
        if let Some(old) = old {
            let leave = self.notification(FocusClass::Pointer, FocusChange::Leave, old, None);
            if let Some(handle) = surfaces.get_alive(old) {
                handle.on_focus(&leave);
            }
            notifications.push(leave);
        }
        if let Some((id, handle)) = entering {
            let enter =
                self.notification(FocusClass::Pointer, FocusChange::Enter, id, Some(local));
            handle.on_focus(&enter);
            notifications.push(enter);
        }
        Ok(notifications)
    }

    /// Drop every reference to a destroyed surface
    ///
    /// Touch points pinned to it stay alive but now lead nowhere.
    pub fn surface_destroyed(&mut self, surface: SurfaceId) -> Vec<FocusNotification> {
        let mut notifications = Vec::new();
        if self.focus.keyboard == Some(surface) {
            self.focus.keyboard = None;
            notifications.push(self.notification(
                FocusClass::Keyboard,
                FocusChange::Leave,
                surface,
                None,
            ));
        }
        if self.focus.pointer == Some(surface) {
            self.focus.pointer = None;
            notifications.push(self.notification(
                FocusClass::Pointer,
                FocusChange::Leave,
                surface,
                None,
            ));
        }
        for target in self.focus.touch.values_mut() {
            if *target == Some(surface) {
                *target = None;
            }
        }
        if !notifications.is_empty() {
            debug!("Seat {}: focus cleared for destroyed {:?}", self.name, surface);
        }
        notifications
    }

    /// Update seat state with the outcome of routing
    ///
    /// Returns false for keyboard events that change nothing; those are not
    /// worth delivering.
    pub fn apply(&mut self, event: &RoutedEvent) -> bool {
        match event {
            RoutedEvent::Pointer(e) => match e.kind {
                PointerEventKind::Motion => self.pointer.motion(e.position),
                PointerEventKind::Button { button, state } => match state {
                    ButtonState::Pressed => {
                        self.pointer.button_press(button);
                    }
                    ButtonState::Released => {
                        self.pointer.button_release(button);
                    }
                },
                PointerEventKind::Axis { .. } => {}
            },
            RoutedEvent::Keyboard(e) => {
                return match e.kind {
                    KeyboardEventKind::Key { keycode, state } => {
                        self.keyboard.key(keycode, state) != KeyTransition::Redundant
                    }
                    KeyboardEventKind::Modifiers(modifiers) => {
                        self.keyboard.set_modifiers(modifiers)
                    }
                };
            }
            RoutedEvent::Touch(e) => match (e.kind, e.slot) {
                (TouchEventKind::Down, Some(slot)) => {
                    if self.focus.touch.insert(slot, e.surface).is_some() {
                        warn!("Seat {}: touch slot {} went down twice", self.name, slot);
                    }
                }
                (TouchEventKind::Up, Some(slot)) => {
                    self.focus.touch.remove(&slot);
                }
                (TouchEventKind::Cancel, _) => self.focus.touch.clear(),
                _ => {}
            },
            RoutedEvent::Tablet(e) => match e.kind {
                TabletEventKind::Proximity {
                    in_proximity: false,
                } => self.tablet_position = None,
                TabletEventKind::Button { .. } => {}
                _ => self.tablet_position = Some(e.position),
            },
        }
        true
    }

    fn notification(
        &self,
        class: FocusClass,
        change: FocusChange,
        surface: SurfaceId,
        position: Option<Point>,
    ) -> FocusNotification {
        FocusNotification {
            seat: self.name.clone(),
            class,
            change,
            surface,
            position,
        }
    }
}

/// Hand a routed event to the surface it is addressed to
///
/// Events addressed to nobody are dropped.
pub fn deliver(event: &RoutedEvent, surfaces: &SurfaceRegistry) -> Result<(), StaleReference> {
    let Some(id) = event.surface() else {
        return Ok(());
    };
    let surface = surfaces.get(id)?;
    match event {
        RoutedEvent::Pointer(e) => surface.on_pointer_event(e),
        RoutedEvent::Keyboard(e) => surface.on_keyboard_event(e),
        RoutedEvent::Touch(e) => surface.on_touch_event(e),
        RoutedEvent::Tablet(e) => surface.on_tablet_event(e),
    }
    Ok(())
}

/// All seats of the compositor
#[derive(Debug)]
pub struct SeatCoordinator {
    seats: Vec<Seat>,
    default_seat: String,
}

impl SeatCoordinator {
    /// Create a coordinator with just the default seat
    pub fn new(default_seat: impl Into<String>) -> Self {
        let default_seat = default_seat.into();
        Self {
            seats: vec![Seat::new(default_seat.clone())],
            default_seat,
        }
    }

    pub fn default_seat_name(&self) -> &str {
        &self.default_seat
    }

    pub fn seat(&self, name: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.name == name)
    }

    pub fn seat_mut(&mut self, name: &str) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.name == name)
    }

    /// The default seat
    pub fn default_seat(&self) -> &Seat {
        self.seat(&self.default_seat)
            .unwrap_or(&self.seats[0])
    }

    /// Get a seat, creating it on first use
    pub fn get_or_create(&mut self, name: &str) -> &mut Seat {
        let idx = match self.seats.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                info!("Creating seat {}", name);
                self.seats.push(Seat::new(name));
                self.seats.len() - 1
            }
        };
        &mut self.seats[idx]
    }

    /// Iterate all seats
    pub fn seats(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }

    /// Recompute seat capabilities from the attached devices
    pub fn sync_capabilities(&mut self, devices: &DeviceRegistry) {
        let names: Vec<String> = devices.attached().map(|d| d.seat.clone()).collect();
        for name in names {
            self.get_or_create(&name);
        }
        for seat in &mut self.seats {
            seat.set_capabilities(devices.seat_capabilities(&seat.name));
        }
    }

    /// Apply and deliver the events routed for one seat
    ///
    /// Pointer focus follows the surface under the cursor, so motion moves
    /// it (leave and enter go out before the motion itself).
    pub fn handle(
        &mut self,
        seat: &str,
        events: &[RoutedEvent],
        surfaces: &SurfaceRegistry,
    ) -> Result<Vec<FocusNotification>, StaleReference> {
        let seat = self.get_or_create(seat);
        let mut notifications = Vec::new();
        for event in events {
            if let RoutedEvent::Pointer(e) = event {
                if e.kind == PointerEventKind::Motion {
                    notifications.extend(seat.set_pointer_focus(e.surface, e.local, surfaces)?);
                }
            }
            if seat.apply(event) {
                deliver(event, surfaces)?;
            } else {
                trace!("Seat {}: dropping redundant {:?}", seat.name, event);
            }
        }
        Ok(notifications)
    }

    /// Move a seat's keyboard focus
    pub fn set_keyboard_focus(
        &mut self,
        seat: &str,
        surface: Option<SurfaceId>,
        surfaces: &SurfaceRegistry,
    ) -> Result<Vec<FocusNotification>, StaleReference> {
        self.get_or_create(seat).set_keyboard_focus(surface, surfaces)
    }

    /// Move a seat's cursor; fails outside the layout
    pub fn warp_pointer(&mut self, seat: &str, position: Point, layout: &OutputLayoutManager) -> bool {
        self.get_or_create(seat).pointer.warp(position, layout)
    }

    /// Pull every cursor back into the layout after it shrank
    pub fn confine_pointers(&mut self, layout: &OutputLayoutManager) {
        for seat in &mut self.seats {
            seat.pointer.confine(layout);
        }
    }

    /// Clear a destroyed surface from every seat
    pub fn surface_destroyed(&mut self, surface: SurfaceId) -> Vec<FocusNotification> {
        self.seats
            .iter_mut()
            .flat_map(|seat| seat.surface_destroyed(surface))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::compositor::ClientSurface;
    use crate::input::events::{KeyState, KeyboardEvent, PointerEvent, TouchEvent};
    use crate::test_utils::MockSurface;
    use crate::utils::Rectangle;

    fn motion_over(surface: Option<SurfaceId>, x: f64, y: f64) -> RoutedEvent {
        RoutedEvent::Pointer(PointerEvent {
            surface,
            output: None,
            position: Point::new(x, y),
            local: Point::new(x, y),
            kind: PointerEventKind::Motion,
            time: 0,
        })
    }

    fn touch(kind: TouchEventKind, slot: Option<i32>, surface: Option<SurfaceId>) -> RoutedEvent {
        RoutedEvent::Touch(TouchEvent {
            surface,
            slot,
            position: Point::default(),
            local: Point::default(),
            kind,
            time: 0,
        })
    }

    #[test]
    fn test_seat_new() {
        let seat = Seat::new("seat0");
        assert_eq!(seat.name(), "seat0");
        assert!(seat.capabilities().is_empty());
        assert!(seat.focus().keyboard().is_none());
    }

    #[test]
    fn test_keyboard_focus_leave_before_enter() {
        let mut surfaces = SurfaceRegistry::new();
        let a = MockSurface::new(Rectangle::new(0, 0, 10, 10), 0);
        let b = MockSurface::new(Rectangle::new(0, 0, 10, 10), 0);
        let a_dyn: Rc<dyn ClientSurface> = a.clone();
        let b_dyn: Rc<dyn ClientSurface> = b.clone();
        let a_id = surfaces.insert(&a_dyn);
        let b_id = surfaces.insert(&b_dyn);

        let mut seat = Seat::new("seat0");
        seat.set_keyboard_focus(Some(a_id), &surfaces).unwrap();
        let notes = seat.set_keyboard_focus(Some(b_id), &surfaces).unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].change, notes[0].surface), (FocusChange::Leave, a_id));
        assert_eq!((notes[1].change, notes[1].surface), (FocusChange::Enter, b_id));
        assert_eq!(a.focus_changes(), vec![FocusChange::Enter, FocusChange::Leave]);
        assert_eq!(b.focus_changes(), vec![FocusChange::Enter]);

        // Refocusing the same surface is a no-op
        assert!(seat.set_keyboard_focus(Some(b_id), &surfaces).unwrap().is_empty());
    }

    #[test]
    fn test_focus_on_unknown_surface_changes_nothing() {
        let surfaces = SurfaceRegistry::new();
        let mut seat = Seat::new("seat0");
        assert!(seat.set_keyboard_focus(Some(SurfaceId(9999)), &surfaces).is_err());
        assert!(seat.focus().keyboard().is_none());
    }

    #[test]
    fn test_surface_destroyed_clears_focus() {
        let mut surfaces = SurfaceRegistry::new();
        let s: Rc<dyn ClientSurface> = MockSurface::new(Rectangle::new(0, 0, 10, 10), 0);
        let id = surfaces.insert(&s);

        let mut seat = Seat::new("seat0");
        seat.set_keyboard_focus(Some(id), &surfaces).unwrap();
        seat.set_pointer_focus(Some(id), Point::new(1.0, 1.0), &surfaces)
            .unwrap();
        seat.apply(&touch(TouchEventKind::Down, Some(3), Some(id)));

        let notes = seat.surface_destroyed(id);
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.change == FocusChange::Leave));
        assert!(!seat.focus().references(id));
        // The touch point survives, pinned to nothing
        assert_eq!(seat.focus().touch_target(3), Some(None));
    }

    #[test]
    fn test_touch_pin_and_release() {
        let mut seat = Seat::new("seat0");
        let surface = SurfaceId(42);
        seat.apply(&touch(TouchEventKind::Down, Some(0), Some(surface)));
        seat.apply(&touch(TouchEventKind::Down, Some(1), None));
        assert_eq!(seat.focus().touched_surfaces(), vec![surface]);

        seat.apply(&touch(TouchEventKind::Up, Some(0), Some(surface)));
        assert_eq!(seat.focus().touch_target(0), None);
        seat.apply(&touch(TouchEventKind::Cancel, None, None));
        assert_eq!(seat.focus().touch_points().count(), 0);
    }

    #[test]
    fn test_losing_touch_drops_points() {
        let mut seat = Seat::new("seat0");
        seat.set_capabilities(DeviceCapabilities::TOUCH);
        seat.apply(&touch(TouchEventKind::Down, Some(0), None));
        seat.set_capabilities(DeviceCapabilities::KEYBOARD);
        assert_eq!(seat.focus().touch_points().count(), 0);
    }

    #[test]
    fn test_handle_moves_pointer_focus_and_delivers() {
        let mut surfaces = SurfaceRegistry::new();
        let mock = MockSurface::new(Rectangle::new(0, 0, 100, 100), 0);
        let s: Rc<dyn ClientSurface> = mock.clone();
        let id = surfaces.insert(&s);

        let mut seats = SeatCoordinator::new("seat0");
        let notes = seats
            .handle("seat0", &[motion_over(Some(id), 5.0, 5.0)], &surfaces)
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(seats.default_seat().focus().pointer(), Some(id));
        assert_eq!(seats.default_seat().pointer().position(), Point::new(5.0, 5.0));
        assert_eq!(mock.pointer_events().len(), 1);

        let notes = seats
            .handle("seat0", &[motion_over(None, 500.0, 5.0)], &surfaces)
            .unwrap();
        assert_eq!(notes[0].change, FocusChange::Leave);
        assert_eq!(seats.default_seat().focus().pointer(), None);
        assert_eq!(mock.pointer_events().len(), 1);
    }

    fn key(surface: SurfaceId, keycode: u32, state: KeyState) -> RoutedEvent {
        RoutedEvent::Keyboard(KeyboardEvent {
            surface,
            kind: KeyboardEventKind::Key { keycode, state },
            time: 0,
        })
    }

    #[test]
    fn test_keyboard_state_tracked() {
        let mut seat = Seat::new("seat0");
        seat.set_capabilities(DeviceCapabilities::KEYBOARD);
        assert!(seat.apply(&key(SurfaceId(1), 30, KeyState::Pressed)));
        assert!(seat.keyboard().is_held(30));

        seat.set_capabilities(DeviceCapabilities::POINTER);
        assert!(!seat.keyboard().is_held(30));
    }

    #[test]
    fn test_redundant_key_events_not_delivered() {
        let mut surfaces = SurfaceRegistry::new();
        let mock = MockSurface::new(Rectangle::new(0, 0, 100, 100), 0);
        let s: Rc<dyn ClientSurface> = mock.clone();
        let id = surfaces.insert(&s);

        let mut seats = SeatCoordinator::new("seat0");
        let events = [
            key(id, 30, KeyState::Pressed),
            key(id, 30, KeyState::Pressed),
            key(id, 30, KeyState::Released),
            key(id, 31, KeyState::Released),
        ];
        seats.handle("seat0", &events, &surfaces).unwrap();

        let delivered: Vec<_> = mock.keyboard_events().iter().map(|e| e.kind).collect();
        assert_eq!(
            delivered,
            vec![
                KeyboardEventKind::Key {
                    keycode: 30,
                    state: KeyState::Pressed
                },
                KeyboardEventKind::Key {
                    keycode: 30,
                    state: KeyState::Released
                },
            ]
        );
    }

    #[test]
    fn test_sync_capabilities_creates_seats() {
        use crate::backend::AdapterId;
        use crate::compositor::{DeviceId, DeviceInfo};

        let mut devices = DeviceRegistry::new();
        devices.attach(
            DeviceId::new(),
            AdapterId::new(),
            DeviceInfo::new("pen", DeviceCapabilities::TABLET).with_seat("seat1"),
            "seat0",
        );
        let mut seats = SeatCoordinator::new("seat0");
        seats.sync_capabilities(&devices);

        assert_eq!(
            seats.seat("seat1").map(|s| s.capabilities()),
            Some(DeviceCapabilities::TABLET)
        );
        assert!(seats.default_seat().capabilities().is_empty());
    }
}
