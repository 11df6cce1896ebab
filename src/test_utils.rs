//! Shared test helpers

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::compositor::{BufferInfo, BufferTransform, ClientSurface, InputRegion, OutputId};
use crate::input::{
    FocusChange, FocusNotification, KeyboardEvent, PointerEvent, TabletEvent, TouchEvent,
};
use crate::utils::Rectangle;

/// A client surface that records everything delivered to it
#[derive(Debug)]
pub struct MockSurface {
    geometry: Cell<Rectangle>,
    z: i32,
    transform: Cell<BufferTransform>,
    input_region: InputRegion,
    pointer: RefCell<Vec<PointerEvent>>,
    keyboard: RefCell<Vec<KeyboardEvent>>,
    touch: RefCell<Vec<TouchEvent>>,
    tablet: RefCell<Vec<TabletEvent>>,
    focus: RefCell<Vec<FocusNotification>>,
    frames_done: RefCell<Vec<OutputId>>,
}

impl MockSurface {
    pub fn new(geometry: Rectangle, z: i32) -> Rc<Self> {
        Self::with_input_region(geometry, z, InputRegion::Everywhere)
    }

    pub fn with_input_region(geometry: Rectangle, z: i32, input_region: InputRegion) -> Rc<Self> {
        Rc::new(Self {
            geometry: Cell::new(geometry),
            z,
            transform: Cell::new(BufferTransform::Normal),
            input_region,
            pointer: RefCell::default(),
            keyboard: RefCell::default(),
            touch: RefCell::default(),
            tablet: RefCell::default(),
            focus: RefCell::default(),
            frames_done: RefCell::default(),
        })
    }

    pub fn set_geometry(&self, geometry: Rectangle) {
        self.geometry.set(geometry);
    }

    pub fn set_transform(&self, transform: BufferTransform) {
        self.transform.set(transform);
    }

    pub fn pointer_events(&self) -> Vec<PointerEvent> {
        self.pointer.borrow().clone()
    }

    pub fn keyboard_events(&self) -> Vec<KeyboardEvent> {
        self.keyboard.borrow().clone()
    }

    pub fn touch_events(&self) -> Vec<TouchEvent> {
        self.touch.borrow().clone()
    }

    pub fn tablet_events(&self) -> Vec<TabletEvent> {
        self.tablet.borrow().clone()
    }

    pub fn focus_notifications(&self) -> Vec<FocusNotification> {
        self.focus.borrow().clone()
    }

    pub fn focus_changes(&self) -> Vec<FocusChange> {
        self.focus.borrow().iter().map(|n| n.change).collect()
    }

    pub fn frames_done(&self) -> Vec<OutputId> {
        self.frames_done.borrow().clone()
    }
}

impl ClientSurface for MockSurface {
    fn geometry(&self) -> Rectangle {
        self.geometry.get()
    }

    fn current_buffer(&self) -> Option<BufferInfo> {
        let geometry = self.geometry.get();
        Some(BufferInfo {
            width: geometry.width as u32,
            height: geometry.height as u32,
            stride: geometry.width as u32 * 4,
            format: 0x3432_5258, // XR24
        })
    }

    fn input_region(&self) -> InputRegion {
        self.input_region.clone()
    }

    fn z_order_rank(&self) -> i32 {
        self.z
    }

    fn transform(&self) -> BufferTransform {
        self.transform.get()
    }

    fn on_pointer_event(&self, event: &PointerEvent) {
        self.pointer.borrow_mut().push(*event);
    }

    fn on_keyboard_event(&self, event: &KeyboardEvent) {
        self.keyboard.borrow_mut().push(*event);
    }

    fn on_touch_event(&self, event: &TouchEvent) {
        self.touch.borrow_mut().push(*event);
    }

    fn on_tablet_event(&self, event: &TabletEvent) {
        self.tablet.borrow_mut().push(*event);
    }

    fn on_focus(&self, notification: &FocusNotification) {
        self.focus.borrow_mut().push(notification.clone());
    }

    fn on_frame_done(&self, output: OutputId, _time: u32) {
        self.frames_done.borrow_mut().push(output);
    }
}
