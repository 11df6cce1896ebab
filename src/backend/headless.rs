//! Headless backend
//!
//! Virtual outputs and input devices with no hardware behind them. The
//! [`HeadlessHandle`] scripts what the adapter reports, records the frames it
//! is given and injects failures, which makes it the backend for tests and
//! for running without a display.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;

use super::{AdapterKind, BackendAdapter, BackendEvent, Committed, LocalHandle};
use crate::compositor::{DeviceInfo, OutputInfo, OutputMode};
use crate::input::InputEvent;
use crate::renderer::{ComposedFrame, RenderError};

#[derive(Debug)]
struct HeadlessState {
    pending: VecDeque<BackendEvent>,
    responsive: bool,
    next_handle: LocalHandle,
    failures: VecDeque<RenderError>,
    frames: Vec<(LocalHandle, ComposedFrame)>,
    commits: u64,
    clock_ms: u32,
}

/// A backend adapter without hardware
#[derive(Debug)]
pub struct HeadlessAdapter {
    name: String,
    state: Rc<RefCell<HeadlessState>>,
}

/// Controls a [`HeadlessAdapter`] from outside
#[derive(Debug, Clone)]
pub struct HeadlessHandle {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessAdapter {
    /// Create an adapter and the handle that drives it
    pub fn new(name: impl Into<String>) -> (Self, HeadlessHandle) {
        let state = Rc::new(RefCell::new(HeadlessState {
            pending: VecDeque::new(),
            responsive: true,
            next_handle: 1,
            failures: VecDeque::new(),
            frames: Vec::new(),
            commits: 0,
            clock_ms: 0,
        }));
        let adapter = Self {
            name: name.into(),
            state: state.clone(),
        };
        (adapter, HeadlessHandle { state })
    }
}

impl BackendAdapter for HeadlessAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Headless
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// A responsive adapter with nothing to report still heartbeats
    fn poll(&mut self) -> Box<dyn Iterator<Item = BackendEvent> + '_> {
        let mut state = self.state.borrow_mut();
        if !state.responsive {
            return Box::new(std::iter::empty());
        }
        let mut events: Vec<BackendEvent> = state.pending.drain(..).collect();
        if events.is_empty() {
            events.push(BackendEvent::Heartbeat);
        }
        Box::new(events.into_iter())
    }

    fn submit_frame(
        &mut self,
        output: LocalHandle,
        frame: &ComposedFrame,
    ) -> Result<Committed, RenderError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.failures.pop_front() {
            debug!("{}: failing frame {} on output {}: {}", self.name, frame.seq, output, err);
            return Err(err);
        }
        state.commits += 1;
        state.clock_ms = state.clock_ms.wrapping_add(16);
        state.frames.push((output, frame.clone()));
        Ok(Committed {
            seq: state.commits,
            time: state.clock_ms,
        })
    }
}

impl HeadlessHandle {
    fn push(&self, event: BackendEvent) {
        self.state.borrow_mut().pending.push_back(event);
    }

    fn allocate(&self) -> LocalHandle {
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        handle
    }

    /// Plug in a virtual output
    pub fn add_output(&self, info: OutputInfo) -> LocalHandle {
        let handle = self.allocate();
        self.push(BackendEvent::OutputAdded { handle, info });
        handle
    }

    pub fn remove_output(&self, handle: LocalHandle) {
        self.push(BackendEvent::OutputRemoved { handle });
    }

    pub fn change_mode(&self, handle: LocalHandle, mode: OutputMode) {
        self.push(BackendEvent::OutputModeChanged { handle, mode });
    }

    /// Plug in a virtual input device
    pub fn add_device(&self, info: DeviceInfo) -> LocalHandle {
        let handle = self.allocate();
        self.push(BackendEvent::DeviceAdded { handle, info });
        handle
    }

    pub fn remove_device(&self, handle: LocalHandle) {
        self.push(BackendEvent::DeviceRemoved { handle });
    }

    /// Report an input event from a device
    pub fn input(&self, device: LocalHandle, event: InputEvent) {
        self.push(BackendEvent::Input { device, event });
    }

    /// A silent adapter reports nothing, not even heartbeats
    pub fn set_responsive(&self, responsive: bool) {
        self.state.borrow_mut().responsive = responsive;
    }

    /// Make the next frame submission fail
    pub fn fail_next_frame(&self, error: RenderError) {
        self.state.borrow_mut().failures.push_back(error);
    }

    /// Frames committed so far
    pub fn frames(&self) -> Vec<(LocalHandle, ComposedFrame)> {
        self.state.borrow().frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.state.borrow().frames.len()
    }
}
