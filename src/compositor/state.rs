//! Global compositor state
//!
//! This module contains the central compositor state that coordinates
//! backends, devices, the output layout, frame scheduling, input routing and
//! seats. [`Compositor::dispatch`] is one turn of the event loop: apply
//! backend events, check adapter liveness, then render due outputs.

use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::backend::{
    AdapterId, BackendAdapter, BackendMultiplexer, MuxError, MuxEvent, MuxEventKind,
};
use crate::compositor::{
    ClientSurface, DeviceId, DeviceRegistry, Output, OutputId, OutputInfo, OutputLayoutManager,
    OutputMode, SurfaceId, SurfaceRegistry,
};
use crate::config::{Config, OutputArrangement};
use crate::error::{CompositorError, ObjectKind, StaleReference};
use crate::input::{FocusNotification, InputEvent, InputRouter, RouteContext, SeatCoordinator};
use crate::renderer::{self, ComposedFrame, FrameOutcome, FrameScheduler, RenderRequest};
use crate::utils::{Point, Rectangle, Region};

/// What one dispatch turn did
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Backend events applied
    pub backend_events: usize,
    /// Frames fully committed by adapters
    pub frames_committed: usize,
    /// Focus changes caused by input
    pub focus: Vec<FocusNotification>,
    /// Non-fatal errors: forced detaches, degraded outputs, dropped input
    pub errors: Vec<CompositorError>,
}

/// The global compositor state
pub struct Compositor {
    config: Config,

    /// All backend adapters behind one event stream
    pub backends: BackendMultiplexer,

    /// Input devices, attached and remembered
    devices: DeviceRegistry,

    /// Output arrangement; sole owner of output geometry
    layout: OutputLayoutManager,

    /// Per-output frame timing and damage
    frames: FrameScheduler,

    router: InputRouter,

    /// Seats; sole owner of focus
    seats: SeatCoordinator,

    /// Weak references to client surfaces
    surfaces: SurfaceRegistry,

    running: bool,
}

impl Compositor {
    /// Create a new compositor
    pub fn new(config: Config) -> Self {
        Self {
            backends: BackendMultiplexer::new(
                config.heartbeat_timeout(),
                config.backend_detach_retry_limit,
            ),
            devices: DeviceRegistry::new(),
            layout: OutputLayoutManager::new(),
            frames: FrameScheduler::new(config.damage_coalesce_window(), config.render_retry_limit),
            router: InputRouter::new(),
            seats: SeatCoordinator::new(config.seat_name.clone()),
            surfaces: SurfaceRegistry::new(),
            running: true,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn layout(&self) -> &OutputLayoutManager {
        &self.layout
    }

    pub fn frames(&self) -> &FrameScheduler {
        &self.frames
    }

    pub fn seats(&self) -> &SeatCoordinator {
        &self.seats
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the event loop to stop after the current turn
    pub fn request_shutdown(&mut self) {
        info!("Shutdown requested");
        self.running = false;
    }

    /// Register a backend adapter
    pub fn attach_adapter(&mut self, adapter: Box<dyn BackendAdapter>, now: Instant) -> AdapterId {
        self.backends.attach(adapter, now)
    }

    /// Remove a backend adapter and everything it provided
    pub fn detach_adapter(&mut self, id: AdapterId, now: Instant) -> Result<(), CompositorError> {
        let removals = self.backends.detach(id)?;
        let mut report = DispatchReport::default();
        for event in removals {
            self.apply(event, now, &mut report)?;
        }
        Ok(())
    }

    /// One turn of the event loop
    ///
    /// Only fatal errors are returned as `Err`; everything else is collected
    /// in the report.
    pub fn dispatch(&mut self, now: Instant) -> Result<DispatchReport, CompositorError> {
        let mut report = DispatchReport::default();

        // Must precede the heartbeat check: any polled event resets strikes
        for event in self.backends.poll(now) {
            self.apply(event, now, &mut report)?;
        }

        for detached in self.backends.check_heartbeats(now) {
            for event in detached.removals {
                self.apply(event, now, &mut report)?;
            }
            report.errors.push(CompositorError::AdapterUnresponsive {
                id: detached.adapter,
                name: detached.name,
            });
        }

        for request in self.frames.due(now) {
            self.render(request, now, &mut report)?;
        }

        Ok(report)
    }

    /// Earliest instant the compositor has work to do
    pub fn next_wakeup(&mut self) -> Option<Instant> {
        match (self.frames.next_deadline(), self.backends.next_heartbeat_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn apply(
        &mut self,
        event: MuxEvent,
        now: Instant,
        report: &mut DispatchReport,
    ) -> Result<(), CompositorError> {
        report.backend_events += 1;
        debug!("Backend event #{} from {:?}: {:?}", event.seq, event.adapter, event.kind);

        match event.kind {
            MuxEventKind::DeviceAdded { device, info } => {
                self.devices
                    .attach(device, event.adapter, info, &self.config.seat_name);
                self.seats.sync_capabilities(&self.devices);
            }
            MuxEventKind::DeviceRemoved { device } => {
                self.devices.detach(device)?;
                self.seats.sync_capabilities(&self.devices);
            }
            MuxEventKind::OutputAdded {
                output,
                info,
                discovery,
            } => self.output_added(output, info, discovery, now, report)?,
            MuxEventKind::OutputRemoved { output } => self.output_removed(output)?,
            MuxEventKind::OutputModeChanged { output, mode } => {
                self.output_mode_changed(output, mode, now)?
            }
            MuxEventKind::Input { device, event } => self.input(device, &event, report)?,
        }
        Ok(())
    }

    fn output_added(
        &mut self,
        id: OutputId,
        info: OutputInfo,
        discovery: u64,
        now: Instant,
        report: &mut DispatchReport,
    ) -> Result<(), CompositorError> {
        let mut output = Output::new(id, info);
        let overrides = self.config.output_config(&output.name).cloned();
        if let Some(scale) = overrides.as_ref().and_then(|o| o.scale) {
            output.scale = scale;
        }
        let interval = output
            .refresh_interval()
            .unwrap_or_else(|| default_interval(self.config.default_refresh_mhz));
        let size = output.logical_size();
        info!("Output {} appeared as {:?} ({}x{})", output.name, id, size.w, size.h);

        self.layout.add(output, discovery);
        self.frames.add_output(id, interval);

        if let Some((x, y)) = overrides.as_ref().and_then(|o| o.position()) {
            if let Err(err) = self.layout.place(id, x, y) {
                warn!("Configured position for {:?} rejected: {}", id, err);
                report.errors.push(err.into());
            }
        }
        if self.config.output_arrangement == OutputArrangement::Auto {
            self.layout.auto_arrange();
        }

        // First frame
        self.frames
            .damage(id, Rectangle::from_loc_size(0, 0, size), now)?;
        self.damage_all_outputs(now)
    }

    fn output_removed(&mut self, id: OutputId) -> Result<(), CompositorError> {
        self.layout
            .remove(id)
            .map_err(|_| StaleReference::new(ObjectKind::Output, id.0))?;
        self.frames.remove_output(id)?;
        self.devices.output_removed(id);
        self.seats.confine_pointers(&self.layout);
        Ok(())
    }

    fn output_mode_changed(
        &mut self,
        id: OutputId,
        mode: OutputMode,
        now: Instant,
    ) -> Result<(), CompositorError> {
        self.layout
            .set_mode(id, mode)
            .map_err(|_| StaleReference::new(ObjectKind::Output, id.0))?;
        let interval = mode
            .refresh_interval()
            .unwrap_or_else(|| default_interval(self.config.default_refresh_mhz));
        self.frames.set_interval(id, interval)?;
        self.frames.clear_degraded(id, now)?;
        self.seats.confine_pointers(&self.layout);

        let size = self
            .layout
            .output(id)
            .map(Output::logical_size)
            .unwrap_or_default();
        self.frames
            .damage(id, Rectangle::from_loc_size(0, 0, size), now)?;
        self.damage_all_outputs(now)
    }

    fn input(
        &mut self,
        device: DeviceId,
        event: &InputEvent,
        report: &mut DispatchReport,
    ) -> Result<(), CompositorError> {
        let seat_name = self.devices.get(device)?.seat.clone();
        let routed = {
            let seat = &*self.seats.get_or_create(&seat_name);
            let ctx = RouteContext {
                layout: &self.layout,
                surfaces: &self.surfaces,
                seat,
                device: self.devices.get(device)?,
            };
            self.router.route(&ctx, event)
        };

        match routed {
            Ok(events) => {
                let focus = self.seats.handle(&seat_name, &events, &self.surfaces)?;
                report.focus.extend(focus);
                Ok(())
            }
            Err(err) => {
                let err = CompositorError::from(err);
                if err.is_fatal() {
                    return Err(err);
                }
                debug!("Input from {:?} dropped: {}", device, err);
                report.errors.push(err);
                Ok(())
            }
        }
    }

    fn render(
        &mut self,
        request: RenderRequest,
        now: Instant,
        report: &mut DispatchReport,
    ) -> Result<(), CompositorError> {
        let output = request.output;
        let frame = match self.layout.geometry(output) {
            Some(bounds) => {
                renderer::compose(output, request.seq, bounds, request.damage, &self.surfaces)?
            }
            None => {
                // Unplaced outputs show nothing until they get a position
                let size = self
                    .layout
                    .output(output)
                    .map(Output::logical_size)
                    .ok_or(StaleReference::new(ObjectKind::Output, output.0))?;
                let mut frame = ComposedFrame::empty(output, request.seq, size);
                frame.damage = request.damage.clip(Rectangle::from_loc_size(0, 0, size));
                frame
            }
        };
        self.frames.frame_composed(output)?;

        match self.backends.submit_frame(output, &frame) {
            Ok(committed) => {
                self.frames.frame_committed(output, Ok(committed), now)?;
                report.frames_committed += 1;
                for element in &frame.elements {
                    if let Some(surface) = self.surfaces.get_alive(element.surface) {
                        surface.on_frame_done(output, committed.time);
                    }
                }
            }
            Err(MuxError::Render { output, source }) => {
                let outcome = self.frames.frame_committed(output, Err(&source), now)?;
                if outcome == FrameOutcome::Degraded {
                    error!("Output {:?} degraded: {}", output, source);
                    report.errors.push(CompositorError::Render { output, source });
                }
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn damage_all_outputs(&mut self, now: Instant) -> Result<(), CompositorError> {
        let placed: Vec<(OutputId, Rectangle)> = self.layout.placed().collect();
        for (id, rect) in placed {
            self.frames
                .damage(id, Rectangle::from_loc_size(0, 0, rect.size()), now)?;
        }
        Ok(())
    }

    /// Damage a global rectangle on every output it touches
    fn damage_global(&mut self, rect: Rectangle, now: Instant) -> Result<(), CompositorError> {
        for (id, bounds) in self.layout.outputs_intersecting(rect) {
            if let Some(visible) = rect.intersection(bounds) {
                self.frames
                    .damage(id, visible.translate(-bounds.x, -bounds.y), now)?;
            }
        }
        Ok(())
    }

    /// Start tracking a client surface
    pub fn add_surface(
        &mut self,
        surface: &Rc<dyn ClientSurface>,
        now: Instant,
    ) -> Result<SurfaceId, CompositorError> {
        let id = self.surfaces.insert(surface);
        debug!("Surface {:?} mapped at {:?}", id, surface.geometry());
        self.damage_global(surface.geometry(), now)?;
        Ok(id)
    }

    /// A surface committed new content
    ///
    /// `damage` is in surface-local coordinates.
    pub fn surface_committed(
        &mut self,
        id: SurfaceId,
        damage: &Region,
        now: Instant,
    ) -> Result<(), CompositorError> {
        let geometry = self.surfaces.get(id)?.geometry();
        for rect in damage.rects() {
            let global = rect.translate(geometry.x, geometry.y);
            if let Some(visible) = global.intersection(geometry) {
                self.damage_global(visible, now)?;
            }
        }
        Ok(())
    }

    /// A surface moved or resized; both the old and new area need a repaint
    pub fn surface_moved(
        &mut self,
        id: SurfaceId,
        previous: Rectangle,
        now: Instant,
    ) -> Result<(), CompositorError> {
        let geometry = self.surfaces.get(id)?.geometry();
        self.damage_global(previous, now)?;
        self.damage_global(geometry, now)
    }

    /// The client-management layer destroyed a surface
    ///
    /// Every focus on it is cleared and the surface is told it lost focus.
    pub fn surface_destroyed(
        &mut self,
        id: SurfaceId,
        now: Instant,
    ) -> Result<Vec<FocusNotification>, CompositorError> {
        if !self.surfaces.contains(id) {
            return Err(StaleReference::new(ObjectKind::Surface, id.0).into());
        }
        let notifications = self.seats.surface_destroyed(id);
        if let Some(surface) = self.surfaces.get_alive(id) {
            for notification in &notifications {
                surface.on_focus(notification);
            }
            self.damage_global(surface.geometry(), now)?;
        }
        self.surfaces.remove(id);
        info!("Surface {:?} destroyed", id);
        Ok(notifications)
    }

    /// Policy request to move a seat's keyboard focus
    pub fn focus_request(
        &mut self,
        seat: &str,
        surface: Option<SurfaceId>,
    ) -> Result<Vec<FocusNotification>, CompositorError> {
        Ok(self.seats.set_keyboard_focus(seat, surface, &self.surfaces)?)
    }

    /// Explicitly position an output
    pub fn place_output(
        &mut self,
        id: OutputId,
        x: i32,
        y: i32,
        now: Instant,
    ) -> Result<Rectangle, CompositorError> {
        let rect = self.layout.place(id, x, y)?;
        self.seats.confine_pointers(&self.layout);
        self.damage_all_outputs(now)?;
        Ok(rect)
    }

    /// Move a seat's cursor to a global position
    pub fn warp_pointer(&mut self, seat: &str, position: Point) -> bool {
        self.seats.warp_pointer(seat, position, &self.layout)
    }

    /// Map a device's absolute input onto one output, or the whole layout
    pub fn map_device_to_output(
        &mut self,
        device: DeviceId,
        output: Option<OutputId>,
    ) -> Result<(), CompositorError> {
        if let Some(output) = output {
            if self.layout.output(output).is_none() {
                return Err(StaleReference::new(ObjectKind::Output, output.0).into());
            }
        }
        Ok(self.devices.map_to_output(device, output)?)
    }
}

fn default_interval(refresh_mhz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000_000 / u64::from(refresh_mhz.max(1)))
}
