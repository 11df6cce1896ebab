//! Input routing
//!
//! Turns raw device events into events addressed to surfaces. Routing only
//! reads state; the seat applies the result (cursor position, touch pins).
//!
//! Pointer and tablet events go to the topmost surface under the position
//! whose input region accepts it. Keyboard events go to the keyboard focus.
//! A touch point is pinned to the surface it went down on and follows it
//! until it lifts, wherever it moves.

use log::{debug, trace};
use thiserror::Error;

use super::events::{
    InputEvent, InputKind, KeyboardEvent, KeyboardEventKind, PointerEvent, PointerEventKind,
    RoutedEvent, TabletEvent, TabletEventKind, TouchEvent, TouchEventKind,
};
use super::pointer::map_absolute;
use super::seat::Seat;
use crate::compositor::{Device, OutputId, OutputLayoutManager, SurfaceId, SurfaceRegistry};
use crate::error::StaleReference;
use crate::utils::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no surface has keyboard focus")]
    NoFocusTarget,
    #[error("touch point {0} is not down")]
    UnknownTouchPoint(i32),
    #[error("no output to map absolute input onto")]
    NoOutput,
    #[error(transparent)]
    Stale(#[from] StaleReference),
}

/// What routing reads
pub struct RouteContext<'a> {
    pub layout: &'a OutputLayoutManager,
    pub surfaces: &'a SurfaceRegistry,
    pub seat: &'a Seat,
    pub device: &'a Device,
}

/// Result of a hit test
#[derive(Debug, Clone, Copy, PartialEq)]
struct Target {
    output: Option<OutputId>,
    surface: Option<SurfaceId>,
    local: Point,
}

/// Routes raw input to surfaces
#[derive(Debug, Default)]
pub struct InputRouter {
    routed: u64,
    unaddressed: u64,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one raw event
    pub fn route(
        &mut self,
        ctx: &RouteContext<'_>,
        event: &InputEvent,
    ) -> Result<Vec<RoutedEvent>, RouteError> {
        let time = event.time;
        let routed = match event.kind {
            InputKind::PointerMotion { dx, dy } => {
                let position = ctx.seat.pointer().motion_target(dx, dy, ctx.layout);
                vec![self.pointer(ctx, position, PointerEventKind::Motion, time)?]
            }
            InputKind::PointerMotionAbsolute { x, y } => {
                let position = absolute_position(ctx, x, y)?;
                vec![self.pointer(ctx, position, PointerEventKind::Motion, time)?]
            }
            InputKind::PointerButton { button, state } => {
                let position = ctx.seat.pointer().position();
                let kind = PointerEventKind::Button { button, state };
                vec![self.pointer(ctx, position, kind, time)?]
            }
            InputKind::PointerAxis { orientation, delta } => {
                let position = ctx.seat.pointer().position();
                let kind = PointerEventKind::Axis { orientation, delta };
                vec![self.pointer(ctx, position, kind, time)?]
            }
            InputKind::Key { keycode, state } => {
                vec![keyboard(ctx, KeyboardEventKind::Key { keycode, state }, time)?]
            }
            InputKind::Modifiers(modifiers) => {
                vec![keyboard(ctx, KeyboardEventKind::Modifiers(modifiers), time)?]
            }
            InputKind::TouchDown { slot, x, y } => {
                let position = absolute_position(ctx, x, y)?;
                let target = hit_test(ctx, position)?;
                debug!("Touch {} down, pinned to {:?}", slot, target.surface);
                vec![RoutedEvent::Touch(TouchEvent {
                    surface: target.surface,
                    slot: Some(slot),
                    position,
                    local: target.local,
                    kind: TouchEventKind::Down,
                    time,
                })]
            }
            InputKind::TouchMotion { slot, x, y } => {
                let surface = pinned(ctx, slot)?;
                let position = absolute_position(ctx, x, y)?;
                vec![RoutedEvent::Touch(TouchEvent {
                    surface,
                    slot: Some(slot),
                    position,
                    local: surface_local(ctx, surface, position)?,
                    kind: TouchEventKind::Motion,
                    time,
                })]
            }
            InputKind::TouchUp { slot } => {
                let surface = pinned(ctx, slot)?;
                vec![RoutedEvent::Touch(TouchEvent {
                    surface,
                    slot: Some(slot),
                    position: Point::default(),
                    local: Point::default(),
                    kind: TouchEventKind::Up,
                    time,
                })]
            }
            InputKind::TouchCancel => touch_broadcast(ctx, TouchEventKind::Cancel, time),
            InputKind::TouchFrame => touch_broadcast(ctx, TouchEventKind::Frame, time),
            InputKind::TabletProximity { x, y, in_proximity } => {
                let kind = TabletEventKind::Proximity { in_proximity };
                vec![self.tablet(ctx, absolute_position(ctx, x, y)?, kind, time)?]
            }
            InputKind::TabletAxis { x, y, pressure } => {
                let kind = TabletEventKind::Axis { pressure };
                vec![self.tablet(ctx, absolute_position(ctx, x, y)?, kind, time)?]
            }
            InputKind::TabletTip { x, y, down } => {
                let kind = TabletEventKind::Tip { down };
                vec![self.tablet(ctx, absolute_position(ctx, x, y)?, kind, time)?]
            }
            InputKind::TabletButton { button, state } => {
                let position = ctx.seat.tablet_position().unwrap_or_default();
                let kind = TabletEventKind::Button { button, state };
                vec![self.tablet(ctx, position, kind, time)?]
            }
        };

        self.routed += routed.len() as u64;
        self.unaddressed += routed.iter().filter(|e| e.surface().is_none()).count() as u64;
        trace!("Routed {:?} from {} to {:?}", event.kind, ctx.device.name, routed);
        Ok(routed)
    }

    /// Events routed so far, and how many of them went to no surface
    pub fn stats(&self) -> (u64, u64) {
        (self.routed, self.unaddressed)
    }

    fn pointer(
        &self,
        ctx: &RouteContext<'_>,
        position: Point,
        kind: PointerEventKind,
        time: u32,
    ) -> Result<RoutedEvent, RouteError> {
        let target = hit_test(ctx, position)?;
        Ok(RoutedEvent::Pointer(PointerEvent {
            surface: target.surface,
            output: target.output,
            position,
            local: target.local,
            kind,
            time,
        }))
    }

    fn tablet(
        &self,
        ctx: &RouteContext<'_>,
        position: Point,
        kind: TabletEventKind,
        time: u32,
    ) -> Result<RoutedEvent, RouteError> {
        let target = hit_test(ctx, position)?;
        Ok(RoutedEvent::Tablet(TabletEvent {
            surface: target.surface,
            output: target.output,
            position,
            local: target.local,
            kind,
            time,
        }))
    }
}

/// Find the topmost surface accepting input at a global point
///
/// Points outside every output hit nothing, even if a surface extends there.
fn hit_test(ctx: &RouteContext<'_>, position: Point) -> Result<Target, StaleReference> {
    let Some(output) = ctx.layout.resolve(position) else {
        return Ok(Target {
            output: None,
            surface: None,
            local: position,
        });
    };

    for candidate in ctx.surfaces.surfaces_at(position)? {
        let local = position.relative_to(candidate.surface.geometry());
        if candidate.surface.input_region().contains(local) {
            return Ok(Target {
                output: Some(output),
                surface: Some(candidate.id),
                local,
            });
        }
    }

    Ok(Target {
        output: Some(output),
        surface: None,
        local: position,
    })
}

fn keyboard(
    ctx: &RouteContext<'_>,
    kind: KeyboardEventKind,
    time: u32,
) -> Result<RoutedEvent, RouteError> {
    let surface = ctx.seat.focus().keyboard().ok_or(RouteError::NoFocusTarget)?;
    ctx.surfaces.get(surface)?;
    Ok(RoutedEvent::Keyboard(KeyboardEvent {
        surface,
        kind,
        time,
    }))
}

fn pinned(ctx: &RouteContext<'_>, slot: i32) -> Result<Option<SurfaceId>, RouteError> {
    ctx.seat
        .focus()
        .touch_target(slot)
        .ok_or(RouteError::UnknownTouchPoint(slot))
}

fn surface_local(
    ctx: &RouteContext<'_>,
    surface: Option<SurfaceId>,
    position: Point,
) -> Result<Point, StaleReference> {
    match surface {
        Some(id) => Ok(position.relative_to(ctx.surfaces.get(id)?.geometry())),
        None => Ok(position),
    }
}

/// Cancel and frame go to every surface holding a touch point
fn touch_broadcast(ctx: &RouteContext<'_>, kind: TouchEventKind, time: u32) -> Vec<RoutedEvent> {
    let surfaces = ctx.seat.focus().touched_surfaces();
    if surfaces.is_empty() && kind == TouchEventKind::Cancel {
        // Still reset the seat's unpinned touch points
        return vec![RoutedEvent::Touch(TouchEvent {
            surface: None,
            slot: None,
            position: Point::default(),
            local: Point::default(),
            kind,
            time,
        })];
    }
    surfaces
        .into_iter()
        .map(|surface| {
            RoutedEvent::Touch(TouchEvent {
                surface: Some(surface),
                slot: None,
                position: Point::default(),
                local: Point::default(),
                kind,
                time,
            })
        })
        .collect()
}

/// Map normalized device coordinates onto the device's output, or the
/// whole layout when it is not mapped to one
fn absolute_position(ctx: &RouteContext<'_>, x: f64, y: f64) -> Result<Point, RouteError> {
    let area = ctx
        .device
        .mapped_output
        .and_then(|output| ctx.layout.geometry(output))
        .or_else(|| ctx.layout.bounding_box())
        .ok_or(RouteError::NoOutput)?;
    Ok(map_absolute(area, x, y))
}
