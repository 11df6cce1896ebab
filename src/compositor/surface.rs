//! Surface tracking
//!
//! Surfaces belong to the client-management layer. The core only holds weak
//! references for routing and frame composition; the owner announces
//! destruction through [`crate::compositor::Compositor::surface_destroyed`].

use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use log::error;

use crate::compositor::OutputId;
use crate::error::{ObjectKind, StaleReference};
use crate::input::{FocusNotification, KeyboardEvent, PointerEvent, TabletEvent, TouchEvent};
use crate::utils::{Point, Rectangle};

/// Unique identifier for surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SurfaceId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Buffer information attached to a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Stride (bytes per row)
    pub stride: u32,
    /// Pixel format (fourcc)
    pub format: u32,
}

/// Buffer transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// The part of a surface that accepts input, in surface-local coordinates
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputRegion {
    /// The whole surface
    #[default]
    Everywhere,
    /// Nothing; input passes through
    Empty,
    /// A simple polygon, even-odd fill
    Polygon(Vec<Point>),
}

impl InputRegion {
    /// Whether a surface-local point accepts input
    pub fn contains(&self, point: Point) -> bool {
        match self {
            InputRegion::Everywhere => true,
            InputRegion::Empty => false,
            InputRegion::Polygon(vertices) => polygon_contains(vertices, point),
        }
    }
}

fn polygon_contains(vertices: &[Point], point: Point) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// The client side of a surface, as seen by the core
///
/// Callbacks have no-op defaults so clients only implement what they use.
pub trait ClientSurface {
    /// Placement in global layout coordinates
    fn geometry(&self) -> Rectangle;

    /// Currently attached buffer
    fn current_buffer(&self) -> Option<BufferInfo>;

    /// Input region in surface-local coordinates
    fn input_region(&self) -> InputRegion {
        InputRegion::Everywhere
    }

    /// Stacking rank; higher is on top
    fn z_order_rank(&self) -> i32;

    fn transform(&self) -> BufferTransform {
        BufferTransform::Normal
    }

    fn on_pointer_event(&self, _event: &PointerEvent) {}

    fn on_keyboard_event(&self, _event: &KeyboardEvent) {}

    fn on_touch_event(&self, _event: &TouchEvent) {}

    fn on_tablet_event(&self, _event: &TabletEvent) {}

    fn on_focus(&self, _notification: &FocusNotification) {}

    /// A frame showing this surface was committed on `output`
    fn on_frame_done(&self, _output: OutputId, _time: u32) {}
}

#[derive(Debug)]
struct SurfaceEntry {
    handle: Weak<dyn ClientSurface>,
    /// Registration order, breaks z-order ties (newer on top)
    order: u64,
}

/// A live surface with its id
#[derive(Clone)]
pub struct SurfaceRef {
    pub id: SurfaceId,
    pub surface: Rc<dyn ClientSurface>,
}

/// Weak registry of live surfaces
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: HashMap<SurfaceId, SurfaceEntry>,
    next_order: u64,
}

impl SurfaceRegistry {
    /// Create a new surface registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a surface and return its ID
    pub fn insert(&mut self, surface: &Rc<dyn ClientSurface>) -> SurfaceId {
        let id = SurfaceId::new();
        self.next_order += 1;
        self.surfaces.insert(
            id,
            SurfaceEntry {
                handle: Rc::downgrade(surface),
                order: self.next_order,
            },
        );
        id
    }

    /// Forget a surface; returns whether it was registered
    pub fn remove(&mut self, id: SurfaceId) -> bool {
        self.surfaces.remove(&id).is_some()
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    /// Get a live surface
    ///
    /// A registered surface whose client side is gone was dropped without a
    /// destruction notice, which is reported as a stale reference too.
    pub fn get(&self, id: SurfaceId) -> Result<Rc<dyn ClientSurface>, StaleReference> {
        let entry = self
            .surfaces
            .get(&id)
            .ok_or(StaleReference::new(ObjectKind::Surface, id.0))?;
        entry.handle.upgrade().ok_or_else(|| {
            error!("Surface {:?} dropped without a destruction notice", id);
            StaleReference::new(ObjectKind::Surface, id.0)
        })
    }

    /// Get a surface if it is registered and alive
    pub fn get_alive(&self, id: SurfaceId) -> Option<Rc<dyn ClientSurface>> {
        self.surfaces.get(&id).and_then(|e| e.handle.upgrade())
    }

    /// All live surfaces, bottom of the stack first
    pub fn stacked(&self) -> Result<Vec<SurfaceRef>, StaleReference> {
        let mut stack = Vec::with_capacity(self.surfaces.len());
        for (id, entry) in &self.surfaces {
            let surface = entry.handle.upgrade().ok_or_else(|| {
                error!("Surface {:?} dropped without a destruction notice", id);
                StaleReference::new(ObjectKind::Surface, id.0)
            })?;
            stack.push((surface.z_order_rank(), entry.order, SurfaceRef { id: *id, surface }));
        }
        stack.sort_by_key(|(z, order, _)| (*z, *order));
        Ok(stack.into_iter().map(|(_, _, s)| s).collect())
    }

    /// Surfaces whose geometry contains a global point, topmost first
    pub fn surfaces_at(&self, point: Point) -> Result<Vec<SurfaceRef>, StaleReference> {
        let mut stack = self.stacked()?;
        stack.retain(|s| s.surface.geometry().contains(point));
        stack.reverse();
        Ok(stack)
    }

    /// Surfaces intersecting a global rectangle, bottom first
    pub fn visible_in(&self, rect: Rectangle) -> Result<Vec<SurfaceRef>, StaleReference> {
        let mut stack = self.stacked()?;
        stack.retain(|s| s.surface.geometry().overlaps(rect));
        Ok(stack)
    }

    /// Get count of surfaces
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
