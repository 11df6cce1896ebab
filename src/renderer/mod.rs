//! Rendering module
//!
//! The core does not draw. It decides when an output needs a frame, which
//! surfaces the frame shows and what changed, and hands that description to
//! the adapter driving the output.

pub mod scheduler;

use log::trace;
use thiserror::Error;

use crate::compositor::{BufferInfo, BufferTransform, OutputId, SurfaceId, SurfaceRegistry};
use crate::error::StaleReference;
use crate::utils::{Rectangle, Region, Size};

pub use scheduler::{FrameOutcome, FrameScheduler, FrameState, FrameTimer, RenderRequest, SchedulerError};

/// Why an adapter could not present a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Worth retrying (busy, page flip pending, lost a race)
    #[error("transient render failure: {0}")]
    Transient(String),
    /// Retrying will not help until the output changes
    #[error("persistent render failure: {0}")]
    Persistent(String),
}

impl RenderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient(_))
    }
}

/// A surface as it appears in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameElement {
    pub surface: SurfaceId,
    /// Output-local placement
    pub geometry: Rectangle,
    pub buffer: Option<BufferInfo>,
    /// How the adapter must rotate the buffer to present it upright
    pub transform: BufferTransform,
    pub z: i32,
}

/// Everything an adapter needs to present one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedFrame {
    pub output: OutputId,
    pub seq: u64,
    /// Logical size of the output
    pub size: Size,
    /// Output-local area to repaint
    pub damage: Region,
    /// Visible surfaces, bottom first
    pub elements: Vec<FrameElement>,
}

impl ComposedFrame {
    /// A frame showing nothing
    pub fn empty(output: OutputId, seq: u64, size: Size) -> Self {
        Self {
            output,
            seq,
            size,
            damage: Region::new(),
            elements: Vec::new(),
        }
    }
}

/// Collect the surfaces visible on an output
///
/// `bounds` is the output's rectangle in the global layout; `damage` is
/// output-local.
pub fn compose(
    output: OutputId,
    seq: u64,
    bounds: Rectangle,
    damage: Region,
    surfaces: &SurfaceRegistry,
) -> Result<ComposedFrame, StaleReference> {
    let elements: Vec<FrameElement> = surfaces
        .visible_in(bounds)?
        .into_iter()
        .map(|s| FrameElement {
            surface: s.id,
            geometry: s.surface.geometry().translate(-bounds.x, -bounds.y),
            buffer: s.surface.current_buffer(),
            transform: s.surface.transform(),
            z: s.surface.z_order_rank(),
        })
        .collect();

    trace!(
        "Composed frame {} for {:?}: {} elements, {} damage rects",
        seq,
        output,
        elements.len(),
        damage.rects().len()
    );
    Ok(ComposedFrame {
        output,
        seq,
        size: bounds.size(),
        damage: damage.clip(Rectangle::from_loc_size(0, 0, bounds.size())),
        elements,
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::compositor::ClientSurface;
    use crate::test_utils::MockSurface;

    #[test]
    fn test_compose_translates_to_output_local() {
        let mut surfaces = SurfaceRegistry::new();
        let rotated = MockSurface::new(Rectangle::new(1950, 10, 100, 100), 1);
        rotated.set_transform(BufferTransform::Rotate90);
        let inside: Rc<dyn ClientSurface> = rotated;
        let outside: Rc<dyn ClientSurface> = MockSurface::new(Rectangle::new(0, 0, 100, 100), 0);
        let id = surfaces.insert(&inside);
        surfaces.insert(&outside);

        let bounds = Rectangle::new(1920, 0, 1280, 1024);
        let frame = compose(
            OutputId(7),
            3,
            bounds,
            Region::from_rect(Rectangle::new(0, 0, 5000, 5000)),
            &surfaces,
        )
        .unwrap();

        assert_eq!(frame.elements.len(), 1);
        assert_eq!(frame.elements[0].surface, id);
        assert_eq!(frame.elements[0].geometry, Rectangle::new(30, 10, 100, 100));
        assert_eq!(frame.elements[0].transform, BufferTransform::Rotate90);
        assert_eq!(frame.size, Size::new(1280, 1024));
        // Damage clipped to the output
        assert_eq!(frame.damage.bounding_box(), Rectangle::new(0, 0, 1280, 1024));
    }

    #[test]
    fn test_render_error_kind() {
        assert!(RenderError::Transient("vblank".into()).is_transient());
        assert!(!RenderError::Persistent("gone".into()).is_transient());
    }
}
