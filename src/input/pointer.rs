//! Pointer (mouse/trackpad) handling
//!
//! The cursor lives in global layout coordinates and is kept on an output:
//! relative motion that would leave the layout is clamped to the closest
//! point of the nearest output.

use log::{debug, trace};

use crate::compositor::OutputLayoutManager;
use crate::utils::{Point, Rectangle};

/// Pointer state
#[derive(Debug)]
pub struct Pointer {
    /// Cursor position in global coordinates
    position: Point,
    /// Currently pressed buttons
    pressed_buttons: Vec<u32>,
}

impl Pointer {
    /// Create a new pointer
    pub fn new() -> Self {
        Self {
            position: Point::new(0.0, 0.0),
            pressed_buttons: Vec::new(),
        }
    }

    /// Get current position
    pub fn position(&self) -> Point {
        self.position
    }

    /// Update pointer position
    pub fn motion(&mut self, position: Point) {
        trace!("Pointer motion to ({}, {})", position.x, position.y);
        self.position = position;
    }

    /// Where a relative motion would take the cursor
    ///
    /// Without any placed output the cursor moves freely.
    pub fn motion_target(&self, dx: f64, dy: f64, layout: &OutputLayoutManager) -> Point {
        let candidate = self.position.offset(dx, dy);
        layout.closest_point(candidate).unwrap_or(candidate)
    }

    /// Move the cursor to a global position if an output contains it
    pub fn warp(&mut self, position: Point, layout: &OutputLayoutManager) -> bool {
        if layout.resolve(position).is_none() {
            debug!(
                "Refusing to warp outside the layout to ({}, {})",
                position.x, position.y
            );
            return false;
        }
        self.position = position;
        true
    }

    /// Put the cursor back inside the layout, e.g. after its output went away
    pub fn confine(&mut self, layout: &OutputLayoutManager) {
        if let Some(point) = layout.closest_point(self.position) {
            self.position = point;
        }
    }

    /// Handle a button press
    pub fn button_press(&mut self, button: u32) -> bool {
        if !self.pressed_buttons.contains(&button) {
            self.pressed_buttons.push(button);
            debug!("Button pressed: {}", button);
            true
        } else {
            false
        }
    }

    /// Handle a button release
    pub fn button_release(&mut self, button: u32) -> bool {
        if let Some(idx) = self.pressed_buttons.iter().position(|&b| b == button) {
            self.pressed_buttons.remove(idx);
            debug!("Button released: {}", button);
            true
        } else {
            false
        }
    }

    /// Get currently pressed buttons
    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed_buttons
    }

    /// Check if any button is pressed
    pub fn has_button_pressed(&self) -> bool {
        !self.pressed_buttons.is_empty()
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a normalized `0.0..=1.0` position onto an area
pub fn map_absolute(area: Rectangle, x: f64, y: f64) -> Point {
    let x = x.clamp(0.0, 1.0);
    let y = y.clamp(0.0, 1.0);
    area.clamp(Point::new(
        area.x as f64 + x * area.width as f64,
        area.y as f64 + y * area.height as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{Output, OutputId, OutputInfo, OutputMode};

    fn layout_with(rects: &[(i32, i32, i32, i32)]) -> OutputLayoutManager {
        let mut layout = OutputLayoutManager::new();
        for (n, &(x, y, w, h)) in rects.iter().enumerate() {
            let id = OutputId::new();
            let info = OutputInfo::new(format!("OUT-{}", n), OutputMode::new(w, h, 60_000));
            layout.add(Output::new(id, info), n as u64);
            layout.place(id, x, y).unwrap();
        }
        layout
    }

    #[test]
    fn test_pointer_new() {
        let pointer = Pointer::new();
        assert_eq!(pointer.position(), Point::new(0.0, 0.0));
        assert!(pointer.pressed_buttons().is_empty());
    }

    #[test]
    fn test_button_press_release() {
        let mut pointer = Pointer::new();

        // Press left button
        assert!(pointer.button_press(0x110));
        assert!(pointer.pressed_buttons().contains(&0x110));
        assert!(pointer.has_button_pressed());
        assert!(!pointer.button_press(0x110));

        // Release
        assert!(pointer.button_release(0x110));
        assert!(!pointer.has_button_pressed());
    }

    #[test]
    fn test_motion_clamped_to_layout() {
        let layout = layout_with(&[(0, 0, 100, 100)]);
        let mut pointer = Pointer::new();
        pointer.motion(Point::new(50.0, 50.0));

        let target = pointer.motion_target(500.0, 0.0, &layout);
        assert!(target.x < 100.0 && target.x > 99.0);
        assert_eq!(target.y, 50.0);
        assert!(layout.resolve(target).is_some());
    }

    #[test]
    fn test_motion_crosses_shared_edge() {
        let layout = layout_with(&[(0, 0, 100, 100), (100, 0, 100, 100)]);
        let mut pointer = Pointer::new();
        pointer.motion(Point::new(95.0, 10.0));

        let target = pointer.motion_target(10.0, 0.0, &layout);
        assert_eq!(target, Point::new(105.0, 10.0));
    }

    #[test]
    fn test_motion_without_outputs_is_free() {
        let layout = OutputLayoutManager::new();
        let pointer = Pointer::new();
        assert_eq!(
            pointer.motion_target(-5.0, 7.0, &layout),
            Point::new(-5.0, 7.0)
        );
    }

    #[test]
    fn test_warp() {
        let layout = layout_with(&[(0, 0, 100, 100)]);
        let mut pointer = Pointer::new();
        assert!(pointer.warp(Point::new(10.0, 10.0), &layout));
        assert!(!pointer.warp(Point::new(150.0, 10.0), &layout));
        assert_eq!(pointer.position(), Point::new(10.0, 10.0));
    }

    #[test]
    fn test_map_absolute() {
        let area = Rectangle::new(100, 0, 200, 100);
        assert_eq!(map_absolute(area, 0.5, 0.5), Point::new(200.0, 50.0));
        let edge = map_absolute(area, 1.0, 1.0);
        assert!(area.contains(edge));
    }
}
