//! Output layout
//!
//! Arranges outputs in one logical coordinate space. Placements never
//! overlap, and outputs placed next to each other share exact integer edges
//! so that pointer motion across an edge is continuous.
//!
//! Point lookups go through [`LayoutIndex`]: the x axis is cut into slabs at
//! every output edge, and each slab holds the sorted, disjoint y intervals of
//! the outputs spanning it. A lookup is two binary searches.

use std::collections::HashMap;

use log::{debug, info, warn};
use thiserror::Error;

use crate::compositor::{Output, OutputId, OutputMode};
use crate::utils::{Point, Rectangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("output {output:?} at {rect:?} would overlap output {other:?}")]
    Overlap {
        output: OutputId,
        rect: Rectangle,
        other: OutputId,
    },
    #[error("unknown output {0:?}")]
    UnknownOutput(OutputId),
}

/// How an output got its position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Known to the layout but not part of the coordinate space yet
    Unplaced,
    /// Positioned explicitly
    Manual,
    /// Positioned by [`OutputLayoutManager::auto_arrange`]
    Auto,
}

#[derive(Debug)]
struct LayoutEntry {
    output: Output,
    discovery: u64,
    placement: Placement,
    geometry: Option<Rectangle>,
}

/// Point-to-output index over non-overlapping rectangles
#[derive(Debug, Default)]
struct LayoutIndex {
    /// Sorted, deduplicated x edges
    edges: Vec<i32>,
    /// `slabs[i]` covers `edges[i]..edges[i + 1]`, intervals sorted by start
    slabs: Vec<Vec<(i32, i32, OutputId)>>,
}

impl LayoutIndex {
    fn rebuild<'a>(&mut self, rects: impl Iterator<Item = (OutputId, &'a Rectangle)> + Clone) {
        let mut edges: Vec<i32> = rects
            .clone()
            .flat_map(|(_, rect)| [rect.x, rect.right()])
            .collect();
        edges.sort_unstable();
        edges.dedup();

        let mut slabs = Vec::with_capacity(edges.len().saturating_sub(1));
        for window in edges.windows(2) {
            let (start, end) = (window[0], window[1]);
            let mut intervals: Vec<(i32, i32, OutputId)> = rects
                .clone()
                .filter(|(_, rect)| rect.x <= start && rect.right() >= end)
                .map(|(id, rect)| (rect.y, rect.bottom(), id))
                .collect();
            intervals.sort_unstable_by_key(|(y, _, _)| *y);
            slabs.push(intervals);
        }

        self.edges = edges;
        self.slabs = slabs;
    }

    fn lookup(&self, point: Point) -> Option<OutputId> {
        let slab = self.edges.partition_point(|edge| (*edge as f64) <= point.x);
        if slab == 0 || slab >= self.edges.len() {
            return None;
        }
        let intervals = &self.slabs[slab - 1];
        let idx = intervals.partition_point(|(start, _, _)| (*start as f64) <= point.y);
        if idx == 0 {
            return None;
        }
        let (_, end, id) = intervals[idx - 1];
        (point.y < end as f64).then_some(id)
    }
}

/// Arranges active outputs in the global layout space
#[derive(Debug, Default)]
pub struct OutputLayoutManager {
    entries: HashMap<OutputId, LayoutEntry>,
    index: LayoutIndex,
}

impl OutputLayoutManager {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an output known to the layout, unplaced
    pub fn add(&mut self, output: Output, discovery: u64) {
        debug!("Layout: adding output {} ({:?})", output.name, output.id);
        self.entries.insert(
            output.id,
            LayoutEntry {
                output,
                discovery,
                placement: Placement::Unplaced,
                geometry: None,
            },
        );
    }

    /// Insert or move an output to an explicit position
    pub fn place(&mut self, id: OutputId, x: i32, y: i32) -> Result<Rectangle, LayoutError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(LayoutError::UnknownOutput(id))?;
        let rect = Rectangle::from_loc_size(x, y, entry.output.logical_size());

        if let Some(other) = self.overlapping(id, rect) {
            return Err(LayoutError::Overlap {
                output: id,
                rect,
                other,
            });
        }

        self.set_geometry(id, Placement::Manual, rect);
        info!("Output {:?} placed at {:?}", id, rect);
        Ok(rect)
    }

    /// Place every unplaced output to the right of the layout, top-aligned
    ///
    /// Outputs are taken in discovery order. Returns the new placements.
    pub fn auto_arrange(&mut self) -> Vec<(OutputId, Rectangle)> {
        let mut pending: Vec<(u64, OutputId)> = self
            .entries
            .values()
            .filter(|e| e.placement == Placement::Unplaced)
            .map(|e| (e.discovery, e.output.id))
            .collect();
        pending.sort_unstable();

        let mut placed = Vec::with_capacity(pending.len());
        for (_, id) in pending {
            let (x, y) = self.next_free_position();
            let size = self.entries[&id].output.logical_size();
            let rect = Rectangle::from_loc_size(x, y, size);
            self.set_geometry(id, Placement::Auto, rect);
            info!("Output {:?} auto-arranged at {:?}", id, rect);
            placed.push((id, rect));
        }
        placed
    }

    /// Take an output out of the layout
    ///
    /// Remaining outputs keep their positions; gaps are allowed.
    pub fn remove(&mut self, id: OutputId) -> Result<Output, LayoutError> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(LayoutError::UnknownOutput(id))?;
        self.rebuild_index();
        info!("Output {} ({:?}) removed from layout", entry.output.name, id);
        Ok(entry.output)
    }

    /// Apply a mode change
    ///
    /// Auto-arranged outputs re-flow; a manually placed output that would
    /// now overlap a neighbour moves to the right edge of the layout.
    pub fn set_mode(&mut self, id: OutputId, mode: OutputMode) -> Result<(), LayoutError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(LayoutError::UnknownOutput(id))?;
        entry.output.set_mode(mode);
        self.geometry_changed(id);
        Ok(())
    }

    fn geometry_changed(&mut self, id: OutputId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let Some(old) = entry.geometry else {
            return;
        };
        let size = entry.output.logical_size();

        match entry.placement {
            Placement::Unplaced => {}
            Placement::Auto => self.reflow(),
            Placement::Manual => {
                let rect = Rectangle::from_loc_size(old.x, old.y, size);
                if let Some(other) = self.overlapping(id, rect) {
                    self.clear_geometry(id);
                    let (x, y) = self.next_free_position();
                    let moved = Rectangle::from_loc_size(x, y, size);
                    warn!(
                        "Output {:?} would overlap {:?} after resize, moved to {:?}",
                        id, other, moved
                    );
                    self.set_geometry(id, Placement::Manual, moved);
                } else {
                    self.set_geometry(id, Placement::Manual, rect);
                }
            }
        }
    }

    /// Re-run auto arrangement for every auto-placed output
    fn reflow(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.placement == Placement::Auto {
                entry.placement = Placement::Unplaced;
                entry.geometry = None;
            }
        }
        self.rebuild_index();
        self.auto_arrange();
    }

    /// Top-left corner right of everything placed, aligned to the top edge
    fn next_free_position(&self) -> (i32, i32) {
        self.bounding_box()
            .map(|bbox| (bbox.right(), bbox.y))
            .unwrap_or((0, 0))
    }

    fn overlapping(&self, id: OutputId, rect: Rectangle) -> Option<OutputId> {
        self.placed()
            .filter(|(other, _)| *other != id)
            .find(|(_, other_rect)| other_rect.overlaps(rect))
            .map(|(other, _)| other)
    }

    fn set_geometry(&mut self, id: OutputId, placement: Placement, rect: Rectangle) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.placement = placement;
            entry.geometry = Some(rect);
        }
        self.rebuild_index();
    }

    fn clear_geometry(&mut self, id: OutputId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.placement = Placement::Unplaced;
            entry.geometry = None;
        }
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        let entries = &self.entries;
        self.index.rebuild(
            entries
                .values()
                .filter_map(|e| e.geometry.as_ref().map(|rect| (e.output.id, rect))),
        );
    }

    /// Find the output containing a global point
    pub fn resolve(&self, point: Point) -> Option<OutputId> {
        self.index.lookup(point)
    }

    /// Clamp a point into the union of all placed outputs
    pub fn closest_point(&self, point: Point) -> Option<Point> {
        if self.resolve(point).is_some() {
            return Some(point);
        }
        self.placed()
            .map(|(_, rect)| rect.clamp(point))
            .min_by(|a, b| {
                let da = (a.x - point.x).powi(2) + (a.y - point.y).powi(2);
                let db = (b.x - point.x).powi(2) + (b.y - point.y).powi(2);
                da.total_cmp(&db)
            })
    }

    /// Placement rectangle of an output, if it is placed
    pub fn geometry(&self, id: OutputId) -> Option<Rectangle> {
        self.entries.get(&id).and_then(|e| e.geometry)
    }

    pub fn placement(&self, id: OutputId) -> Option<Placement> {
        self.entries.get(&id).map(|e| e.placement)
    }

    /// Get an output known to the layout
    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.entries.get(&id).map(|e| &e.output)
    }

    /// Find an output by name
    pub fn output_by_name(&self, name: &str) -> Option<&Output> {
        self.entries
            .values()
            .map(|e| &e.output)
            .find(|o| o.name == name)
    }

    /// Placed outputs with their rectangles, in discovery order
    pub fn placed(&self) -> impl Iterator<Item = (OutputId, Rectangle)> + '_ {
        let mut placed: Vec<(u64, OutputId, Rectangle)> = self
            .entries
            .values()
            .filter_map(|e| e.geometry.map(|rect| (e.discovery, e.output.id, rect)))
            .collect();
        placed.sort_unstable_by_key(|(discovery, _, _)| *discovery);
        placed.into_iter().map(|(_, id, rect)| (id, rect))
    }

    /// Placed outputs intersecting a global rectangle
    pub fn outputs_intersecting(&self, rect: Rectangle) -> Vec<(OutputId, Rectangle)> {
        self.placed()
            .filter(|(_, output_rect)| output_rect.overlaps(rect))
            .collect()
    }

    /// Smallest rectangle containing every placed output
    pub fn bounding_box(&self) -> Option<Rectangle> {
        self.placed().map(|(_, rect)| rect).reduce(|a, b| a.merge(b))
    }

    /// Number of outputs known to the layout, placed or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::OutputInfo;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn output(width: i32, height: i32) -> Output {
        Output::new(
            OutputId::new(),
            OutputInfo::new("test", OutputMode::new(width, height, 60000)),
        )
    }

    fn add(layout: &mut OutputLayoutManager, width: i32, height: i32, discovery: u64) -> OutputId {
        let output = output(width, height);
        let id = output.id;
        layout.add(output, discovery);
        id
    }

    #[test]
    fn test_place_and_resolve() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 1920, 1080, 1);
        let b = add(&mut layout, 1280, 1024, 2);

        layout.place(a, 0, 0).unwrap();
        layout.place(b, 1920, 0).unwrap();

        assert_eq!(layout.resolve(Point::new(10.0, 10.0)), Some(a));
        assert_eq!(layout.resolve(Point::new(1919.9, 500.0)), Some(a));
        assert_eq!(layout.resolve(Point::new(1920.0, 500.0)), Some(b));
        // Below the shorter output there is nothing
        assert_eq!(layout.resolve(Point::new(2000.0, 1050.0)), None);
        assert_eq!(layout.resolve(Point::new(-1.0, 0.0)), None);
    }

    #[test]
    fn test_place_overlap_rejected() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 1920, 1080, 1);
        let b = add(&mut layout, 1920, 1080, 2);

        layout.place(a, 0, 0).unwrap();
        let err = layout.place(b, 1000, 0).unwrap_err();
        assert!(matches!(err, LayoutError::Overlap { other, .. } if other == a));
        assert_eq!(layout.geometry(b), None);

        // Moving an output onto its own old rectangle is fine
        layout.place(a, 10, 0).unwrap();
        assert_eq!(layout.geometry(a), Some(Rectangle::new(10, 0, 1920, 1080)));
    }

    #[test]
    fn test_auto_arrange_left_to_right() {
        let mut layout = OutputLayoutManager::new();
        let second = add(&mut layout, 1280, 1024, 7);
        let first = add(&mut layout, 1920, 1080, 3);

        let placed = layout.auto_arrange();
        assert_eq!(
            placed,
            vec![
                (first, Rectangle::new(0, 0, 1920, 1080)),
                (second, Rectangle::new(1920, 0, 1280, 1024)),
            ]
        );
    }

    #[test]
    fn test_remove_keeps_positions() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 100, 100, 1);
        let b = add(&mut layout, 100, 100, 2);
        let c = add(&mut layout, 100, 100, 3);
        layout.auto_arrange();

        layout.remove(b).unwrap();
        assert_eq!(layout.geometry(a), Some(Rectangle::new(0, 0, 100, 100)));
        assert_eq!(layout.geometry(c), Some(Rectangle::new(200, 0, 100, 100)));
        assert_eq!(layout.resolve(Point::new(150.0, 50.0)), None);
        assert_eq!(layout.resolve(Point::new(250.0, 50.0)), Some(c));
        assert!(matches!(layout.remove(b), Err(LayoutError::UnknownOutput(_))));
    }

    #[test]
    fn test_closest_point_confines_to_outputs() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 100, 100, 1);
        let b = add(&mut layout, 100, 50, 2);
        layout.auto_arrange();

        let p = layout.closest_point(Point::new(150.0, 80.0)).unwrap();
        assert_eq!(layout.resolve(p), Some(b));
        let p = layout.closest_point(Point::new(-40.0, 20.0)).unwrap();
        assert_eq!(p, Point::new(0.0, 20.0));
        assert_eq!(layout.resolve(p), Some(a));
    }

    #[test]
    fn test_mode_change_reflows_auto_outputs() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 1920, 1080, 1);
        let b = add(&mut layout, 1920, 1080, 2);
        layout.auto_arrange();

        layout
            .set_mode(a, OutputMode::new(2560, 1440, 60000))
            .unwrap();
        assert_eq!(layout.geometry(a), Some(Rectangle::new(0, 0, 2560, 1440)));
        assert_eq!(layout.geometry(b), Some(Rectangle::new(2560, 0, 1920, 1080)));
    }

    #[test]
    fn test_mode_change_moves_overlapping_manual_output() {
        let mut layout = OutputLayoutManager::new();
        let a = add(&mut layout, 1000, 1000, 1);
        let b = add(&mut layout, 1000, 1000, 2);
        layout.place(a, 0, 0).unwrap();
        layout.place(b, 1000, 0).unwrap();

        layout.set_mode(a, OutputMode::new(1500, 1000, 60000)).unwrap();
        let rect = layout.geometry(a).unwrap();
        assert!(!rect.overlaps(layout.geometry(b).unwrap()));
        assert_eq!(rect, Rectangle::new(2000, 0, 1500, 1000));
    }

    #[test]
    fn test_auto_arrange_never_overlaps_random_orders() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..64 {
            let mut layout = OutputLayoutManager::new();

            // A few manual outputs scattered around first
            for _ in 0..rng.gen_range(0..3) {
                let id = add(&mut layout, rng.gen_range(200..3000), rng.gen_range(200..2000), 0);
                let _ = layout.place(id, rng.gen_range(-4000..4000), rng.gen_range(-2000..2000));
            }

            let mut discoveries: Vec<u64> = (1..=rng.gen_range(1..8)).collect();
            discoveries.shuffle(&mut rng);
            for discovery in discoveries {
                add(
                    &mut layout,
                    rng.gen_range(200..4000),
                    rng.gen_range(200..2500),
                    discovery,
                );
                if rng.gen_bool(0.5) {
                    layout.auto_arrange();
                }
            }
            layout.auto_arrange();

            let placed: Vec<_> = layout.placed().collect();
            for (i, (a, ra)) in placed.iter().enumerate() {
                for (b, rb) in &placed[i + 1..] {
                    assert!(!ra.overlaps(*rb), "{:?} {:?} overlaps {:?} {:?}", a, ra, b, rb);
                }
                let center = Point::new(
                    ra.x as f64 + ra.width as f64 / 2.0,
                    ra.y as f64 + ra.height as f64 / 2.0,
                );
                assert_eq!(layout.resolve(center), Some(*a));
            }
        }
    }
}
