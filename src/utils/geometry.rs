//! Geometry primitives
//!
//! Points are floating point (input coordinates), rectangles are integer
//! (layout placement, damage). Rectangles are half-open: a rectangle at
//! `x = 0` with `width = 10` covers `0.0 <= x < 10.0`.

/// Smallest step the cursor can take inside an exclusive edge (wl_fixed resolution)
const EDGE_EPSILON: f64 = 1.0 / 256.0;

/// A point in some coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Translate the point by the given offset
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Express this point relative to the origin of `rect`
    pub fn relative_to(self, rect: Rectangle) -> Self {
        Self {
            x: self.x - rect.x as f64,
            y: self.y - rect.y as f64,
        }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// An integer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

impl Size {
    pub fn new(w: i32, h: i32) -> Self {
        Self { w, h }
    }
}

impl From<(i32, i32)> for Size {
    fn from((w, h): (i32, i32)) -> Self {
        Self { w, h }
    }
}

/// An axis-aligned integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    /// Create a new rectangle
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle at the given location with the given size
    pub fn from_loc_size(x: i32, y: i32, size: Size) -> Self {
        Self::new(x, y, size.w, size.h)
    }

    /// Create a rectangle from its top-left and bottom-right corners
    pub fn from_extremities(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Checks whether the given point is inside the rectangle
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x as f64
            && point.x < self.right() as f64
            && point.y >= self.y as f64
            && point.y < self.bottom() as f64
    }

    /// Checks whether `other` lies completely inside this rectangle
    pub fn contains_rect(&self, other: Rectangle) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Checks whether two rectangles overlap
    ///
    /// Touching rectangles do not overlap.
    pub fn overlaps(&self, other: Rectangle) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Checks whether two rectangles overlap or share an edge
    pub fn overlaps_or_touches(&self, other: Rectangle) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    /// The overlapping area of two rectangles, if any
    pub fn intersection(&self, other: Rectangle) -> Option<Rectangle> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Rectangle::from_extremities(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        ))
    }

    /// Smallest rectangle containing both
    pub fn merge(&self, other: Rectangle) -> Rectangle {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return *self;
        }
        Rectangle::from_extremities(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Move the rectangle by the given offset
    pub fn translate(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// The point inside the rectangle closest to `point`
    ///
    /// The result lies within the half-open bounds, so the right and bottom
    /// edges clamp to just inside the rectangle.
    pub fn clamp(&self, point: Point) -> Point {
        let max_x = (self.right() as f64 - EDGE_EPSILON).max(self.x as f64);
        let max_y = (self.bottom() as f64 - EDGE_EPSILON).max(self.y as f64);
        Point::new(
            point.x.clamp(self.x as f64, max_x),
            point.y.clamp(self.y as f64, max_y),
        )
    }

    /// Subtract a set of rectangles, returning what is left of `self`
    ///
    /// The result consists of disjoint rectangles.
    pub fn subtract_rects(self, others: impl IntoIterator<Item = Rectangle>) -> Vec<Rectangle> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut rects = vec![self];

        for other in others {
            if rects.is_empty() {
                break;
            }

            let items = rects.len();
            let mut index = 0usize;
            for _ in 0..items {
                let Some(intersection) = rects[index].intersection(other) else {
                    index += 1;
                    continue;
                };

                let item = rects.remove(index);
                if other.contains_rect(item) {
                    continue;
                }

                let top = Rectangle::from_extremities(item.x, item.y, item.right(), intersection.y);
                let left = Rectangle::from_extremities(
                    item.x,
                    intersection.y,
                    intersection.x,
                    intersection.bottom(),
                );
                let right = Rectangle::from_extremities(
                    intersection.right(),
                    intersection.y,
                    item.right(),
                    intersection.bottom(),
                );
                let bottom = Rectangle::from_extremities(
                    item.x,
                    intersection.bottom(),
                    item.right(),
                    item.bottom(),
                );

                rects.extend(
                    [top, left, right, bottom]
                        .into_iter()
                        .filter(|rect| !rect.is_empty()),
                );
            }
        }

        rects
    }
}

/// A set of disjoint rectangles, kept in insertion order
///
/// Used for damage: adding a rectangle only adds the parts not already
/// covered, so the region is always the exact union of what was added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// A region covering exactly `rect`
    pub fn from_rect(rect: Rectangle) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        let remainder = rect.subtract_rects(self.rects.iter().copied());
        self.rects.extend(remainder);
    }

    /// Add all of `other` to this region
    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Checks whether the region covers the whole of `rect`
    pub fn covers(&self, rect: Rectangle) -> bool {
        rect.subtract_rects(self.rects.iter().copied()).is_empty()
    }

    /// Checks whether the region contains the given point
    pub fn contains(&self, point: Point) -> bool {
        self.rects.iter().any(|rect| rect.contains(point))
    }

    /// Restrict the region to `bounds`
    pub fn clip(&self, bounds: Rectangle) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .filter_map(|rect| rect.intersection(bounds))
                .collect(),
        }
    }

    /// Smallest rectangle containing the whole region
    pub fn bounding_box(&self) -> Rectangle {
        self.rects
            .iter()
            .fold(Rectangle::default(), |acc, rect| acc.merge(*rect))
    }

    /// Total covered area
    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rectangle::area).sum()
    }

    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Take the region, leaving an empty one behind
    pub fn take(&mut self) -> Region {
        std::mem::take(self)
    }
}
