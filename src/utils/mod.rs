//! Shared geometry helpers

pub mod geometry;

pub use geometry::{Point, Rectangle, Region, Size};
