//! Crate-level error taxonomy
//!
//! Each component has its own error enum; [`CompositorError`] aggregates them
//! for the top-level dispatch. Only [`StaleReference`] is fatal.

use thiserror::Error;

use crate::backend::{AdapterId, MuxError};
use crate::compositor::layout::LayoutError;
use crate::compositor::OutputId;
use crate::input::RouteError;
use crate::renderer::{RenderError, SchedulerError};

/// Kind of object a [`StaleReference`] points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Adapter,
    Device,
    Output,
    Surface,
}

/// A reference to an object after its removal was announced
///
/// Removal notifications are synchronous and ordered before any reuse of an
/// identity, so observing one of these means an invariant was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale reference to {kind:?} #{id}")]
pub struct StaleReference {
    pub kind: ObjectKind,
    pub id: u64,
}

impl StaleReference {
    pub fn new(kind: ObjectKind, id: u64) -> Self {
        Self { kind, id }
    }
}

/// Errors surfaced by the compositor core
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("adapter {name} ({id:?}) stopped responding and was detached")]
    AdapterUnresponsive { id: AdapterId, name: String },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("output {output:?} is degraded: {source}")]
    Render {
        output: OutputId,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Backend(#[from] MuxError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    StaleReference(#[from] StaleReference),
}

impl CompositorError {
    /// Whether the error signals a broken internal invariant
    pub fn is_fatal(&self) -> bool {
        match self {
            CompositorError::StaleReference(_) => true,
            CompositorError::Scheduler(SchedulerError::Stale(_)) => true,
            CompositorError::Route(RouteError::Stale(_)) => true,
            CompositorError::Backend(MuxError::Stale(_)) => true,
            _ => false,
        }
    }
}
