//! Seam to the rendering engine.
//!
//! The reconciler never draws anything itself. It asks a [`SceneEngine`] to
//! materialize shapes from descriptors and to repaint after each change, so a
//! browser host can plug in its canvas library while tests and the CLI use
//! [`HeadlessEngine`].

use serde_json::Value;

use crate::doc::{SceneError, SceneGraph, Shape};

/// Rendering capability the reconciler drives.
pub trait SceneEngine {
    /// Build a live shape from a descriptor. Failure means the descriptor is
    /// malformed; the caller drops that one shape.
    ///
    /// # Errors
    ///
    /// Returns a [`SceneError`] when the descriptor cannot be materialized.
    fn enliven(&mut self, id: &str, descriptor: &Value) -> Result<Shape, SceneError>;

    /// Redraw the whole scene.
    fn repaint(&mut self, scene: &SceneGraph);
}

/// Engine without a display: validates descriptors and counts repaints.
#[derive(Debug, Default, Clone)]
pub struct HeadlessEngine {
    repaints: usize,
}

impl HeadlessEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of repaints requested so far.
    #[must_use]
    pub fn repaints(&self) -> usize {
        self.repaints
    }
}

impl SceneEngine for HeadlessEngine {
    fn enliven(&mut self, id: &str, descriptor: &Value) -> Result<Shape, SceneError> {
        Shape::from_descriptor(id, descriptor)
    }

    fn repaint(&mut self, _scene: &SceneGraph) {
        self.repaints += 1;
    }
}
