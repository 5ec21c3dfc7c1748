//! Canvas reconciler: keeps the local scene in step with the room.
//!
//! DESIGN
//! ======
//! Local edits and remote events both mutate the same `SceneGraph`, and every
//! mutation funnels into one change hook (`on_scene_change`). The hook turns
//! local changes into outbound drawing events and undo records. Remote
//! application, snapshot loads, clears and undo run under a [`Suppression`]
//! guard, and the hook returns on its first line while the guard is held, so
//! nothing applied from the network is ever echoed back out.
//!
//! ERROR HANDLING
//! ==============
//! Nothing in `apply_remote` escapes to the caller. A malformed payload or a
//! descriptor the engine cannot materialize drops that one event with a
//! warning; modify/remove for an identity that is not in the scene is a
//! debug-logged no-op. The guard is released on every exit path by `Drop`.

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use whiteboard_frames::{
    ClientEvent, DrawingAction, DrawingEvent, DrawingRecord, Empty, SaveCanvas, ShapePayload, ShapeRef,
};

use crate::doc::{CanvasSnapshot, SceneError, SceneGraph, Shape, ShapeId, descriptor_id};
use crate::engine::SceneEngine;
use crate::undo::{HistoryListener, UndoRecord, UndoStack};

// =============================================================================
// OUTBOUND
// =============================================================================

/// Outbound side of the event channel.
pub trait EventSink {
    fn send(&mut self, event: ClientEvent);
}

impl EventSink for Vec<ClientEvent> {
    fn send(&mut self, event: ClientEvent) {
        self.push(event);
    }
}

// =============================================================================
// SUPPRESSION
// =============================================================================

/// Reentrancy flag that marks "the scene is being changed on behalf of the
/// network, not the user".
#[derive(Debug, Clone, Default)]
pub struct Suppression {
    engaged: Rc<Cell<bool>>,
}

impl Suppression {
    /// Raise the flag until the returned guard is dropped. Nested guards
    /// restore the outer state.
    pub fn engage(&self) -> SuppressionGuard {
        let previous = self.engaged.replace(true);
        SuppressionGuard { engaged: Rc::clone(&self.engaged), previous }
    }

    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.engaged.get()
    }
}

#[must_use = "suppression ends as soon as the guard is dropped"]
pub struct SuppressionGuard {
    engaged: Rc<Cell<bool>>,
    previous: bool,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.engaged.set(self.previous);
    }
}

/// A mutation the scene just went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneChange {
    PathCreated(ShapeId),
    ObjectAdded(ShapeId),
    ObjectModified(ShapeId),
    ObjectRemoved(ShapeId),
}

// =============================================================================
// RECONCILER
// =============================================================================

pub struct CanvasReconciler<E, S> {
    scene: SceneGraph,
    engine: E,
    sink: S,
    undo: UndoStack,
    suppression: Suppression,
}

impl<E: SceneEngine, S: EventSink> CanvasReconciler<E, S> {
    #[must_use]
    pub fn new(engine: E, sink: S) -> Self {
        Self { scene: SceneGraph::new(), engine, sink, undo: UndoStack::new(), suppression: Suppression::default() }
    }

    #[must_use]
    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// True while a remote event, snapshot load, clear or undo is running.
    #[must_use]
    pub fn is_applying_remote(&self) -> bool {
        self.suppression.is_engaged()
    }

    pub fn set_history_listener(&mut self, listener: HistoryListener) {
        self.undo.set_listener(listener);
    }

    // --- Local interaction ---

    /// Finish a free-hand stroke.
    ///
    /// # Errors
    ///
    /// Returns a [`SceneError`] if the engine rejects the descriptor, or
    /// [`SceneError::DuplicateId`] if its `id` is already on the canvas.
    pub fn draw_path(&mut self, descriptor: Value) -> Result<ShapeId, SceneError> {
        let shape = self.materialize_new(&descriptor)?;
        Ok(self.insert_into_scene(shape, SceneChange::PathCreated))
    }

    /// Add a shape (rectangle, circle, text, ...).
    ///
    /// # Errors
    ///
    /// Returns a [`SceneError`] if the engine rejects the descriptor, or
    /// [`SceneError::DuplicateId`] if its `id` is already on the canvas.
    pub fn add_shape(&mut self, descriptor: Value) -> Result<ShapeId, SceneError> {
        let shape = self.materialize_new(&descriptor)?;
        Ok(self.insert_into_scene(shape, SceneChange::ObjectAdded))
    }

    /// Replace a shape's descriptor. Returns false if the shape is gone.
    ///
    /// # Errors
    ///
    /// Returns a [`SceneError`] if the engine rejects the descriptor.
    pub fn modify_shape(&mut self, id: &str, descriptor: Value) -> Result<bool, SceneError> {
        if !self.scene.contains(id) {
            return Ok(false);
        }
        let shape = self.engine.enliven(id, &descriptor)?;
        Ok(self.replace_in_scene(shape))
    }

    /// Delete a shape. Returns false if the shape is gone.
    pub fn remove_shape(&mut self, id: &str) -> bool {
        self.remove_from_scene(id)
    }

    /// Clear the canvas for everyone in the room.
    pub fn clear(&mut self) {
        self.reset_scene();
        self.sink.send(ClientEvent::ClearCanvas(Empty {}));
    }

    /// Reverse the newest local creation and tell the room it is gone.
    /// Returns the removed identity, or `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<ShapeId> {
        let record = self.undo.pop()?;
        {
            let _guard = self.suppression.engage();
            self.remove_from_scene(&record.id);
        }
        self.emit(&DrawingAction::ObjectRemoved(ShapeRef { object_id: record.id.clone() }));
        Some(record.id)
    }

    /// Ask the server to store the current scene as the room snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] if the scene cannot be serialized.
    pub fn save(&mut self) -> Result<(), SceneError> {
        let canvas_data = serde_json::to_value(self.scene.to_snapshot())?;
        self.sink.send(ClientEvent::SaveCanvas(SaveCanvas { canvas_data }));
        Ok(())
    }

    // --- Remote application ---

    /// Apply a drawing event relayed from another session.
    pub fn apply_remote(&mut self, record: &DrawingRecord) {
        let _guard = self.suppression.engage();

        let action = match record.event().action() {
            Ok(action) => action,
            Err(e) => {
                warn!(kind = record.kind.as_str(), user_id = %record.user_id, error = %e, "reconciler: malformed drawing event dropped");
                return;
            }
        };

        match action {
            DrawingAction::PathCreated(payload) => self.apply_remote_create(&payload, SceneChange::PathCreated),
            DrawingAction::ObjectAdded(payload) => self.apply_remote_create(&payload, SceneChange::ObjectAdded),
            DrawingAction::ObjectModified(payload) => self.apply_remote_modify(&payload),
            DrawingAction::ObjectRemoved(target) => {
                if !self.remove_from_scene(&target.object_id) {
                    debug!(object_id = %target.object_id, "reconciler: remove for unknown shape ignored");
                }
            }
            DrawingAction::Clear => self.reset_scene(),
        }
    }

    /// Apply a clear issued by another session.
    pub fn apply_remote_clear(&mut self) {
        self.reset_scene();
    }

    /// Replace the whole scene with a snapshot blob.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] if the blob is not a snapshot; the
    /// current scene is left untouched in that case.
    pub fn load_snapshot(&mut self, blob: &str) -> Result<usize, SceneError> {
        let snapshot = CanvasSnapshot::from_blob(blob)?;
        Ok(self.load(snapshot))
    }

    /// Replace the whole scene with a decoded snapshot. Objects the engine
    /// cannot materialize are skipped. Returns the number of shapes loaded.
    pub fn load(&mut self, snapshot: CanvasSnapshot) -> usize {
        {
            let _guard = self.suppression.engage();
            let mut scene = SceneGraph::new();
            scene.set_background(snapshot.background);
            for object in &snapshot.objects {
                let id = descriptor_id(object).map_or_else(new_shape_id, str::to_owned);
                match self.engine.enliven(&id, object) {
                    Ok(shape) => scene.insert(shape),
                    Err(e) => warn!(%id, error = %e, "reconciler: snapshot shape skipped"),
                }
            }
            self.scene = scene;
            self.engine.repaint(&self.scene);
        }
        self.undo.clear();
        self.scene.len()
    }

    // --- Scene mutation ---

    fn apply_remote_create(&mut self, payload: &ShapePayload, change: fn(ShapeId) -> SceneChange) {
        match self.engine.enliven(&payload.object_id, &payload.object) {
            Ok(shape) => {
                self.insert_into_scene(shape, change);
            }
            Err(e) => warn!(object_id = %payload.object_id, error = %e, "reconciler: remote shape dropped"),
        }
    }

    fn apply_remote_modify(&mut self, payload: &ShapePayload) {
        if !self.scene.contains(&payload.object_id) {
            debug!(object_id = %payload.object_id, "reconciler: modify for unknown shape ignored");
            return;
        }
        match self.engine.enliven(&payload.object_id, &payload.object) {
            Ok(shape) => {
                self.replace_in_scene(shape);
            }
            Err(e) => warn!(object_id = %payload.object_id, error = %e, "reconciler: remote modification dropped"),
        }
    }

    /// Local creations must introduce a new identity.
    fn materialize_new(&mut self, descriptor: &Value) -> Result<Shape, SceneError> {
        let id = descriptor_id(descriptor).map_or_else(new_shape_id, str::to_owned);
        if self.scene.contains(&id) {
            return Err(SceneError::DuplicateId(id));
        }
        self.engine.enliven(&id, descriptor)
    }

    fn insert_into_scene(&mut self, shape: Shape, change: fn(ShapeId) -> SceneChange) -> ShapeId {
        let id = shape.id.clone();
        self.scene.insert(shape);
        self.engine.repaint(&self.scene);
        self.on_scene_change(change(id.clone()));
        id
    }

    fn replace_in_scene(&mut self, shape: Shape) -> bool {
        let id = shape.id.clone();
        if !self.scene.replace(shape) {
            return false;
        }
        self.engine.repaint(&self.scene);
        self.on_scene_change(SceneChange::ObjectModified(id));
        true
    }

    fn remove_from_scene(&mut self, id: &str) -> bool {
        if self.scene.remove(id).is_none() {
            return false;
        }
        self.engine.repaint(&self.scene);
        self.on_scene_change(SceneChange::ObjectRemoved(id.to_owned()));
        true
    }

    fn reset_scene(&mut self) {
        {
            let _guard = self.suppression.engage();
            self.scene.clear();
            self.engine.repaint(&self.scene);
        }
        self.undo.clear();
    }

    /// Change hook for every scene mutation.
    fn on_scene_change(&mut self, change: SceneChange) {
        if self.suppression.is_engaged() {
            return;
        }

        match change {
            SceneChange::PathCreated(id) => {
                if let Some(payload) = self.record_creation(&id) {
                    self.emit(&DrawingAction::PathCreated(payload));
                }
            }
            SceneChange::ObjectAdded(id) => {
                if let Some(payload) = self.record_creation(&id) {
                    self.emit(&DrawingAction::ObjectAdded(payload));
                }
            }
            SceneChange::ObjectModified(id) => {
                if let Some(shape) = self.scene.get(&id) {
                    let payload = ShapePayload { object: shape.descriptor.clone(), object_id: id };
                    self.emit(&DrawingAction::ObjectModified(payload));
                }
            }
            SceneChange::ObjectRemoved(id) => {
                self.emit(&DrawingAction::ObjectRemoved(ShapeRef { object_id: id }));
            }
        }
    }

    fn record_creation(&mut self, id: &str) -> Option<ShapePayload> {
        let shape = self.scene.get(id)?;
        let payload = ShapePayload { object: shape.descriptor.clone(), object_id: shape.id.clone() };
        self.undo.push(UndoRecord { id: payload.object_id.clone(), descriptor: payload.object.clone() });
        Some(payload)
    }

    fn emit(&mut self, action: &DrawingAction) {
        self.sink.send(ClientEvent::DrawingEvent(DrawingEvent::from_action(action)));
    }
}

fn new_shape_id() -> ShapeId {
    Uuid::new_v4().to_string()
}
