//! Scene model: shapes, the ordered scene graph, and the snapshot format.
//!
//! A `Shape` pairs a stable identity with the opaque descriptor produced by
//! the rendering engine. The `SceneGraph` keeps shapes in stacking order
//! (first drawn first) and addresses them by identity. Identity references
//! coming from the network are weak: lookups that miss are normal and every
//! caller treats absence as a no-op.
//!
//! Snapshots are the only persisted form of the scene. They serialize to
//! `{"objects": [...], "background": "..."}` where every object is the
//! shape's descriptor with its `id` folded in.

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use whiteboard_frames::ShapeId;

/// Background colour of an empty canvas.
pub const DEFAULT_BACKGROUND: &str = "white";

/// Descriptor key that carries the identity inside snapshot objects.
const ID_KEY: &str = "id";

/// Errors raised while materializing shapes or decoding snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("shape descriptor must be a JSON object")]
    NotAnObject,
    #[error("shape descriptor has no `type`")]
    MissingType,
    #[error("shape {0} already exists")]
    DuplicateId(ShapeId),
    #[error("snapshot decode failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A shape as mirrored locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    /// Shape type taken from the descriptor (`"rect"`, `"path"`, ...).
    pub kind: String,
    /// Opaque descriptor, never containing the `id` key.
    pub descriptor: Value,
}

impl Shape {
    /// Validate a descriptor and build a shape from it.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NotAnObject`] or [`SceneError::MissingType`]
    /// when the descriptor cannot describe a shape.
    pub fn from_descriptor(id: &str, descriptor: &Value) -> Result<Self, SceneError> {
        let Some(fields) = descriptor.as_object() else {
            return Err(SceneError::NotAnObject);
        };
        let Some(kind) = fields.get("type").and_then(Value::as_str) else {
            return Err(SceneError::MissingType);
        };
        let mut fields = fields.clone();
        fields.remove(ID_KEY);
        Ok(Self { id: id.to_owned(), kind: kind.to_owned(), descriptor: Value::Object(fields) })
    }

    /// The descriptor with the identity folded in, as stored in snapshots.
    #[must_use]
    pub fn to_snapshot_object(&self) -> Value {
        let mut value = self.descriptor.clone();
        if let Some(fields) = value.as_object_mut() {
            fields.insert(ID_KEY.into(), Value::String(self.id.clone()));
        }
        value
    }
}

/// Read the identity a descriptor carries, if any.
#[must_use]
pub fn descriptor_id(descriptor: &Value) -> Option<&str> {
    descriptor.get(ID_KEY).and_then(Value::as_str)
}

/// Serialized form of a whole scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub objects: Vec<Value>,
    #[serde(default = "default_background")]
    pub background: String,
}

fn default_background() -> String {
    DEFAULT_BACKGROUND.to_owned()
}

impl CanvasSnapshot {
    /// Decode a snapshot blob.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] for malformed JSON.
    pub fn from_blob(blob: &str) -> Result<Self, SceneError> {
        Ok(serde_json::from_str(blob)?)
    }

    /// Decode a snapshot that already arrived as parsed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] when the value is not a snapshot.
    pub fn deserialize_value(value: &Value) -> Result<Self, SceneError> {
        Ok(Self::deserialize(value)?)
    }

    /// Encode the snapshot as a blob.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] if a descriptor cannot be serialized.
    pub fn to_blob(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Ordered collection of shapes keyed by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    shapes: Vec<Shape>,
    background: String,
}

impl SceneGraph {
    #[must_use]
    pub fn new() -> Self {
        Self { shapes: Vec::new(), background: default_background() }
    }

    /// Shapes in stacking order.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Shape> {
        self.shapes.iter().find(|shape| shape.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Add a shape on top of the stack. A shape that already uses the same
    /// identity is replaced where it stands instead.
    pub fn insert(&mut self, shape: Shape) {
        match self.position(&shape.id) {
            Some(index) => self.shapes[index] = shape,
            None => self.shapes.push(shape),
        }
    }

    /// Swap in a new version of an existing shape. Returns false when no
    /// shape has that identity.
    pub fn replace(&mut self, shape: Shape) -> bool {
        let Some(index) = self.position(&shape.id) else {
            return false;
        };
        self.shapes[index] = shape;
        true
    }

    /// Remove a shape by identity, returning it if it was present.
    pub fn remove(&mut self, id: &str) -> Option<Shape> {
        let index = self.position(id)?;
        Some(self.shapes.remove(index))
    }

    /// Drop every shape and reset the background.
    pub fn clear(&mut self) {
        self.shapes.clear();
        self.background = default_background();
    }

    #[must_use]
    pub fn background(&self) -> &str {
        &self.background
    }

    pub fn set_background(&mut self, background: impl Into<String>) {
        self.background = background.into();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    #[must_use]
    pub fn to_snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            objects: self.shapes.iter().map(Shape::to_snapshot_object).collect(),
            background: self.background.clone(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.shapes.iter().position(|shape| shape.id == id)
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
