//! Local undo history: creation reversal only.
//!
//! Every shape this client creates is pushed here. Undo pops the newest
//! record and the reconciler removes that shape everywhere. Modifications,
//! removals and remote shapes are never recorded, and there is no redo.

#[cfg(test)]
#[path = "undo_test.rs"]
mod undo_test;

use serde_json::Value;

use crate::doc::ShapeId;

/// One locally created shape.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoRecord {
    pub id: ShapeId,
    pub descriptor: Value,
}

/// Callback told whether undo is available after every change.
pub type HistoryListener = Box<dyn FnMut(bool)>;

#[derive(Default)]
pub struct UndoStack {
    records: Vec<UndoRecord>,
    listener: Option<HistoryListener>,
}

impl UndoStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listener. It is called immediately with the current value.
    pub fn set_listener(&mut self, listener: HistoryListener) {
        self.listener = Some(listener);
        self.notify();
    }

    pub fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
        self.notify();
    }

    pub fn pop(&mut self) -> Option<UndoRecord> {
        let record = self.records.pop();
        if record.is_some() {
            self.notify();
        }
        record
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.notify();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn notify(&mut self) {
        let can_undo = self.can_undo();
        if let Some(listener) = self.listener.as_mut() {
            listener(can_undo);
        }
    }
}

impl std::fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoStack")
            .field("records", &self.records)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
