//! Client-side canvas engine for the collaborative whiteboard.
//!
//! Mirrors a room's shared scene locally, turns local edits into drawing
//! events, applies events relayed from other participants without echoing
//! them back, and keeps a creation-only undo history. Rendering is behind the
//! [`engine::SceneEngine`] trait so the same reconciler runs in a browser host,
//! the CLI and tests.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`doc`] | Shapes, the ordered scene graph and the snapshot format |
//! | [`engine`] | Rendering seam and the display-less [`engine::HeadlessEngine`] |
//! | [`reconciler`] | Local/remote reconciliation with echo suppression |
//! | [`undo`] | Creation-only undo history |
//! | [`session`] | Room session state around the reconciler |

pub mod doc;
pub mod engine;
pub mod reconciler;
pub mod session;
pub mod undo;
