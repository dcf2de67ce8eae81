//! Collaborative board-state engine.
//!
//! The core of a real-time whiteboard: the typed object model and its
//! spatial invariants, transactional mutations over a replicated document,
//! a merged undo/redo history covering both interactive and agent edits,
//! and a crash-safe durability layer (append-only update log + snapshot
//! compaction). Transport, rendering, and auth live in the host.

pub mod db;
pub mod doc;
pub mod model;
pub mod services;
pub mod state;

/// Install the process-wide tracing subscriber. Hosts call this once at
/// startup, before attaching any board.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
