//! Replicated document contract and its in-process implementation.
//!
//! DESIGN
//! ======
//! The engine treats the multi-writer replicated document as an external,
//! already-solved capability with a four-operation contract: apply a
//! transaction of ops tagged with an origin, apply a binary update blob,
//! encode the full state to a blob, and apply a snapshot blob. Every applied
//! transaction yields a `DocUpdate` (origin + serialized ops) that the
//! persistence layer appends to the board's log and the transport layer can
//! relay to peers.
//!
//! The document also hosts the native undo scope: an opaque mechanism that
//! captures transactions whose origin is on a configurable allow-list,
//! coalescing captures within a fixed time window into one step. Callers see
//! only push/undo/redo/len/evict signals — the undo/redo manager in
//! `services::history` builds its meta-stack on exactly that surface.
//!
//! Ops are idempotent under at-least-once replay: re-inserting an existing
//! object behaves as a replace, and order inserts skip ids already present.
//! Hydration may replay an update that a compaction snapshot already
//! contains, so this matters for crash recovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::BoardObject;

/// Capture window for the native undo scope, in milliseconds. Tracked edits
/// closer together than this coalesce into one undo step.
pub const DEFAULT_UNDO_CAPTURE_WINDOW_MS: i64 = 500;

// =============================================================================
// ORIGINS
// =============================================================================

/// Label identifying the source of a mutation. The native undo scope only
/// captures transactions with a tracked origin; undo reversals and hydration
/// replay deliberately use untracked origins so they are never re-captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Local,
    Gesture,
    TextEdit,
    RemoteAi,
    Undo,
    Hydrate,
}

impl Origin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Gesture => "gesture",
            Self::TextEdit => "text-edit",
            Self::RemoteAi => "remote-ai",
            Self::Undo => "undo",
            Self::Hydrate => "hydrate",
        }
    }
}

// =============================================================================
// OPS & UPDATES
// =============================================================================

/// A single primitive operation inside a document transaction. Externally
/// tagged on the wire: `{"insert": {...}}`, `{"order_insert": [id, index]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocOp {
    /// Insert or overwrite an object record.
    Insert(Box<BoardObject>),
    /// Remove an object record.
    Remove(Uuid),
    /// Replace an object record (inserts if absent).
    Replace(Box<BoardObject>),
    /// Insert an id into the z-order at `index` (append when `None`).
    /// No-op if the id is already present.
    OrderInsert(Uuid, Option<usize>),
    /// Remove an id from the z-order.
    OrderRemove(Uuid),
}

/// Binary update event emitted for every applied transaction.
#[derive(Debug, Clone)]
pub struct DocUpdate {
    pub origin: Origin,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("failed to decode update payload: {0}")]
    Codec(#[from] serde_json::Error),
}

// =============================================================================
// NATIVE UNDO SCOPE
// =============================================================================

/// One captured step: the forward ops as applied and the inverse ops that
/// reverse them.
#[derive(Debug, Clone)]
struct UndoStep {
    forward: Vec<DocOp>,
    inverse: Vec<DocOp>,
}

/// Opaque multi-writer undo mechanism scoped to tracked origins.
#[derive(Debug)]
struct UndoScope {
    tracked: Vec<Origin>,
    window_ms: i64,
    stack: Vec<UndoStep>,
    redo: Vec<UndoStep>,
    last_capture_ms: i64,
}

impl UndoScope {
    fn new(tracked: Vec<Origin>, window_ms: i64) -> Self {
        Self { tracked, window_ms, stack: Vec::new(), redo: Vec::new(), last_capture_ms: 0 }
    }

    fn tracks(&self, origin: Origin) -> bool {
        self.tracked.contains(&origin)
    }

    fn capture(&mut self, forward: Vec<DocOp>, inverse: Vec<DocOp>, now_ms: i64) {
        self.redo.clear();
        // Coalesce: edits inside the capture window merge into the open step.
        if let Some(last) = self.stack.last_mut()
            && self.last_capture_ms > 0
            && now_ms.saturating_sub(self.last_capture_ms) < self.window_ms
        {
            last.forward.extend(forward);
            let mut merged = inverse;
            merged.extend(std::mem::take(&mut last.inverse));
            last.inverse = merged;
        } else {
            self.stack.push(UndoStep { forward, inverse });
        }
        self.last_capture_ms = now_ms;
    }

    /// Close the open coalescing window so the next capture starts a new step.
    fn stop_capturing(&mut self) {
        self.last_capture_ms = 0;
    }
}

// =============================================================================
// BOARD DOC
// =============================================================================

/// The in-process replicated document: ordered object map plus ordered id
/// array (z-order, last = topmost).
#[derive(Debug)]
pub struct BoardDoc {
    objects: HashMap<Uuid, BoardObject>,
    order: Vec<Uuid>,
    undo: UndoScope,
}

/// Snapshot payload for full-state encode/apply.
#[derive(Debug, Serialize, Deserialize)]
struct DocSnapshot {
    objects: Vec<BoardObject>,
    order: Vec<Uuid>,
}

impl Default for BoardDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardDoc {
    /// A document with the standard undo allow-list (`local`, `gesture`,
    /// `text-edit`) and capture window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_undo_scope(
            vec![Origin::Local, Origin::Gesture, Origin::TextEdit],
            DEFAULT_UNDO_CAPTURE_WINDOW_MS,
        )
    }

    #[must_use]
    pub fn with_undo_scope(tracked: Vec<Origin>, window_ms: i64) -> Self {
        Self {
            objects: HashMap::new(),
            order: Vec::new(),
            undo: UndoScope::new(tracked, window_ms),
        }
    }

    // -------------------------------------------------------------------------
    // READS
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&BoardObject> {
        self.objects.get(&id)
    }

    #[must_use]
    pub fn objects(&self) -> &HashMap<Uuid, BoardObject> {
        &self.objects
    }

    /// The z-order: last id renders topmost.
    #[must_use]
    pub fn order(&self) -> &[Uuid] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    // -------------------------------------------------------------------------
    // TRANSACTIONS
    // -------------------------------------------------------------------------

    /// Apply a transaction of ops atomically and return the update event.
    /// Transactions with a tracked origin are captured by the undo scope.
    pub fn apply(&mut self, ops: Vec<DocOp>, origin: Origin) -> DocUpdate {
        self.apply_at(ops, origin, now_ms())
    }

    /// Like [`Self::apply`] with an explicit capture timestamp. Exposed for
    /// deterministic coalescing in tests.
    pub fn apply_at(&mut self, ops: Vec<DocOp>, origin: Origin, now_ms: i64) -> DocUpdate {
        let data = serde_json::to_vec(&ops).unwrap_or_default();
        let inverse = self.apply_ops(&ops);
        if self.undo.tracks(origin) {
            self.undo.capture(ops, inverse, now_ms);
        }
        DocUpdate { origin, data }
    }

    /// Apply a binary update blob (a serialized op list) under `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::Codec`] if the blob does not decode as an op list.
    pub fn apply_update(&mut self, data: &[u8], origin: Origin) -> Result<DocUpdate, DocError> {
        let ops: Vec<DocOp> = serde_json::from_slice(data)?;
        Ok(self.apply(ops, origin))
    }

    /// Encode the full current state as a binary snapshot.
    #[must_use]
    pub fn encode_state(&self) -> Vec<u8> {
        let snapshot = DocSnapshot {
            objects: self.objects.values().cloned().collect(),
            order: self.order.clone(),
        };
        serde_json::to_vec(&snapshot).unwrap_or_default()
    }

    /// Replace the entire document state from a snapshot blob.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::Codec`] if the blob does not decode as a snapshot.
    pub fn apply_snapshot(&mut self, data: &[u8]) -> Result<(), DocError> {
        let snapshot: DocSnapshot = serde_json::from_slice(data)?;
        self.objects = snapshot.objects.into_iter().map(|o| (o.id, o)).collect();
        self.order = snapshot.order;
        self.order.retain(|id| self.objects.contains_key(id));
        Ok(())
    }

    /// Apply ops in order, returning the inverse op list (reversed).
    fn apply_ops(&mut self, ops: &[DocOp]) -> Vec<DocOp> {
        let mut inverse = Vec::with_capacity(ops.len());
        for op in ops {
            if let Some(inv) = self.apply_op(op) {
                inverse.push(inv);
            }
        }
        inverse.reverse();
        inverse
    }

    fn apply_op(&mut self, op: &DocOp) -> Option<DocOp> {
        match op {
            DocOp::Insert(obj) | DocOp::Replace(obj) => {
                match self.objects.insert(obj.id, (**obj).clone()) {
                    Some(prev) => Some(DocOp::Replace(Box::new(prev))),
                    None => Some(DocOp::Remove(obj.id)),
                }
            }
            DocOp::Remove(id) => {
                let prev = self.objects.remove(id)?;
                Some(DocOp::Insert(Box::new(prev)))
            }
            DocOp::OrderInsert(id, index) => {
                if self.order.contains(id) {
                    return None;
                }
                match index {
                    Some(i) if *i < self.order.len() => self.order.insert(*i, *id),
                    _ => self.order.push(*id),
                }
                Some(DocOp::OrderRemove(*id))
            }
            DocOp::OrderRemove(id) => {
                let pos = self.order.iter().position(|x| x == id)?;
                self.order.remove(pos);
                Some(DocOp::OrderInsert(*id, Some(pos)))
            }
        }
    }

    // -------------------------------------------------------------------------
    // NATIVE UNDO SURFACE
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.stack.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.undo.redo.len()
    }

    /// Pop the most recent captured step and apply its inverse under the
    /// `undo` origin. Returns the update event, or `None` on an empty stack.
    pub fn undo(&mut self) -> Option<DocUpdate> {
        let step = self.undo.stack.pop()?;
        self.undo.stop_capturing();
        let data = serde_json::to_vec(&step.inverse).unwrap_or_default();
        self.apply_ops(&step.inverse);
        self.undo.redo.push(step);
        Some(DocUpdate { origin: Origin::Undo, data })
    }

    /// Re-apply the most recently undone step.
    pub fn redo(&mut self) -> Option<DocUpdate> {
        let step = self.undo.redo.pop()?;
        self.undo.stop_capturing();
        let data = serde_json::to_vec(&step.forward).unwrap_or_default();
        self.apply_ops(&step.forward);
        self.undo.stack.push(step);
        Some(DocUpdate { origin: Origin::Undo, data })
    }

    /// Drop the oldest captured step. Used to keep the native stack aligned
    /// with the capped meta-stack.
    pub fn evict_oldest_undo(&mut self) {
        if !self.undo.stack.is_empty() {
            self.undo.stack.remove(0);
        }
    }

    /// Close the open coalescing window (gesture boundary, batch boundary).
    pub fn stop_capturing(&mut self) {
        self.undo.stop_capturing();
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "doc_test.rs"]
mod tests;
