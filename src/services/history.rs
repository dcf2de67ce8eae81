//! Undo/redo manager — one user-facing history over two edit sources.
//!
//! DESIGN
//! ======
//! Two independently-tracked histories must merge into one undo button:
//! the document's native undo scope captures interactively-tagged edits
//! (coalescing within its window), while agent batch edits are reversed
//! through synthesized patches built from a before/after snapshot diff.
//! The meta-stack records, in true chronological order, an opaque marker
//! per native step interleaved with each batch patch, so undo always pops
//! whichever kind of edit happened most recently — not whichever
//! subsystem's stack happens to be non-empty.
//!
//! Reversal transactions run under the `undo` origin, which the native
//! scope does not track, so undoing a batch never pollutes the native
//! stack. Both meta-stacks are capped; evicting a native marker from the
//! bottom also evicts the native scope's own oldest step to keep the two
//! aligned.

use tracing::debug;
use uuid::Uuid;

use crate::doc::{BoardDoc, DocOp, Origin};
use crate::model::BoardObject;
use crate::services::persistence;
use crate::state::AppState;

/// Maximum entries on each meta-stack.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("board not loaded: {0}")]
    BoardNotLoaded(Uuid),
}

// =============================================================================
// BATCH PATCHES
// =============================================================================

/// Reversible record of one batch command, built by diffing a pre-command
/// snapshot against post-command state.
#[derive(Debug, Clone, Default)]
pub struct BatchPatch {
    /// Ids created by the batch. Deleting these reverses the creation.
    pub created_ids: Vec<Uuid>,
    /// Content of the created objects, captured lazily at undo time so a
    /// later redo restores edits made between the batch and the undo.
    pub created_objects: Vec<BoardObject>,
    /// Pre-delete state of objects the batch removed.
    pub deleted_objects: Vec<BoardObject>,
    /// `(before, after)` pairs for objects the batch modified.
    pub updated_objects: Vec<(BoardObject, BoardObject)>,
}

impl BatchPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_ids.is_empty()
            && self.deleted_objects.is_empty()
            && self.updated_objects.is_empty()
    }
}

/// One meta-stack entry: an opaque marker for a native-scope step, or a
/// synthesized batch patch.
#[derive(Debug, Clone)]
enum Entry {
    Native,
    Batch(BatchPatch),
}

// =============================================================================
// HISTORY
// =============================================================================

/// Per-board merged history.
#[derive(Debug)]
pub struct History {
    entries: Vec<Entry>,
    redo: Vec<Entry>,
    /// Native undo-stack length after the last sync; growth means a new
    /// step was captured (coalesced edits don't grow it).
    native_seen: usize,
    cap: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new(), redo: Vec::new(), native_seen: 0, cap: HISTORY_CAP }
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Observe the native scope after a tracked transaction: push a marker
    /// when a new step was captured, and destroy the redo branch.
    pub fn note_native(&mut self, doc: &mut BoardDoc) {
        if doc.undo_len() > self.native_seen {
            self.entries.push(Entry::Native);
            self.redo.clear();
            self.enforce_cap(doc);
        }
        // Read back after cap enforcement, which may have evicted a step.
        self.native_seen = doc.undo_len();
    }

    /// Record a batch patch. Empty patches are skipped; any pushed entry
    /// destroys the redo branch. The batch boundary also closes the native
    /// coalescing window so interactive edits on either side of a batch
    /// never merge into one step.
    pub fn push_batch(&mut self, patch: BatchPatch, doc: &mut BoardDoc) {
        if patch.is_empty() {
            return;
        }
        doc.stop_capturing();
        self.entries.push(Entry::Batch(patch));
        self.redo.clear();
        self.enforce_cap(doc);
    }

    fn enforce_cap(&mut self, doc: &mut BoardDoc) {
        while self.entries.len() > self.cap {
            match self.entries.remove(0) {
                Entry::Native => {
                    // Keep the opaque native stack aligned with the meta-stack.
                    doc.evict_oldest_undo();
                    self.native_seen = self.native_seen.saturating_sub(1);
                }
                Entry::Batch(_) => {}
            }
        }
    }
}

// =============================================================================
// UNDO / REDO
// =============================================================================

/// Undo the most recent edit, whichever source produced it. Returns whether
/// anything was undone.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn undo(state: &AppState, board_id: Uuid) -> Result<bool, HistoryError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(HistoryError::BoardNotLoaded(board_id))?;

    let Some(entry) = board.history.entries.pop() else {
        return Ok(false);
    };
    match entry {
        Entry::Native => {
            if let Some(update) = board.doc.undo() {
                persistence::enqueue_update(board.persist_tx.as_ref(), &update);
            }
            board.history.native_seen = board.doc.undo_len();
            board.history.redo.push(Entry::Native);
            debug!(%board_id, "undo: native step");
        }
        Entry::Batch(mut patch) => {
            // Lazily snapshot the created objects' current content so redo
            // can restore them even if they were edited since the batch.
            patch.created_objects = patch
                .created_ids
                .iter()
                .filter_map(|id| board.doc.get(*id))
                .cloned()
                .collect();

            let mut ops = Vec::new();
            for id in &patch.created_ids {
                if board.doc.get(*id).is_some() {
                    ops.push(DocOp::OrderRemove(*id));
                    ops.push(DocOp::Remove(*id));
                }
            }
            for obj in &patch.deleted_objects {
                ops.push(DocOp::Insert(Box::new(obj.clone())));
                ops.push(DocOp::OrderInsert(obj.id, None));
            }
            for (before, _) in &patch.updated_objects {
                ops.push(DocOp::Replace(Box::new(before.clone())));
            }

            let update = board.doc.apply(ops, Origin::Undo);
            persistence::enqueue_update(board.persist_tx.as_ref(), &update);
            debug!(
                %board_id,
                created = patch.created_ids.len(),
                deleted = patch.deleted_objects.len(),
                updated = patch.updated_objects.len(),
                "undo: batch patch reversed"
            );
            board.history.redo.push(Entry::Batch(patch));
        }
    }
    Ok(true)
}

/// Redo the most recently undone edit. Returns whether anything was redone.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn redo(state: &AppState, board_id: Uuid) -> Result<bool, HistoryError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(HistoryError::BoardNotLoaded(board_id))?;

    let Some(entry) = board.history.redo.pop() else {
        return Ok(false);
    };
    match entry {
        Entry::Native => {
            if let Some(update) = board.doc.redo() {
                persistence::enqueue_update(board.persist_tx.as_ref(), &update);
            }
            board.history.native_seen = board.doc.undo_len();
            board.history.entries.push(Entry::Native);
            debug!(%board_id, "redo: native step");
        }
        Entry::Batch(patch) => {
            let mut ops = Vec::new();
            // Remove the undo-recreated deletions again.
            for obj in &patch.deleted_objects {
                if board.doc.get(obj.id).is_some() {
                    ops.push(DocOp::OrderRemove(obj.id));
                    ops.push(DocOp::Remove(obj.id));
                }
            }
            // Restore the created objects from their lazy snapshots.
            for obj in &patch.created_objects {
                ops.push(DocOp::Insert(Box::new(obj.clone())));
                ops.push(DocOp::OrderInsert(obj.id, None));
            }
            for (_, after) in &patch.updated_objects {
                ops.push(DocOp::Replace(Box::new(after.clone())));
            }

            let update = board.doc.apply(ops, Origin::Undo);
            persistence::enqueue_update(board.persist_tx.as_ref(), &update);
            debug!(%board_id, "redo: batch patch reapplied");
            board.history.entries.push(Entry::Batch(patch));
        }
    }
    Ok(true)
}

/// Close the native coalescing window (pointer-up, blur, gesture end) so
/// the next interactive edit starts a fresh undo step.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn stop_capturing(state: &AppState, board_id: Uuid) -> Result<(), HistoryError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(HistoryError::BoardNotLoaded(board_id))?;
    board.doc.stop_capturing();
    Ok(())
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
