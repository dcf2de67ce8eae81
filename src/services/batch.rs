//! Batch service — agent command execution with reversible capture.
//!
//! DESIGN
//! ======
//! Automated agents don't edit incrementally and their mutations carry the
//! `remote-ai` origin, which the native undo scope deliberately ignores. To
//! keep bulk edits individually undoable, a batch runs inside a capture
//! window: deep-copy snapshot of every object before, typed commands
//! executed one by one, then a diff of snapshot vs. post-command state
//! pushed to the history manager as one synthesized patch. A batch that
//! changed nothing pushes nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::doc::Origin;
use crate::model::{Anchor, BoardObject, ObjectKind, ObjectProps, Point, Port};
use crate::services::history::BatchPatch;
use crate::services::object::{self, EndpointPayload, EndpointSide, ObjectError};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

/// One typed command inside an agent batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchCommand {
    CreateSticky { x: f64, y: f64, text: String, color: Option<String> },
    CreateShape { kind: ObjectKind, x: f64, y: f64, width: f64, height: f64, color: Option<String> },
    CreateFrame { x: f64, y: f64, width: f64, height: f64, title: Option<String> },
    CreateConnector { from_id: Uuid, to_id: Uuid },
    MoveObject { id: Uuid, dx: f64, dy: f64 },
    ResizeObject { id: Uuid, x: f64, y: f64, width: f64, height: f64 },
    UpdateText { id: Uuid, text: String },
    ChangeColor { id: Uuid, color: String },
    DeleteObjects { ids: Vec<Uuid> },
}

/// Ids touched by a batch, reported back to the caller.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: Vec<Uuid>,
    pub updated: Vec<Uuid>,
    pub deleted: Vec<Uuid>,
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Execute a batch of commands under the `remote-ai` origin and push one
/// reversible patch for the whole batch.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn run_batch(
    state: &AppState,
    board_id: Uuid,
    commands: Vec<BatchCommand>,
    created_by: Option<Uuid>,
) -> Result<BatchOutcome, ObjectError> {
    // PHASE: SNAPSHOT
    // Deep copy of every current object; the diff against post-command state
    // becomes the reversible patch.
    let before: HashMap<Uuid, BoardObject> = {
        let boards = state.boards.read().await;
        let board = boards
            .get(&board_id)
            .ok_or(ObjectError::BoardNotLoaded(board_id))?;
        board.doc.objects().clone()
    };

    // PHASE: EXECUTE
    let count = commands.len();
    for command in commands {
        execute_command(state, board_id, command, created_by).await?;
    }

    // PHASE: DIFF + CAPTURE
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let mut patch = BatchPatch::default();
    let mut outcome = BatchOutcome::default();
    for (id, current) in board.doc.objects() {
        match before.get(id) {
            None => {
                patch.created_ids.push(*id);
                outcome.created.push(*id);
            }
            Some(prev) if prev != current => {
                patch.updated_objects.push((prev.clone(), current.clone()));
                outcome.updated.push(*id);
            }
            Some(_) => {}
        }
    }
    for (id, prev) in &before {
        if board.doc.get(*id).is_none() {
            patch.deleted_objects.push(prev.clone());
            outcome.deleted.push(*id);
        }
    }

    info!(
        %board_id,
        commands = count,
        created = outcome.created.len(),
        updated = outcome.updated.len(),
        deleted = outcome.deleted.len(),
        "batch applied"
    );

    let crate::state::BoardState { doc, history, .. } = board;
    history.push_batch(patch, doc);
    Ok(outcome)
}

async fn execute_command(
    state: &AppState,
    board_id: Uuid,
    command: BatchCommand,
    created_by: Option<Uuid>,
) -> Result<(), ObjectError> {
    const ORIGIN: Origin = Origin::RemoteAi;
    match command {
        BatchCommand::CreateSticky { x, y, text, color } => {
            let props = ObjectProps::Sticky {
                text,
                color: color.unwrap_or_else(|| "#FFEB3B".into()),
            };
            object::create_object(state, board_id, x, y, 160.0, 160.0, props, created_by, ORIGIN)
                .await?;
        }
        BatchCommand::CreateShape { kind, x, y, width, height, color } => {
            let mut props = ObjectProps::defaults(kind);
            if let Some(color) = color {
                match &mut props {
                    ObjectProps::Rectangle { color: c, .. }
                    | ObjectProps::Ellipse { color: c, .. }
                    | ObjectProps::Shape { color: c, .. }
                    | ObjectProps::Sticky { color: c, .. }
                    | ObjectProps::Frame { color: c, .. } => *c = color,
                    _ => {}
                }
            }
            object::create_object(state, board_id, x, y, width, height, props, created_by, ORIGIN)
                .await?;
        }
        BatchCommand::CreateFrame { x, y, width, height, title } => {
            let props = ObjectProps::Frame {
                title: title.unwrap_or_else(|| "Frame".into()),
                color: "#F5F5F5".into(),
            };
            object::create_object(state, board_id, x, y, width, height, props, created_by, ORIGIN)
                .await?;
        }
        BatchCommand::CreateConnector { from_id, to_id } => {
            create_connector_between(state, board_id, from_id, to_id, created_by).await?;
        }
        BatchCommand::MoveObject { id, dx, dy } => {
            object::move_objects(state, board_id, &[id], dx, dy, ORIGIN).await?;
        }
        BatchCommand::ResizeObject { id, x, y, width, height } => {
            object::resize_object(state, board_id, id, x, y, width, height, ORIGIN).await?;
        }
        BatchCommand::UpdateText { id, text } => {
            object::update_text(state, board_id, id, &text, ORIGIN).await?;
        }
        BatchCommand::ChangeColor { id, color } => {
            object::update_color(state, board_id, id, &color, ORIGIN).await?;
        }
        BatchCommand::DeleteObjects { ids } => {
            object::delete_objects(state, board_id, &ids, ORIGIN).await?;
        }
    }
    Ok(())
}

/// Create a connector attached to facing ports of two existing objects.
/// Unknown endpoints are tolerated: the connector starts between the board
/// origin and wherever targets resolve, matching silent no-op semantics
/// elsewhere.
async fn create_connector_between(
    state: &AppState,
    board_id: Uuid,
    from_id: Uuid,
    to_id: Uuid,
    created_by: Option<Uuid>,
) -> Result<(), ObjectError> {
    let (from_center, to_center) = {
        let boards = state.boards.read().await;
        let board = boards
            .get(&board_id)
            .ok_or(ObjectError::BoardNotLoaded(board_id))?;
        let from = board.doc.get(from_id).map(BoardObject::center);
        let to = board.doc.get(to_id).map(BoardObject::center);
        (from, to)
    };
    let (Some(from_center), Some(to_center)) = (from_center, to_center) else {
        return Ok(());
    };

    let (from_port, to_port) = facing_ports(from_center, to_center);
    let mid = Point::new(
        (from_center.x + to_center.x) / 2.0,
        (from_center.y + to_center.y) / 2.0,
    );
    let connector = object::start_connector(
        state,
        board_id,
        mid.x,
        mid.y,
        created_by,
        Origin::RemoteAi,
    )
    .await?;
    object::update_connector_endpoint(
        state,
        board_id,
        connector.id,
        EndpointSide::From,
        EndpointPayload::Attach { object_id: from_id, anchor: Anchor::Port(from_port) },
        Origin::RemoteAi,
    )
    .await?;
    object::update_connector_endpoint(
        state,
        board_id,
        connector.id,
        EndpointSide::To,
        EndpointPayload::Attach { object_id: to_id, anchor: Anchor::Port(to_port) },
        Origin::RemoteAi,
    )
    .await?;
    Ok(())
}

/// Ports on the dominant axis between two centers.
fn facing_ports(from: Point, to: Point) -> (Port, Port) {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 { (Port::Right, Port::Left) } else { (Port::Left, Port::Right) }
    } else if dy >= 0.0 {
        (Port::Bottom, Port::Top)
    } else {
        (Port::Top, Port::Bottom)
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;
