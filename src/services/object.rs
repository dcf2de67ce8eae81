//! Object store — every board-object mutation, as one transaction each.
//!
//! DESIGN
//! ======
//! All operations lock the board map, mutate the replicated document
//! synchronously under the write guard (one atomic transaction per call),
//! and return clones for broadcast. Each transaction carries an origin tag;
//! tracked origins feed the native undo scope, `remote-ai` and `undo` do
//! not. Unknown ids are silent no-ops everywhere — a peer deleting the
//! target concurrently is expected, not exceptional.
//!
//! Spatial invariants live here: the 24-unit size floor, rotation
//! normalization, frame containment (smallest containing frame wins,
//! computed at create/resize time; moving out of a frame unparents, moving
//! in does not reparent), and connector endpoint detachment so no endpoint
//! ever references a deleted object.

use std::collections::HashSet;

use uuid::Uuid;

use crate::doc::{DocOp, Origin};
use crate::model::{
    Anchor, BoardObject, Bounds, Endpoint, MIN_SIZE, ObjectProps, Point, Port, TextStyle,
    distance, nearest_perimeter_t, normalize_rotation, port_position,
};
use crate::services::persistence;
use crate::state::{AppState, BoardState};

/// Snap radius for connector attachment, in world units.
pub const ATTACH_RADIUS: f64 = 16.0;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("board not loaded: {0}")]
    BoardNotLoaded(Uuid),
}

/// Partial update applied by [`update_object`]. Absent fields are left
/// untouched; `props` replaces the payload only when the kind matches.
#[derive(Debug, Clone, Default)]
pub struct ObjectPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub rotation: Option<f64>,
    pub props: Option<ObjectProps>,
}

/// Partial update for a text object's style.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextStylePatch {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSide {
    From,
    To,
}

/// Exclusive endpoint payload: an attachment clears the stored point, a
/// point clears the stored attachment. The "both set" state cannot be
/// expressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndpointPayload {
    Attach { object_id: Uuid, anchor: Anchor },
    Point(Point),
}

/// Nearest attachment candidate returned by [`get_attachable_at_point`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachTarget {
    pub object_id: Uuid,
    pub anchor: Anchor,
}

// =============================================================================
// COMMIT
// =============================================================================

/// Apply one transaction to the board's document, sync the undo meta-stack,
/// and enqueue the update for persistence.
pub(crate) fn commit(board: &mut BoardState, ops: Vec<DocOp>, origin: Origin) {
    if ops.is_empty() {
        return;
    }
    let BoardState { doc, history, persist_tx } = board;
    let update = doc.apply(ops, origin);
    if matches!(origin, Origin::Local | Origin::Gesture | Origin::TextEdit) {
        history.note_native(doc);
    }
    persistence::enqueue_update(persist_tx.as_ref(), &update);
}

// =============================================================================
// CREATE / READ
// =============================================================================

/// Create a new object. Applies the size floor, appends it topmost in the
/// z-order, and assigns the smallest containing frame as parent (if any).
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
#[allow(clippy::too_many_arguments)]
pub async fn create_object(
    state: &AppState,
    board_id: Uuid,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    props: ObjectProps,
    created_by: Option<Uuid>,
    origin: Origin,
) -> Result<BoardObject, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let mut obj = BoardObject::new(x, y, width, height, props, created_by);
    obj.parent_frame_id = smallest_containing_frame(board, &obj.bounds(), obj.id);

    let result = obj.clone();
    let ops = vec![DocOp::Insert(Box::new(obj)), DocOp::OrderInsert(result.id, None)];
    commit(board, ops, origin);
    Ok(result)
}

/// Create a degenerate connector with both endpoints at the same point,
/// pending drag-extension.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn start_connector(
    state: &AppState,
    board_id: Uuid,
    x: f64,
    y: f64,
    created_by: Option<Uuid>,
    origin: Origin,
) -> Result<BoardObject, ObjectError> {
    let props = ObjectProps::Connector {
        from: Endpoint::at_point(Point::new(x, y)),
        to: Endpoint::at_point(Point::new(x, y)),
        style: "solid".into(),
        points: Vec::new(),
    };
    create_object(state, board_id, x, y, MIN_SIZE, MIN_SIZE, props, created_by, origin).await
}

/// Look up a single object. Unknown id returns `None`, never an error.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn get_object(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
) -> Result<Option<BoardObject>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    Ok(board.doc.get(id).cloned())
}

/// All objects for enumeration: frames first (backdrops), then everything
/// else, preserving relative z-order within each partition.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn get_all(state: &AppState, board_id: Uuid) -> Result<Vec<BoardObject>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let mut frames = Vec::new();
    let mut others = Vec::new();
    for id in board.doc.order() {
        let Some(obj) = board.doc.get(*id) else {
            continue;
        };
        if obj.is_frame() {
            frames.push(obj.clone());
        } else {
            others.push(obj.clone());
        }
    }
    frames.extend(others);
    Ok(frames)
}

// =============================================================================
// UPDATE
// =============================================================================

/// Merge a partial patch into an object. Width/height are floored at 24
/// independently, rotation is normalized into [0, 360). Unknown id is a
/// silent no-op (`None`).
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_object(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    patch: ObjectPatch,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    let Some(mut obj) = board.doc.get(id).cloned() else {
        return Ok(None);
    };

    if let Some(x) = patch.x {
        obj.x = x;
    }
    if let Some(y) = patch.y {
        obj.y = y;
    }
    if let Some(w) = patch.width {
        obj.width = w.max(MIN_SIZE);
    }
    if let Some(h) = patch.height {
        obj.height = h.max(MIN_SIZE);
    }
    if let Some(r) = patch.rotation {
        obj.rotation = normalize_rotation(r);
    }
    if let Some(props) = patch.props
        && props.kind() == obj.kind()
    {
        obj.props = props;
    }

    let result = obj.clone();
    commit(board, vec![DocOp::Replace(Box::new(obj))], origin);
    Ok(Some(result))
}

/// Translate a single object. See [`move_objects`].
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn move_object(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    dx: f64,
    dy: f64,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    let moved = move_objects(state, board_id, &[id], dx, dy, origin).await?;
    Ok(moved.into_iter().find(|o| o.id == id))
}

/// Translate a selection. Moving a frame carries every contained object
/// (recursively through nested frames). A directly-moved non-frame that no
/// longer lies fully inside its parent frame is unparented; moving into a
/// new frame's bounds does not reparent — containment is only assigned at
/// create/resize time.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn move_objects(
    state: &AppState,
    board_id: Uuid,
    ids: &[Uuid],
    dx: f64,
    dy: f64,
    origin: Origin,
) -> Result<Vec<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    // Expand frames to their contained objects so children travel along.
    let mut move_set: HashSet<Uuid> = HashSet::new();
    let mut worklist: Vec<Uuid> = Vec::new();
    for id in ids {
        if board.doc.get(*id).is_some() && move_set.insert(*id) {
            worklist.push(*id);
        }
    }
    while let Some(id) = worklist.pop() {
        let Some(obj) = board.doc.get(id) else {
            continue;
        };
        if !obj.is_frame() {
            continue;
        }
        let children: Vec<Uuid> = board
            .doc
            .objects()
            .values()
            .filter(|o| o.parent_frame_id == Some(id))
            .map(|o| o.id)
            .collect();
        for child in children {
            if move_set.insert(child) {
                worklist.push(child);
            }
        }
    }
    if move_set.is_empty() {
        return Ok(Vec::new());
    }

    let directly_selected: HashSet<Uuid> = ids.iter().copied().collect();
    let mut ops = Vec::with_capacity(move_set.len());
    let mut moved = Vec::with_capacity(move_set.len());
    for id in board.doc.order().to_vec() {
        if !move_set.contains(&id) {
            continue;
        }
        let Some(mut obj) = board.doc.get(id).cloned() else {
            continue;
        };
        translate_object(&mut obj, dx, dy);

        // Unparent a directly-moved non-frame that left its parent's bounds.
        // Children carried by a moving frame keep their relation untouched.
        if directly_selected.contains(&id)
            && !obj.is_frame()
            && let Some(parent_id) = obj.parent_frame_id
        {
            let still_inside = board.doc.get(parent_id).is_some_and(|frame| {
                let mut frame_bounds = frame.bounds();
                if move_set.contains(&parent_id) {
                    frame_bounds.x += dx;
                    frame_bounds.y += dy;
                }
                frame_bounds.contains(&obj.bounds())
            });
            if !still_inside {
                obj.parent_frame_id = None;
            }
        }

        moved.push(obj.clone());
        ops.push(DocOp::Replace(Box::new(obj)));
    }

    commit(board, ops, origin);
    Ok(moved)
}

/// Resize an object with the 24-unit floor on each dimension, then
/// recompute frame containment at the new bounds. Connectors are ignored.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
#[allow(clippy::too_many_arguments)]
pub async fn resize_object(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    let Some(mut obj) = board.doc.get(id).cloned() else {
        return Ok(None);
    };
    if obj.is_connector() {
        return Ok(None);
    }

    obj.x = x;
    obj.y = y;
    obj.width = width.max(MIN_SIZE);
    obj.height = height.max(MIN_SIZE);
    obj.parent_frame_id = smallest_containing_frame(board, &obj.bounds(), obj.id);

    let result = obj.clone();
    commit(board, vec![DocOp::Replace(Box::new(obj))], origin);
    Ok(Some(result))
}

/// Rotate a selection by `delta_angle` degrees. Each object's own rotation
/// wraps into [0, 360); with more than one object (or an explicit pivot)
/// centers also revolve around the pivot, which defaults to the centroid of
/// the selection's combined bounds. Connectors are skipped silently; an
/// empty selection or zero delta is a no-op.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn rotate_objects(
    state: &AppState,
    board_id: Uuid,
    ids: &[Uuid],
    delta_angle: f64,
    pivot: Option<Point>,
    origin: Origin,
) -> Result<Vec<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    if ids.is_empty() || delta_angle == 0.0 {
        return Ok(Vec::new());
    }

    let targets: Vec<BoardObject> = ids
        .iter()
        .filter_map(|id| board.doc.get(*id))
        .filter(|o| !o.is_connector())
        .cloned()
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let revolve = targets.len() > 1 || pivot.is_some();
    let pivot = pivot.unwrap_or_else(|| {
        if targets.len() == 1 {
            targets[0].center()
        } else {
            let combined = targets
                .iter()
                .skip(1)
                .fold(targets[0].bounds(), |acc, o| acc.union(&o.bounds()));
            combined.center()
        }
    });

    let rad = delta_angle.to_radians();
    let (sin, cos) = rad.sin_cos();
    let mut ops = Vec::with_capacity(targets.len());
    let mut rotated = Vec::with_capacity(targets.len());
    for mut obj in targets {
        obj.rotation = normalize_rotation(obj.rotation + delta_angle);
        if revolve {
            let c = obj.center();
            let cx = pivot.x + (c.x - pivot.x) * cos - (c.y - pivot.y) * sin;
            let cy = pivot.y + (c.x - pivot.x) * sin + (c.y - pivot.y) * cos;
            obj.x = cx - obj.width / 2.0;
            obj.y = cy - obj.height / 2.0;
        }
        rotated.push(obj.clone());
        ops.push(DocOp::Replace(Box::new(obj)));
    }

    commit(board, ops, origin);
    Ok(rotated)
}

// =============================================================================
// TYPE-GUARDED CONVENIENCE PATCHES
// =============================================================================

/// Set the text-bearing field of an object: sticky text, text content,
/// frame title, or table title. No-op for types without one.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_text(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    text: &str,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    mutate_props(state, board_id, id, origin, |props| match props {
        ObjectProps::Sticky { text: t, .. } | ObjectProps::Text { content: t, .. } => {
            *t = text.to_owned();
            true
        }
        ObjectProps::Frame { title, .. } | ObjectProps::Table { title, .. } => {
            *title = text.to_owned();
            true
        }
        _ => false,
    })
    .await
}

/// Patch the style of a text object. No-op for every other type.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_text_style(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    patch: TextStylePatch,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    mutate_props(state, board_id, id, origin, |props| {
        let ObjectProps::Text { style, .. } = props else {
            return false;
        };
        let TextStyle { bold, italic, size } = style;
        if let Some(b) = patch.bold {
            *bold = b;
        }
        if let Some(i) = patch.italic {
            *italic = i;
        }
        if let Some(s) = patch.size {
            *size = s;
        }
        true
    })
    .await
}

/// Set the fill color of a sticky, rectangle, ellipse, shape, or frame.
/// No-op for types without a color.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_color(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    color: &str,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    mutate_props(state, board_id, id, origin, |props| match props {
        ObjectProps::Sticky { color: c, .. }
        | ObjectProps::Rectangle { color: c, .. }
        | ObjectProps::Ellipse { color: c, .. }
        | ObjectProps::Shape { color: c, .. }
        | ObjectProps::Frame { color: c, .. } => {
            *c = color.to_owned();
            true
        }
        _ => false,
    })
    .await
}

/// Set one table cell's text (`"row:col"` key). No-op for non-tables.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_table_cell(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    row: usize,
    col: usize,
    text: &str,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    mutate_props(state, board_id, id, origin, |props| {
        let ObjectProps::Table { cells, .. } = props else {
            return false;
        };
        cells.insert(format!("{row}:{col}"), text.to_owned());
        true
    })
    .await
}

/// Replace one endpoint of a connector. The payload is exclusive: an
/// attachment clears the stored point and a point clears the stored
/// attachment. No-op for non-connectors and unknown ids.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn update_connector_endpoint(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    side: EndpointSide,
    payload: EndpointPayload,
    origin: Origin,
) -> Result<Option<BoardObject>, ObjectError> {
    let endpoint = match payload {
        EndpointPayload::Attach { object_id, anchor } => Endpoint::attached(object_id, anchor),
        EndpointPayload::Point(p) => Endpoint::at_point(p),
    };
    mutate_props(state, board_id, id, origin, |props| {
        let ObjectProps::Connector { from, to, .. } = props else {
            return false;
        };
        match side {
            EndpointSide::From => *from = endpoint,
            EndpointSide::To => *to = endpoint,
        }
        true
    })
    .await
}

/// Shared shell for type-guarded patches: clone, mutate props via `f`
/// (returning whether the type matched), commit one replace.
async fn mutate_props<F>(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    origin: Origin,
    f: F,
) -> Result<Option<BoardObject>, ObjectError>
where
    F: FnOnce(&mut ObjectProps) -> bool,
{
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    let Some(mut obj) = board.doc.get(id).cloned() else {
        return Ok(None);
    };
    if !f(&mut obj.props) {
        return Ok(None);
    }
    let result = obj.clone();
    commit(board, vec![DocOp::Replace(Box::new(obj))], origin);
    Ok(Some(result))
}

// =============================================================================
// DELETE / Z-ORDER
// =============================================================================

/// Delete a selection. Deleting a frame cascades to every object parented
/// to it, recursively through nested frames. Surviving connectors that
/// referenced a deleted object have that endpoint detached to the last
/// resolved world position — never left dangling. Returns the full set of
/// deleted ids.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn delete_objects(
    state: &AppState,
    board_id: Uuid,
    ids: &[Uuid],
    origin: Origin,
) -> Result<Vec<Uuid>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    // Expand frame cascades.
    let mut doomed: HashSet<Uuid> = HashSet::new();
    let mut worklist: Vec<Uuid> = Vec::new();
    for id in ids {
        if board.doc.get(*id).is_some() && doomed.insert(*id) {
            worklist.push(*id);
        }
    }
    while let Some(id) = worklist.pop() {
        let Some(obj) = board.doc.get(id) else {
            continue;
        };
        if !obj.is_frame() {
            continue;
        }
        let children: Vec<Uuid> = board
            .doc
            .objects()
            .values()
            .filter(|o| o.parent_frame_id == Some(id))
            .map(|o| o.id)
            .collect();
        for child in children {
            if doomed.insert(child) {
                worklist.push(child);
            }
        }
    }
    if doomed.is_empty() {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();

    // Detach surviving connector endpoints that reference a doomed object,
    // resolving positions against pre-delete state.
    let survivors: Vec<BoardObject> = board
        .doc
        .objects()
        .values()
        .filter(|o| o.is_connector() && !doomed.contains(&o.id))
        .cloned()
        .collect();
    for mut connector in survivors {
        let ObjectProps::Connector { from, to, .. } = &mut connector.props else {
            continue;
        };
        let mut changed = false;
        for endpoint in [from, to] {
            if let Some(target) = endpoint.object_id
                && doomed.contains(&target)
            {
                let fallback = endpoint
                    .resolve(board.doc.objects())
                    .unwrap_or_else(|| Point::new(connector.x, connector.y));
                *endpoint = Endpoint::at_point(fallback);
                changed = true;
            }
        }
        if changed {
            ops.push(DocOp::Replace(Box::new(connector)));
        }
    }

    // Remove in z-order for deterministic transactions.
    let mut deleted = Vec::with_capacity(doomed.len());
    for id in board.doc.order().to_vec() {
        if doomed.contains(&id) {
            ops.push(DocOp::OrderRemove(id));
            ops.push(DocOp::Remove(id));
            deleted.push(id);
        }
    }

    commit(board, ops, origin);
    Ok(deleted)
}

/// Move an object to the top of the z-order. Returns whether anything
/// changed (unknown id or already topmost is a no-op).
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn bring_to_front(
    state: &AppState,
    board_id: Uuid,
    id: Uuid,
    origin: Origin,
) -> Result<bool, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    if board.doc.get(id).is_none() || board.doc.order().last() == Some(&id) {
        return Ok(false);
    }
    commit(
        board,
        vec![DocOp::OrderRemove(id), DocOp::OrderInsert(id, None)],
        origin,
    );
    Ok(true)
}

// =============================================================================
// DUPLICATE / CLIPBOARD
// =============================================================================

/// Clone a selection under fresh ids, offset by `offset`. Connector
/// endpoints referencing another selected object are remapped to its clone;
/// endpoints referencing anything outside the selection are detached to the
/// original's resolved position (offset along with the clone).
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn duplicate_selection(
    state: &AppState,
    board_id: Uuid,
    ids: &[Uuid],
    offset: Point,
    origin: Origin,
) -> Result<Vec<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let selected: HashSet<Uuid> = ids.iter().copied().collect();
    // Preserve relative stacking by walking the z-order.
    let originals: Vec<BoardObject> = board
        .doc
        .order()
        .iter()
        .filter(|id| selected.contains(id))
        .filter_map(|id| board.doc.get(*id))
        .cloned()
        .collect();
    if originals.is_empty() {
        return Ok(Vec::new());
    }

    let id_map: std::collections::HashMap<Uuid, Uuid> =
        originals.iter().map(|o| (o.id, Uuid::new_v4())).collect();

    let mut ops = Vec::with_capacity(originals.len() * 2);
    let mut clones = Vec::with_capacity(originals.len());
    for original in originals {
        let mut clone = original.clone();
        clone.id = id_map[&original.id];
        translate_object(&mut clone, offset.x, offset.y);

        remap_endpoints(&mut clone, &id_map, |endpoint| {
            endpoint
                .resolve(board.doc.objects())
                .map(|p| p.translated(offset.x, offset.y))
        });

        clone.parent_frame_id = match clone.parent_frame_id {
            Some(parent) if id_map.contains_key(&parent) => Some(id_map[&parent]),
            _ => smallest_containing_frame(board, &clone.bounds(), clone.id),
        };

        ops.push(DocOp::Insert(Box::new(clone.clone())));
        ops.push(DocOp::OrderInsert(clone.id, None));
        clones.push(clone);
    }

    commit(board, ops, origin);
    Ok(clones)
}

/// Export a selection as a plain snapshot. Connector endpoints referencing
/// an object outside the selection are exported as detached points at the
/// last resolved position; parent references leaving the selection are
/// cleared.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn serialize_selection(
    state: &AppState,
    board_id: Uuid,
    ids: &[Uuid],
) -> Result<Vec<BoardObject>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let selected: HashSet<Uuid> = ids.iter().copied().collect();
    let mut exported = Vec::new();
    for id in board.doc.order() {
        if !selected.contains(id) {
            continue;
        }
        let Some(mut obj) = board.doc.get(*id).cloned() else {
            continue;
        };
        if let ObjectProps::Connector { from, to, .. } = &mut obj.props {
            for endpoint in [from, to] {
                if let Some(target) = endpoint.object_id
                    && !selected.contains(&target)
                {
                    let fallback = endpoint
                        .resolve(board.doc.objects())
                        .unwrap_or_else(|| Point::new(obj.x, obj.y));
                    *endpoint = Endpoint::at_point(fallback);
                }
            }
        }
        if let Some(parent) = obj.parent_frame_id
            && !selected.contains(&parent)
        {
            obj.parent_frame_id = None;
        }
        exported.push(obj);
    }
    Ok(exported)
}

/// Recreate a serialized snapshot under fresh ids. When `relative` is
/// false the group's bounding-box center is translated onto `anchor`.
/// Reference remapping follows the same rule as duplication.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn paste_serialized(
    state: &AppState,
    board_id: Uuid,
    snapshot: Vec<BoardObject>,
    anchor: Point,
    relative: bool,
    origin: Origin,
) -> Result<Vec<BoardObject>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;
    if snapshot.is_empty() {
        return Ok(Vec::new());
    }

    let (dx, dy) = if relative {
        (0.0, 0.0)
    } else {
        let combined = snapshot
            .iter()
            .skip(1)
            .fold(snapshot[0].bounds(), |acc, o| acc.union(&o.bounds()));
        let center = combined.center();
        (anchor.x - center.x, anchor.y - center.y)
    };

    let id_map: std::collections::HashMap<Uuid, Uuid> =
        snapshot.iter().map(|o| (o.id, Uuid::new_v4())).collect();

    let mut ops = Vec::with_capacity(snapshot.len() * 2);
    let mut pasted = Vec::with_capacity(snapshot.len());
    for original in snapshot {
        let mut obj = original;
        obj.id = id_map[&obj.id];
        translate_object(&mut obj, dx, dy);

        // Snapshots carry no live targets to resolve against; an endpoint
        // still referencing something outside the pasted set falls back to
        // the pasted connector's own position.
        let fallback_origin = Point::new(obj.x, obj.y);
        remap_endpoints(&mut obj, &id_map, |endpoint| {
            endpoint.point.or(Some(fallback_origin))
        });

        obj.parent_frame_id = match obj.parent_frame_id {
            Some(parent) if id_map.contains_key(&parent) => Some(id_map[&parent]),
            _ => smallest_containing_frame(board, &obj.bounds(), obj.id),
        };

        ops.push(DocOp::Insert(Box::new(obj.clone())));
        ops.push(DocOp::OrderInsert(obj.id, None));
        pasted.push(obj);
    }

    commit(board, ops, origin);
    Ok(pasted)
}

// =============================================================================
// ATTACHMENT QUERY
// =============================================================================

/// Nearest attachable port or perimeter position within [`ATTACH_RADIUS`]
/// of `(x, y)`, excluding `exclude` (prevents self-attachment during a live
/// drag). Ports win ties against perimeter positions.
///
/// # Errors
///
/// Returns `BoardNotLoaded` if the board isn't attached.
pub async fn get_attachable_at_point(
    state: &AppState,
    board_id: Uuid,
    x: f64,
    y: f64,
    exclude: Option<Uuid>,
) -> Result<Option<AttachTarget>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let p = Point::new(x, y);
    let mut best: Option<(f64, AttachTarget)> = None;
    for obj in board.doc.objects().values() {
        if obj.is_connector() || Some(obj.id) == exclude {
            continue;
        }
        let bounds = obj.bounds();
        for port in [Port::Top, Port::Right, Port::Bottom, Port::Left] {
            let d = distance(port_position(&bounds, port), p);
            if d <= ATTACH_RADIUS && best.as_ref().is_none_or(|(bd, _)| d < *bd) {
                best = Some((d, AttachTarget { object_id: obj.id, anchor: Anchor::Port(port) }));
            }
        }
        let (t, d) = nearest_perimeter_t(&bounds, p);
        if d <= ATTACH_RADIUS && best.as_ref().is_none_or(|(bd, _)| d < *bd) {
            best = Some((d, AttachTarget { object_id: obj.id, anchor: Anchor::T(t) }));
        }
    }
    Ok(best.map(|(_, target)| target))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Smallest-area frame whose bounds fully contain `bounds`. Equal areas
/// resolve to the topmost frame in z-order.
fn smallest_containing_frame(board: &BoardState, bounds: &Bounds, exclude: Uuid) -> Option<Uuid> {
    let mut best: Option<(f64, usize, Uuid)> = None;
    for (index, id) in board.doc.order().iter().enumerate() {
        if *id == exclude {
            continue;
        }
        let Some(obj) = board.doc.get(*id) else {
            continue;
        };
        if !obj.is_frame() || !obj.bounds().contains(bounds) {
            continue;
        }
        let area = obj.bounds().area();
        let better = match &best {
            None => true,
            Some((best_area, best_index, _)) => {
                area < *best_area || (area == *best_area && index > *best_index)
            }
        };
        if better {
            best = Some((area, index, *id));
        }
    }
    best.map(|(_, _, id)| id)
}

/// Translate an object's bounds; connector waypoints and detached endpoint
/// points travel with it so the geometry stays coherent.
fn translate_object(obj: &mut BoardObject, dx: f64, dy: f64) {
    obj.x += dx;
    obj.y += dy;
    if let ObjectProps::Connector { from, to, points, .. } = &mut obj.props {
        for endpoint in [from, to] {
            if let Some(point) = &mut endpoint.point {
                *point = point.translated(dx, dy);
            }
        }
        for point in points {
            *point = point.translated(dx, dy);
        }
    }
}

/// Remap a clone's connector endpoints: targets inside `id_map` point at
/// the corresponding clone, anything else detaches to the position produced
/// by `resolve_fallback` (or stays detached as-is when it yields `None`).
fn remap_endpoints<F>(
    obj: &mut BoardObject,
    id_map: &std::collections::HashMap<Uuid, Uuid>,
    resolve_fallback: F,
) where
    F: Fn(&Endpoint) -> Option<Point>,
{
    let ObjectProps::Connector { from, to, .. } = &mut obj.props else {
        return;
    };
    for endpoint in [from, to] {
        let Some(target) = endpoint.object_id else {
            continue;
        };
        if let Some(new_id) = id_map.get(&target) {
            endpoint.object_id = Some(*new_id);
            // An attached endpoint never carries a point.
            endpoint.point = None;
        } else if let Some(fallback) = resolve_fallback(endpoint) {
            *endpoint = Endpoint::at_point(fallback);
        } else {
            *endpoint = Endpoint::at_point(Point::new(obj.x, obj.y));
        }
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
