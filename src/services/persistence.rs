//! Persistence service — durable update log + snapshot compaction.
//!
//! DESIGN
//! ======
//! One board = one snapshot row plus an append-only log of update blobs
//! since that snapshot. Attach hydrates by applying the snapshot and
//! replaying logged updates in insertion order under the hydration origin,
//! so the replay is never re-appended to the very log it came from. A
//! per-board worker task fed by a bounded FIFO queue serializes appends and
//! compactions; different boards are fully independent. Reaching the update
//! threshold compacts the log into a fresh snapshot inside one database
//! transaction. Detach forces a final compaction and registers a flush
//! guard so a racing re-attach waits instead of reading a half-compacted
//! log.
//!
//! ERROR HANDLING
//! ==============
//! A failed append is logged and dropped: the in-memory state already
//! reflects the edit, only its durability is at risk until the next
//! snapshot. Compaction is transactional — it either fully replaces the
//! snapshot and truncates the log, or rolls back and propagates.

use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::doc::{DocError, DocUpdate, Origin};
use crate::state::{AppState, BoardState};

const DEFAULT_COMPACT_THRESHOLD: usize = 100;
const DEFAULT_PERSIST_QUEUE_CAPACITY: usize = 8192;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn compact_threshold() -> usize {
    env_parse("BOARD_COMPACT_THRESHOLD", DEFAULT_COMPACT_THRESHOLD)
}

fn persist_queue_capacity() -> usize {
    env_parse("BOARD_PERSIST_QUEUE_CAPACITY", DEFAULT_PERSIST_QUEUE_CAPACITY)
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored payload: {0}")]
    Codec(#[from] DocError),
    #[error("persistence worker gone for board {0}")]
    WorkerGone(Uuid),
}

/// Commands accepted by a board's persistence worker, processed in FIFO
/// order so an append never races a compaction for the same board.
#[derive(Debug)]
pub enum PersistCmd {
    /// Append one update blob to the board's log.
    Append(Vec<u8>),
    /// Compact now regardless of the counter; reply on `done`.
    Compact { done: oneshot::Sender<Result<(), sqlx::Error>> },
}

// =============================================================================
// ATTACH / DETACH
// =============================================================================

/// Load a board into memory: wait out any in-flight flush for the same
/// board, apply the stored snapshot, replay logged updates in insertion
/// order, and start the board's persistence worker. Attaching an
/// already-attached board is a no-op — hydration tolerates being invoked
/// repeatedly across reconnects.
///
/// # Errors
///
/// Returns a database error if hydration queries fail, or a codec error if
/// a stored blob is corrupt.
pub async fn attach_board(state: &AppState, board_id: Uuid) -> Result<(), PersistenceError> {
    // PHASE: FLUSH EXCLUSION
    // WHY: a detach for this board may still be compacting; reading the log
    // mid-truncate would hydrate half a board.
    let pending = {
        let guards = state.pending_flushes.lock().await;
        guards.get(&board_id).cloned()
    };
    if let Some(mut rx) = pending {
        let _ = rx.wait_for(|done| *done).await;
    }

    {
        let boards = state.boards.read().await;
        if boards.contains_key(&board_id) {
            return Ok(());
        }
    }

    // PHASE: HYDRATE
    let snapshot: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT data FROM board_snapshots WHERE board_id = $1")
            .bind(board_id)
            .fetch_optional(&state.pool)
            .await?;
    let updates: Vec<Vec<u8>> =
        sqlx::query_scalar("SELECT data FROM board_updates WHERE board_id = $1 ORDER BY id ASC")
            .bind(board_id)
            .fetch_all(&state.pool)
            .await?;

    let mut board = BoardState::new();
    if let Some(snapshot) = &snapshot {
        board.doc.apply_snapshot(snapshot)?;
    }
    for update in &updates {
        board.doc.apply_update(update, Origin::Hydrate)?;
    }
    let replayed = updates.len();

    // PHASE: START WORKER
    let (tx, rx) = mpsc::channel::<PersistCmd>(persist_queue_capacity());
    board.persist_tx = Some(tx);
    tokio::spawn(run_worker(state.clone(), board_id, rx, replayed));

    let mut boards = state.boards.write().await;
    // A concurrent attach may have won the race; keep the first one and let
    // our worker exit when its sender drops.
    boards.entry(board_id).or_insert(board);

    info!(%board_id, replayed, has_snapshot = snapshot.is_some(), "hydrated board from storage");
    Ok(())
}

/// Unload a board: force a final compaction through the worker (guarded so
/// a concurrent re-attach waits on it), then evict the board state.
///
/// # Errors
///
/// Propagates a failed final compaction; the log is never partially
/// truncated. Returns `WorkerGone` if the worker stopped early.
pub async fn detach_board(state: &AppState, board_id: Uuid) -> Result<(), PersistenceError> {
    let Some(tx) = ({
        let mut boards = state.boards.write().await;
        boards.get_mut(&board_id).and_then(|b| b.persist_tx.take())
    }) else {
        // Not attached, or storage-less: just evict.
        let mut boards = state.boards.write().await;
        boards.remove(&board_id);
        return Ok(());
    };

    // Register the flush guard before issuing the compaction.
    let (guard_tx, guard_rx) = watch::channel(false);
    state
        .pending_flushes
        .lock()
        .await
        .insert(board_id, guard_rx);

    let result = flush_through_worker(&tx, board_id).await;
    drop(tx); // Queue closed; the worker drains and exits.

    {
        let mut boards = state.boards.write().await;
        boards.remove(&board_id);
    }
    let _ = guard_tx.send(true);
    state.pending_flushes.lock().await.remove(&board_id);

    info!(%board_id, ok = result.is_ok(), "detached board");
    result
}

async fn flush_through_worker(
    tx: &mpsc::Sender<PersistCmd>,
    board_id: Uuid,
) -> Result<(), PersistenceError> {
    let (done_tx, done_rx) = oneshot::channel();
    if tx.send(PersistCmd::Compact { done: done_tx }).await.is_err() {
        return Err(PersistenceError::WorkerGone(board_id));
    }
    match done_rx.await {
        Ok(result) => result.map_err(PersistenceError::from),
        Err(_) => Err(PersistenceError::WorkerGone(board_id)),
    }
}

// =============================================================================
// STEADY STATE
// =============================================================================

/// Best-effort, non-blocking enqueue of an update for the board's log.
/// Hydration replay is filtered out so the log never re-appends itself.
pub fn enqueue_update(tx: Option<&mpsc::Sender<PersistCmd>>, update: &DocUpdate) {
    if update.origin == Origin::Hydrate {
        return;
    }
    let Some(tx) = tx else {
        return;
    };
    match tx.try_send(PersistCmd::Append(update.data.clone())) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(origin = update.origin.as_str(), "persist queue full; dropping update");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(origin = update.origin.as_str(), "persist queue closed; dropping update");
        }
    }
}

// =============================================================================
// WORKER
// =============================================================================

async fn run_worker(
    state: AppState,
    board_id: Uuid,
    mut rx: mpsc::Receiver<PersistCmd>,
    replayed: usize,
) {
    let threshold = compact_threshold();
    // Counter starts at the replayed row count so an attach of a busy log
    // compacts soon instead of letting the log grow unbounded.
    let mut counter = replayed;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            PersistCmd::Append(data) => {
                match append_update(&state.pool, board_id, &data).await {
                    Ok(()) => counter += 1,
                    Err(e) => {
                        // Availability over per-edit durability: the edit is
                        // live in memory, only its log row was lost.
                        warn!(error = %e, %board_id, "update append failed; dropping");
                        continue;
                    }
                }
                if counter >= threshold {
                    match compact(&state, board_id).await {
                        Ok(()) => counter = 0,
                        Err(e) => {
                            error!(error = %e, %board_id, "threshold compaction failed; will retry");
                        }
                    }
                }
            }
            PersistCmd::Compact { done } => {
                let result = compact(&state, board_id).await;
                if result.is_ok() {
                    counter = 0;
                }
                let _ = done.send(result);
            }
        }
    }
}

async fn append_update(pool: &PgPool, board_id: Uuid, data: &[u8]) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO board_updates (board_id, data) VALUES ($1, $2)")
        .bind(board_id)
        .bind(data)
        .execute(pool)
        .await?;
    Ok(())
}

/// Encode the full current state and, in one transaction, upsert the
/// snapshot row and delete every log row for the board.
async fn compact(state: &AppState, board_id: Uuid) -> Result<(), sqlx::Error> {
    let Some(data) = ({
        let boards = state.boards.read().await;
        boards.get(&board_id).map(|b| b.doc.encode_state())
    }) else {
        // Board evicted before the command drained; nothing to snapshot.
        return Ok(());
    };

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO board_snapshots (board_id, data, updated_at) VALUES ($1, $2, now())
         ON CONFLICT (board_id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
    )
    .bind(board_id)
    .bind(&data)
    .execute(tx.as_mut())
    .await?;
    sqlx::query("DELETE FROM board_updates WHERE board_id = $1")
        .bind(board_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;

    info!(%board_id, snapshot_bytes = data.len(), "compacted board log");
    Ok(())
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
