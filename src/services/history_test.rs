use super::*;
use crate::model::{ObjectKind, ObjectProps};
use crate::services::batch::{self, BatchCommand};
use crate::services::object;
use crate::state::test_helpers;

async fn seed() -> (AppState, Uuid) {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;
    (state, board_id)
}

/// Create a rectangle as a distinct interactive undo step.
async fn create_local(state: &AppState, board_id: Uuid, x: f64) -> BoardObject {
    stop_capturing(state, board_id).await.unwrap();
    object::create_object(
        state,
        board_id,
        x,
        0.0,
        100.0,
        100.0,
        ObjectProps::defaults(ObjectKind::Rectangle),
        None,
        Origin::Local,
    )
    .await
    .unwrap()
}

async fn alive(state: &AppState, board_id: Uuid, id: Uuid) -> bool {
    object::get_object(state, board_id, id).await.unwrap().is_some()
}

// =============================================================================
// MERGED ORDERING
// =============================================================================

#[tokio::test]
async fn undo_pops_interleaved_sources_in_chronological_order() {
    let (state, board_id) = seed().await;

    let a = create_local(&state, board_id, 0.0).await;
    let outcome = batch::run_batch(
        &state,
        board_id,
        vec![BatchCommand::CreateSticky { x: 300.0, y: 0.0, text: "B".into(), color: None }],
        None,
    )
    .await
    .unwrap();
    let b = outcome.created[0];
    let c = create_local(&state, board_id, 600.0).await;

    {
        let boards = state.boards.read().await;
        assert_eq!(boards.get(&board_id).unwrap().history.undo_len(), 3);
    }

    // Three undos remove C, then B, then A.
    assert!(undo(&state, board_id).await.unwrap());
    assert!(!alive(&state, board_id, c.id).await);
    assert!(alive(&state, board_id, b).await);
    assert!(alive(&state, board_id, a.id).await);

    assert!(undo(&state, board_id).await.unwrap());
    assert!(!alive(&state, board_id, b).await);
    assert!(alive(&state, board_id, a.id).await);

    assert!(undo(&state, board_id).await.unwrap());
    assert!(!alive(&state, board_id, a.id).await);

    // Stack exhausted.
    assert!(!undo(&state, board_id).await.unwrap());

    // Three redos restore A, then B, then C.
    assert!(redo(&state, board_id).await.unwrap());
    assert!(alive(&state, board_id, a.id).await);
    assert!(!alive(&state, board_id, b).await);

    assert!(redo(&state, board_id).await.unwrap());
    assert!(alive(&state, board_id, b).await);
    assert!(!alive(&state, board_id, c.id).await);

    assert!(redo(&state, board_id).await.unwrap());
    assert!(alive(&state, board_id, c.id).await);

    assert!(!redo(&state, board_id).await.unwrap());
}

#[tokio::test]
async fn batch_boundary_splits_interactive_coalescing() {
    let (state, board_id) = seed().await;

    // Two local creates in quick succession coalesce into one native step;
    // a batch between them must keep them separate.
    let _a = object::create_object(
        &state,
        board_id,
        0.0,
        0.0,
        100.0,
        100.0,
        ObjectProps::defaults(ObjectKind::Rectangle),
        None,
        Origin::Local,
    )
    .await
    .unwrap();
    batch::run_batch(
        &state,
        board_id,
        vec![BatchCommand::CreateSticky { x: 300.0, y: 0.0, text: "mid".into(), color: None }],
        None,
    )
    .await
    .unwrap();
    let _c = object::create_object(
        &state,
        board_id,
        600.0,
        0.0,
        100.0,
        100.0,
        ObjectProps::defaults(ObjectKind::Rectangle),
        None,
        Origin::Local,
    )
    .await
    .unwrap();

    let boards = state.boards.read().await;
    let board = boards.get(&board_id).unwrap();
    assert_eq!(board.history.undo_len(), 3);
    assert_eq!(board.doc.undo_len(), 2);
}

#[tokio::test]
async fn new_edit_after_undo_destroys_redo_branch() {
    let (state, board_id) = seed().await;

    create_local(&state, board_id, 0.0).await;
    create_local(&state, board_id, 200.0).await;
    assert!(undo(&state, board_id).await.unwrap());
    {
        let boards = state.boards.read().await;
        assert_eq!(boards.get(&board_id).unwrap().history.redo_len(), 1);
    }

    create_local(&state, board_id, 400.0).await;
    {
        let boards = state.boards.read().await;
        assert_eq!(boards.get(&board_id).unwrap().history.redo_len(), 0);
    }
    assert!(!redo(&state, board_id).await.unwrap());
}

// =============================================================================
// BATCH PATCH REVERSAL
// =============================================================================

#[tokio::test]
async fn undoing_a_batch_restores_deletions_and_updates() {
    let (state, board_id) = seed().await;

    let victim = create_local(&state, board_id, 0.0).await;
    let moved = create_local(&state, board_id, 200.0).await;

    batch::run_batch(
        &state,
        board_id,
        vec![
            BatchCommand::DeleteObjects { ids: vec![victim.id] },
            BatchCommand::MoveObject { id: moved.id, dx: 50.0, dy: 0.0 },
        ],
        None,
    )
    .await
    .unwrap();
    assert!(!alive(&state, board_id, victim.id).await);

    assert!(undo(&state, board_id).await.unwrap());
    assert!(alive(&state, board_id, victim.id).await);
    let restored = object::get_object(&state, board_id, moved.id).await.unwrap().unwrap();
    assert!((restored.x - 200.0).abs() < f64::EPSILON);

    assert!(redo(&state, board_id).await.unwrap());
    assert!(!alive(&state, board_id, victim.id).await);
    let reapplied = object::get_object(&state, board_id, moved.id).await.unwrap().unwrap();
    assert!((reapplied.x - 250.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn redo_restores_batch_creations_as_of_undo_time() {
    let (state, board_id) = seed().await;

    let outcome = batch::run_batch(
        &state,
        board_id,
        vec![BatchCommand::CreateSticky { x: 0.0, y: 0.0, text: "draft".into(), color: None }],
        None,
    )
    .await
    .unwrap();
    let b = outcome.created[0];

    // An untracked edit between the batch and its undo leaves no history
    // entry of its own; the lazy snapshot keeps it across undo/redo.
    object::update_text(&state, board_id, b, "final", Origin::RemoteAi)
        .await
        .unwrap();

    assert!(undo(&state, board_id).await.unwrap());
    assert!(!alive(&state, board_id, b).await);

    assert!(redo(&state, board_id).await.unwrap());
    let restored = object::get_object(&state, board_id, b).await.unwrap().unwrap();
    let ObjectProps::Sticky { text, .. } = &restored.props else {
        panic!("expected sticky");
    };
    assert_eq!(text, "final");
}

#[tokio::test]
async fn empty_batch_pushes_no_history_entry() {
    let (state, board_id) = seed().await;
    let ghost = Uuid::new_v4();

    batch::run_batch(
        &state,
        board_id,
        vec![BatchCommand::MoveObject { id: ghost, dx: 10.0, dy: 10.0 }],
        None,
    )
    .await
    .unwrap();

    let boards = state.boards.read().await;
    assert_eq!(boards.get(&board_id).unwrap().history.undo_len(), 0);
}

// =============================================================================
// CAP
// =============================================================================

#[tokio::test]
async fn cap_evicts_oldest_and_keeps_native_stack_aligned() {
    let (state, board_id) = seed().await;

    let first;
    {
        let mut boards = state.boards.write().await;
        let board = boards.get_mut(&board_id).unwrap();
        board.history.cap = 3;

        first = test_helpers::dummy_object(ObjectKind::Rectangle, 0.0, 0.0, 50.0, 50.0);
        let insert = |board: &mut crate::state::BoardState, obj: BoardObject, at: i64| {
            board.doc.apply_at(
                vec![DocOp::Insert(Box::new(obj.clone())), DocOp::OrderInsert(obj.id, None)],
                Origin::Local,
                at,
            );
            board.history.note_native(&mut board.doc);
        };
        insert(board, first.clone(), 1_000);
        for (x, at) in [(100.0, 11_000), (200.0, 21_000), (300.0, 31_000)] {
            let obj = test_helpers::dummy_object(ObjectKind::Rectangle, x, 0.0, 50.0, 50.0);
            insert(board, obj, at);
        }

        assert_eq!(board.history.undo_len(), 3);
        assert_eq!(board.doc.undo_len(), 3);
    }

    // Three undos drain the whole history; the evicted first step is gone
    // for good, so the first object survives.
    for _ in 0..3 {
        assert!(undo(&state, board_id).await.unwrap());
    }
    assert!(!undo(&state, board_id).await.unwrap());
    assert!(alive(&state, board_id, first.id).await);
    let all = object::get_all(&state, board_id).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn history_errors_when_board_not_loaded() {
    let state = test_helpers::test_app_state();
    let err = undo(&state, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, HistoryError::BoardNotLoaded(_)));
}
