//! Engine services over the shared board state.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the board-state business logic: object mutations,
//! merged undo/redo, batch capture, and durability. Hosts (websocket
//! routes, RPC handlers) stay focused on protocol translation and auth.

pub mod batch;
pub mod history;
pub mod object;
pub mod persistence;
