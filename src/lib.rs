//! Shapeboard: real-time collaborative canvas server.
//!
//! Rooms are independent actors owning a replicated shape document, soft
//! locks for interactive editing, debounced snapshot persistence, and an AI
//! command pipeline that turns prompts into atomic canvas edits.

pub mod ai;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod frame;
pub mod identity;
pub mod llm;
pub mod locks;
pub mod persistence;
pub mod room;
pub mod routes;
pub mod state;
