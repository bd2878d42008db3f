//! AI: natural-language prompts turned into atomic canvas edits.
//!
//! DESIGN
//! ======
//! The pipeline is: length and role check, translator call under a hard
//! timeout (owned by the room), parse into typed [`ToolCall`]s, validate and
//! clamp, apply as one document transaction, append one history entry.
//! [`AiExecutor`] owns everything except the translator call itself, so the
//! room can await the translator without holding the document.

pub mod cache;
pub mod executor;
pub mod spatial;
pub mod tools;
pub mod translator;
pub mod validate;

pub use cache::CommandCache;
pub use executor::{AiCommand, AiExecutor, Begin};
pub use spatial::Viewport;
pub use tools::{ShapeRef, ToolCall, tool_definitions};
pub use translator::{CanvasContext, DisabledTranslator, LlmTranslator, RawToolCall, Translator};
