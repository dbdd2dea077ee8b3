//! Textual events: observers that watch the stream without sending anything.

pub mod wait4prompts;

pub use wait4prompts::{PromptOccurrence, Wait4Prompts};
