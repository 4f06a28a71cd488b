//! LLM API client, backend seam and message types

mod backend;
mod client;
mod types;

pub use backend::{ClaudeBackend, EventStream, ModelBackend};
pub use client::ClaudeClient;
pub use types::*;
