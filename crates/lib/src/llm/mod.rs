//! LLM client: chat completion against the Claude Messages API.

mod claude;

pub use claude::{ChatMessage, ClaudeClient, ClaudeError};
