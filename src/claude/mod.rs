//! Anthropic Messages adapter: translates requests into the OpenAI-shape
//! internal dialect and responses (plain and streaming) back out.

mod input;
mod output;

pub use input::from_claude;
pub use output::{map_stop_reason, to_claude_response, ClaudeStreamRewriter};
