//! # themex-llm
//!
//! Generative-text assistant used for labeling, atomic splitting, and
//! synthesis prose. Callers treat every assistant failure as a cue to fall
//! back to heuristics.

#![deny(unsafe_code)]

pub mod assistant;
pub mod errors;
pub mod json;
pub mod mock;
pub mod openai;

pub use assistant::{Completion, CompletionRequest, TextAssistant, Usage};
pub use errors::AssistantError;
pub use json::extract_json;
pub use mock::{MockAssistant, MockReply};
pub use openai::OpenAiChatClient;
