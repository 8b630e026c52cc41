//! Feature screens. Each owns one request adapter driving its own model client.

pub mod chat;
pub mod photo_reasoning;
pub mod structured_output;
pub mod summarize;

pub use chat::{ChatMessage, ChatScreen, Participant};
pub use photo_reasoning::PhotoReasoningScreen;
pub use structured_output::{StructuredOutputScreen, parse_recipes};
pub use summarize::SummarizeScreen;
