pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod models;
pub mod screens;
pub mod sse;
pub mod state;
pub mod transport;

pub use crate::adapter::RequestAdapter;
pub use crate::client::{ChatSession, GenerativeModel, ModelClient};
pub use crate::config::Config;
pub use crate::error::{GenerativeAiError, Result};
pub use crate::factory::{GenerativeModelFactory, ModelClientConfig, ScreenKind};
pub use crate::models::{ImageAttachment, Prompt};
pub use crate::state::UiState;
