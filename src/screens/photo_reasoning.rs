use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::RequestAdapter;
use crate::client::{GenerativeModel, ModelClient};
use crate::factory::{GenerativeModelFactory, ScreenKind};
use crate::models::{ImageAttachment, Prompt};
use crate::state::UiState;

pub struct PhotoReasoningScreen<C: ModelClient = GenerativeModel> {
    adapter: RequestAdapter<C>,
}

impl PhotoReasoningScreen<GenerativeModel> {
    pub fn open(factory: &GenerativeModelFactory) -> Self {
        Self::new(Arc::new(factory.create(ScreenKind::PhotoReasoning)))
    }
}

impl<C: ModelClient> PhotoReasoningScreen<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            adapter: RequestAdapter::new(client),
        }
    }

    /// Stream an answer to `question` about the attached images.
    pub fn reason(&self, question: &str, images: Vec<ImageAttachment>) -> JoinHandle<()> {
        tracing::info!(images = images.len(), "Reasoning about photos");
        let prompt = Prompt {
            text: format!(
                "Look at the image(s), and then answer the following question: {question}"
            ),
            images,
        };
        self.adapter.submit_streaming(prompt)
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.adapter.subscribe()
    }

    pub fn state(&self) -> UiState {
        self.adapter.state()
    }

    pub fn close(&self) {
        self.adapter.cancel();
    }
}

/// Guess an image MIME type from a file name; JPEG when unknown.
pub fn mime_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "image/jpeg",
    }
}
