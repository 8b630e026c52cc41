use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::RequestAdapter;
use crate::client::{GenerativeModel, ModelClient};
use crate::factory::{GenerativeModelFactory, ScreenKind};
use crate::state::UiState;

pub fn summarize_prompt(input: &str) -> String {
    format!("Summarize the following text for me: {input}")
}

pub struct SummarizeScreen<C: ModelClient = GenerativeModel> {
    adapter: RequestAdapter<C>,
}

impl SummarizeScreen<GenerativeModel> {
    pub fn open(factory: &GenerativeModelFactory) -> Self {
        Self::new(Arc::new(factory.create(ScreenKind::Summarize)))
    }
}

impl<C: ModelClient> SummarizeScreen<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            adapter: RequestAdapter::new(client),
        }
    }

    /// Stream a summary of `input`.
    pub fn summarize(&self, input: &str) -> JoinHandle<()> {
        tracing::info!(chars = input.len(), "Summarizing input");
        self.adapter.submit_streaming(summarize_prompt(input))
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
