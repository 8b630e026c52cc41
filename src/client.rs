use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::{Arc, Mutex};

use crate::error::{GenerativeAiError, Result};
use crate::models::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Prompt,
};
use crate::transport::{ResponseStream, Transport};

#[cfg(test)]
use mockall::automock;

/// The capability pair every screen adapter drives: a one-shot call and a
/// streaming call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    async fn generate(&self, prompt: &Prompt) -> Result<GenerateContentResponse>;
    async fn generate_stream(&self, prompt: &Prompt) -> Result<ResponseStream>;
}

/// A configured remote model: transport, model name and generation parameters.
#[derive(Clone)]
pub struct GenerativeModel {
    tx: Arc<dyn Transport>,
    model_name: String,
    generation_config: GenerationConfig,
}

impl GenerativeModel {
    pub fn new(
        tx: Arc<dyn Transport>,
        model_name: String,
        generation_config: GenerationConfig,
    ) -> Self {
        Self {
            tx,
            model_name,
            generation_config,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    fn request(&self, contents: Vec<Content>) -> GenerateContentRequest {
        let generation_config = (self.generation_config != GenerationConfig::default())
            .then(|| self.generation_config.clone());
        GenerateContentRequest {
            contents,
            generation_config,
        }
    }

    pub async fn generate_contents(
        &self,
        contents: Vec<Content>,
    ) -> Result<GenerateContentResponse> {
        tracing::info!(model = %self.model_name, turns = contents.len(), "Generating content");
        self.tx
            .generate_content(&self.model_name, &self.request(contents))
            .await
    }

    pub async fn stream_contents(&self, contents: Vec<Content>) -> Result<ResponseStream> {
        tracing::info!(model = %self.model_name, turns = contents.len(), "Streaming content");
        self.tx
            .stream_generate_content(&self.model_name, &self.request(contents))
            .await
    }

    pub fn start_chat(&self, history: Vec<Content>) -> ChatSession {
        ChatSession::new(self.clone(), history)
    }
}

#[async_trait]
impl ModelClient for GenerativeModel {
    async fn generate(&self, prompt: &Prompt) -> Result<GenerateContentResponse> {
        self.generate_contents(vec![prompt.to_content()]).await
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<ResponseStream> {
        self.stream_contents(vec![prompt.to_content()]).await
    }
}

/// A multi-turn conversation. Each successful exchange appends the user turn
/// and the model's reply to the history; failed exchanges, and replies with no
/// text, leave it untouched.
pub struct ChatSession {
    model: GenerativeModel,
    history: Arc<Mutex<Vec<Content>>>,
}

impl ChatSession {
    pub fn new(model: GenerativeModel, history: Vec<Content>) -> Self {
        Self {
            model,
            history: Arc::new(Mutex::new(history)),
        }
    }

    pub fn history(&self) -> Vec<Content> {
        lock_history(&self.history).clone()
    }

    fn contents_with(&self, user_turn: &Content) -> Vec<Content> {
        let mut contents = self.history();
        contents.push(user_turn.clone());
        contents
    }
}

fn lock_history(history: &Mutex<Vec<Content>>) -> std::sync::MutexGuard<'_, Vec<Content>> {
    // A panic while holding the lock cannot leave a half-written Vec behind
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelClient for ChatSession {
    async fn generate(&self, prompt: &Prompt) -> Result<GenerateContentResponse> {
        let user_turn = prompt.to_content();
        let response = self.model.generate_contents(self.contents_with(&user_turn)).await?;

        let Some(reply) = response.text() else {
            return Err(missing_text_error(&response));
        };
        let mut history = lock_history(&self.history);
        history.push(user_turn);
        history.push(Content::model(reply));
        Ok(response)
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<ResponseStream> {
        let user_turn = prompt.to_content();
        let inner = self.model.stream_contents(self.contents_with(&user_turn)).await?;

        // Pass chunks through untouched, recording the reply once the stream ends cleanly.
        let history = Arc::clone(&self.history);
        let state = (inner, String::new(), Some(user_turn));
        let chunks = stream::unfold(state, move |(mut inner, mut reply, mut pending)| {
            let history = Arc::clone(&history);
            async move {
                let user_turn = pending.take()?;
                match inner.next().await {
                    Some(Ok(chunk)) => {
                        if let Some(text) = chunk.text() {
                            reply.push_str(&text);
                        }
                        Some((Ok(chunk), (inner, reply, Some(user_turn))))
                    }
                    Some(Err(e)) => Some((Err(e), (inner, reply, None))),
                    None if reply.is_empty() => {
                        tracing::warn!("Streamed reply carried no text, exchange not recorded");
                        None
                    }
                    None => {
                        let mut history = lock_history(&history);
                        history.push(user_turn);
                        history.push(Content::model(reply));
                        None
                    }
                }
            }
        });
        Ok(chunks.boxed())
    }
}

/// Error for a call that succeeded but produced no text, e.g. a blocked prompt.
pub fn missing_text_error(response: &GenerateContentResponse) -> GenerativeAiError {
    match response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        Some(reason) => GenerativeAiError::EmptyResponse(format!("prompt blocked: {reason}")),
        None => GenerativeAiError::EmptyResponse("response contained no text".to_string()),
    }
}
