use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::{Client, Response};
use std::time::Duration;

use crate::error::{GenerativeAiError, Result};
use crate::models::{ApiErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::sse::SseDecoder;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub type ResponseStream = BoxStream<'static, Result<GenerateContentResponse>>;

#[cfg(test)]
use mockall::automock;

/// Raw access to the model service. One request per call, no retries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse>;

    async fn stream_generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> Result<ResponseStream>;
}

pub struct GeminiTransport {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_key, base_url))
    }

    /// Transport over an existing HTTP client, so several keys can share one
    /// connection pool.
    pub fn with_client(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, req: &GenerateContentRequest) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .json(req)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::warn!(status, "Model API returned an error response");
        Err(GenerativeAiError::Api {
            status,
            message: api_error_message(&body),
        })
    }
}

/// Prefer the service's `error.message`; fall back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Turn a byte stream of server-sent events into parsed response chunks.
pub fn decode_event_stream<S, B, E>(bytes: S) -> ResponseStream
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<GenerativeAiError> + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(), false);
    stream::unfold(state, |(mut bytes, mut decoder, done)| async move {
        if done {
            return None;
        }
        match bytes.next().await {
            Some(Ok(chunk)) => {
                let events = decoder.push(chunk.as_ref());
                Some((stream::iter(parse_events(events)), (bytes, decoder, false)))
            }
            Some(Err(e)) => Some((stream::iter(vec![Err(e.into())]), (bytes, decoder, true))),
            None => {
                let tail = decoder.finish().into_iter().collect();
                Some((stream::iter(parse_events(tail)), (bytes, decoder, true)))
            }
        }
    })
    .flatten()
    .boxed()
}

fn parse_events(events: Vec<String>) -> Vec<Result<GenerateContentResponse>> {
    events
        .into_iter()
        .filter(|data| data.trim() != "[DONE]")
        .map(|data| {
            serde_json::from_str::<GenerateContentResponse>(&data).map_err(|e| {
                GenerativeAiError::Internal(format!(
                    "Failed to parse streamed response chunk: {e}. Raw: {data}"
                ))
            })
        })
        .collect()
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model, "generateContent");
        tracing::debug!(%model, "Sending generateContent request");

        let response = self.post(&url, req).await?;
        response.json().await.map_err(|e| {
            GenerativeAiError::Internal(format!("Failed to parse model API response: {e}"))
        })
    }

    async fn stream_generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> Result<ResponseStream> {
        let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
        tracing::debug!(%model, "Opening streamGenerateContent request");

        let response = self.post(&url, req).await?;
        Ok(decode_event_stream(response.bytes_stream()))
    }
}
