use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ModelClient, missing_text_error};
use crate::models::Prompt;
use crate::state::UiState;

/// Turns prompts into `UiState` publications for one screen.
///
/// Each call runs on its own tokio task, so `submit` and `submit_streaming`
/// must be invoked from within a runtime. Starting a call supersedes whatever
/// call was in flight: the older call is cancelled and anything it still tries
/// to publish is discarded. `cancel` (or dropping the adapter) stops all work.
pub struct RequestAdapter<C: ModelClient> {
    client: Arc<C>,
    state: Arc<watch::Sender<UiState>>,
    epoch: Arc<AtomicU64>,
    lifetime: CancellationToken,
    in_flight: Mutex<Option<CancellationToken>>,
}

/// Publishing side of a single call. Publications only land while this call is
/// still the newest one.
struct CallPublisher {
    state: Arc<watch::Sender<UiState>>,
    epoch: Arc<AtomicU64>,
    call: u64,
}

impl CallPublisher {
    fn publish(&self, next: UiState) -> bool {
        self.state.send_if_modified(|current| {
            // Checked under the channel's lock so a superseded call can never
            // land after the newer call's `Loading`.
            if self.epoch.load(Ordering::SeqCst) != self.call {
                return false;
            }
            *current = next;
            true
        })
    }
}

impl<C: ModelClient> RequestAdapter<C> {
    pub fn new(client: Arc<C>) -> Self {
        let (state, _) = watch::channel(UiState::Initial);
        Self {
            client,
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
            lifetime: CancellationToken::new(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Receiver for state updates. The receiver sees the latest value; rapid
    /// updates may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> UiState {
        self.state.borrow().clone()
    }

    /// Tear down: cancels every in-flight call. Later submissions are ignored,
    /// and nothing an in-flight call still tries to publish lands.
    pub fn cancel(&self) {
        if !self.lifetime.is_cancelled() {
            info!("Cancelling request adapter");
        }
        self.retire();
    }

    fn retire(&self) {
        self.lifetime.cancel();
        // Stales every publisher, including one whose answer already arrived
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Supersede any in-flight call and publish `Loading` for the new one.
    fn begin_call(&self) -> Option<(CallPublisher, CancellationToken)> {
        if self.lifetime.is_cancelled() {
            warn!("Ignoring request on a cancelled adapter");
            return None;
        }

        let token = self.lifetime.child_token();
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let call = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let publisher = CallPublisher {
            state: Arc::clone(&self.state),
            epoch: Arc::clone(&self.epoch),
            call,
        };
        publisher.publish(UiState::Loading);
        debug!(call, "Started call");
        Some((publisher, token))
    }

    /// One-shot call. Publishes `Loading` before returning, then exactly one of
    /// `Success(text)` or `Error(message)` unless cancelled first.
    pub fn submit(&self, prompt: impl Into<Prompt>) -> JoinHandle<()> {
        self.start(prompt).unwrap_or_else(|| tokio::spawn(async {}))
    }

    /// Like `submit`, but returns `None` when the adapter is cancelled and the
    /// call was never started.
    pub fn start(&self, prompt: impl Into<Prompt>) -> Option<JoinHandle<()>> {
        let (publisher, token) = self.begin_call()?;
        let prompt = prompt.into();
        let client = Arc::clone(&self.client);

        Some(tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(call = publisher.call, "Call cancelled before a response arrived");
                    return;
                }
                result = client.generate(&prompt) => result,
            };

            let next = match result {
                Ok(response) => match response.text() {
                    Some(text) => UiState::Success(text),
                    None => {
                        let err = missing_text_error(&response);
                        warn!(call = publisher.call, "Model returned no text: {}", err);
                        UiState::Error(err.to_string())
                    }
                },
                Err(e) => {
                    warn!(call = publisher.call, "Model call failed: {}", e);
                    UiState::Error(e.to_string())
                }
            };
            publisher.publish(next);
        }))
    }

    /// Streaming call. Publishes `Loading` before returning, then
    /// `Success(accumulated)` after every chunk, in arrival order. A failure at
    /// any point publishes a single `Error` and stops consuming the stream.
    pub fn submit_streaming(&self, prompt: impl Into<Prompt>) -> JoinHandle<()> {
        self.start_streaming(prompt).unwrap_or_else(|| tokio::spawn(async {}))
    }

    /// Like `submit_streaming`, but returns `None` when the adapter is cancelled
    /// and the call was never started.
    pub fn start_streaming(&self, prompt: impl Into<Prompt>) -> Option<JoinHandle<()>> {
        let (publisher, token) = self.begin_call()?;
        let prompt = prompt.into();
        let client = Arc::clone(&self.client);

        Some(tokio::spawn(async move {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                opened = client.generate_stream(&prompt) => opened,
            };
            let mut chunks = match opened {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(call = publisher.call, "Failed to open model stream: {}", e);
                    publisher.publish(UiState::Error(e.to_string()));
                    return;
                }
            };

            let mut output = String::new();
            let mut received = 0usize;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(call = publisher.call, received, "Stream cancelled");
                        return;
                    }
                    next = chunks.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        received += 1;
                        if let Some(text) = chunk.text() {
                            output.push_str(&text);
                        }
                        publisher.publish(UiState::Success(output.clone()));
                    }
                    Some(Err(e)) => {
                        warn!(call = publisher.call, received, "Model stream failed: {}", e);
                        publisher.publish(UiState::Error(e.to_string()));
                        return;
                    }
                    None => break,
                }
            }

            if received == 0 {
                publisher.publish(UiState::Success(output));
            }
            debug!(call = publisher.call, received, "Stream complete");
        }))
    }
}

impl<C: ModelClient> Drop for RequestAdapter<C> {
    fn drop(&mut self) {
        self.retire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockModelClient;
    use crate::error::{GenerativeAiError, Result};
    use crate::models::GenerateContentResponse;
    use crate::transport::ResponseStream;
    use async_trait::async_trait;
    use futures::channel::{mpsc, oneshot};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    const ANY_PROMPT: &str = "*";

    /// Client whose answers are released by the test, one step at a time.
    /// One-shot gates are looked up by prompt text, falling back to `ANY_PROMPT`.
    struct GatedClient {
        one_shot: Mutex<HashMap<String, oneshot::Receiver<Result<GenerateContentResponse>>>>,
        stream: Mutex<Option<mpsc::UnboundedReceiver<Result<GenerateContentResponse>>>>,
    }

    impl GatedClient {
        fn one_shot() -> (Self, oneshot::Sender<Result<GenerateContentResponse>>) {
            let (tx, rx) = oneshot::channel();
            let client = Self {
                one_shot: Mutex::new(HashMap::from([(ANY_PROMPT.to_string(), rx)])),
                stream: Mutex::new(None),
            };
            (client, tx)
        }

        fn streaming() -> (Self, mpsc::UnboundedSender<Result<GenerateContentResponse>>) {
            let (tx, rx) = mpsc::unbounded();
            let client = Self {
                one_shot: Mutex::new(HashMap::new()),
                stream: Mutex::new(Some(rx)),
            };
            (client, tx)
        }
    }

    #[async_trait]
    impl ModelClient for GatedClient {
        async fn generate(&self, prompt: &Prompt) -> Result<GenerateContentResponse> {
            let gate = {
                let mut gates = self.one_shot.lock().unwrap();
                gates
                    .remove(&prompt.text)
                    .or_else(|| gates.remove(ANY_PROMPT))
            };
            let Some(rx) = gate else {
                return Err(GenerativeAiError::Internal("no gate left".to_string()));
            };
            rx.await
                .unwrap_or_else(|_| Err(GenerativeAiError::Internal("gate dropped".to_string())))
        }

        async fn generate_stream(&self, _prompt: &Prompt) -> Result<ResponseStream> {
            let rx = self.stream.lock().unwrap().take().expect("single use");
            Ok(rx.boxed())
        }
    }

    async fn next_state(rx: &mut watch::Receiver<UiState>) -> UiState {
        timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("state should change")
            .expect("sender alive");
        rx.borrow_and_update().clone()
    }

    fn text(t: &str) -> Result<GenerateContentResponse> {
        Ok(GenerateContentResponse::from_text(t))
    }

    #[tokio::test]
    async fn submit_publishes_loading_immediately() {
        let (client, _gate) = GatedClient::one_shot();
        let adapter = RequestAdapter::new(Arc::new(client));
        assert_eq!(adapter.state(), UiState::Initial);

        let _handle = adapter.submit("Summarize this");
        assert_eq!(adapter.state(), UiState::Loading);
    }

    #[tokio::test]
    async fn submit_success_publishes_single_success() {
        let (client, gate) = GatedClient::one_shot();
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let handle = adapter.submit("prompt");
        assert_eq!(*rx.borrow_and_update(), UiState::Loading);

        gate.send(text("the answer")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("the answer".to_string()));

        handle.await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn submit_failure_publishes_single_error() {
        let mut client = MockModelClient::new();
        client.expect_generate().times(1).returning(|_| {
            Err(GenerativeAiError::Api {
                status: 429,
                message: "Quota exceeded".to_string(),
            })
        });
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let handle = adapter.submit("prompt");
        assert_eq!(*rx.borrow_and_update(), UiState::Loading);
        handle.await.unwrap();

        assert_eq!(
            *rx.borrow_and_update(),
            UiState::Error("Model API error (429): Quota exceeded".to_string())
        );
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn submit_without_text_is_an_error() {
        let mut client = MockModelClient::new();
        client
            .expect_generate()
            .returning(|_| Ok(GenerateContentResponse::default()));
        let adapter = RequestAdapter::new(Arc::new(client));

        adapter.submit("prompt").await.unwrap();
        assert_eq!(
            adapter.state(),
            UiState::Error("response contained no text".to_string())
        );
    }

    #[tokio::test]
    async fn streaming_accumulates_chunks_in_order() {
        let (client, chunks) = GatedClient::streaming();
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let handle = adapter.submit_streaming("prompt");
        assert_eq!(*rx.borrow_and_update(), UiState::Loading);

        chunks.unbounded_send(text("c1")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("c1".to_string()));
        chunks.unbounded_send(text("c2")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("c1c2".to_string()));
        chunks.unbounded_send(text("c3")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("c1c2c3".to_string()));

        drop(chunks);
        handle.await.unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(adapter.state(), UiState::Success("c1c2c3".to_string()));
    }

    #[tokio::test]
    async fn streaming_error_mid_stream_stops_publishing() {
        let (client, chunks) = GatedClient::streaming();
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let handle = adapter.submit_streaming("prompt");
        chunks.unbounded_send(text("c1")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("c1".to_string()));

        chunks
            .unbounded_send(Err(GenerativeAiError::Internal("connection reset".to_string())))
            .unwrap();
        assert_eq!(
            next_state(&mut rx).await,
            UiState::Error("Internal error: connection reset".to_string())
        );

        // Anything after the failure is never consumed
        let _ = chunks.unbounded_send(text("c2"));
        handle.await.unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(
            adapter.state(),
            UiState::Error("Internal error: connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn streaming_chunk_without_text_still_publishes() {
        let (client, chunks) = GatedClient::streaming();
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let handle = adapter.submit_streaming("prompt");
        chunks.unbounded_send(text("a")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("a".to_string()));
        chunks
            .unbounded_send(Ok(GenerateContentResponse::default()))
            .unwrap();
        chunks.unbounded_send(text("b")).unwrap();
        drop(chunks);
        handle.await.unwrap();
        assert_eq!(adapter.state(), UiState::Success("ab".to_string()));
    }

    #[tokio::test]
    async fn empty_stream_settles_on_empty_success() {
        let mut client = MockModelClient::new();
        client
            .expect_generate_stream()
            .returning(|_| Ok(futures::stream::empty().boxed()));
        let adapter = RequestAdapter::new(Arc::new(client));

        adapter.submit_streaming("prompt").await.unwrap();
        assert_eq!(adapter.state(), UiState::Success(String::new()));
    }

    #[tokio::test]
    async fn stream_open_failure_is_an_error() {
        let mut client = MockModelClient::new();
        client.expect_generate_stream().returning(|_| {
            Err(GenerativeAiError::Api {
                status: 400,
                message: "API key not valid".to_string(),
            })
        });
        let adapter = RequestAdapter::new(Arc::new(client));

        adapter.submit_streaming("prompt").await.unwrap();
        assert_eq!(
            adapter.state(),
            UiState::Error("Model API error (400): API key not valid".to_string())
        );
    }

    #[tokio::test]
    async fn cancel_stops_in_flight_call() {
        let (client, gate) = GatedClient::one_shot();
        let adapter = RequestAdapter::new(Arc::new(client));

        let handle = adapter.submit("prompt");
        adapter.cancel();
        handle.await.unwrap();
        // The late answer has nowhere to go
        let _ = gate.send(text("late"));
        assert_eq!(adapter.state(), UiState::Loading);

        // Submissions after teardown are ignored
        adapter.submit("again").await.unwrap();
        assert_eq!(adapter.state(), UiState::Loading);
        assert!(adapter.is_cancelled());
        assert!(adapter.start_streaming("again").is_none());
    }

    #[tokio::test]
    async fn newer_call_supersedes_older_one() {
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let client = GatedClient {
            one_shot: Mutex::new(HashMap::from([
                ("first".to_string(), first_rx),
                ("second".to_string(), second_rx),
            ])),
            stream: Mutex::new(None),
        };
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let older = adapter.submit("first");
        let newer = adapter.submit("second");
        assert_eq!(*rx.borrow_and_update(), UiState::Loading);

        second_tx.send(text("fresh")).unwrap();
        assert_eq!(next_state(&mut rx).await, UiState::Success("fresh".to_string()));
        let _ = first_tx.send(text("stale"));
        older.await.unwrap();
        newer.await.unwrap();

        assert!(!rx.has_changed().unwrap());
        assert_eq!(adapter.state(), UiState::Success("fresh".to_string()));
    }

    #[tokio::test]
    async fn superseded_publisher_is_ignored() {
        let (client, _gate) = GatedClient::one_shot();
        let adapter = RequestAdapter::new(Arc::new(client));

        let (old, old_token) = adapter.begin_call().unwrap();
        let (new, _) = adapter.begin_call().unwrap();
        assert!(old_token.is_cancelled());

        assert!(!old.publish(UiState::Success("stale".to_string())));
        assert!(new.publish(UiState::Success("fresh".to_string())));
        assert_eq!(adapter.state(), UiState::Success("fresh".to_string()));
    }

    #[tokio::test]
    async fn cancel_silences_a_call_that_already_has_its_answer() {
        let (client, _gate) = GatedClient::one_shot();
        let adapter = RequestAdapter::new(Arc::new(client));

        let (publisher, _token) = adapter.begin_call().unwrap();
        adapter.cancel();
        assert!(!publisher.publish(UiState::Success("late".to_string())));
        assert_eq!(adapter.state(), UiState::Loading);
    }

    #[tokio::test]
    async fn overlapping_calls_only_publish_well_formed_states() {
        let mut client = MockModelClient::new();
        client.expect_generate_stream().returning(|_| {
            Ok(futures::stream::iter(vec![text("x"), text("y"), text("z")]).boxed())
        });
        client.expect_generate().returning(|_| text("one-shot"));
        let adapter = RequestAdapter::new(Arc::new(client));
        let mut rx = adapter.subscribe();

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while timeout(Duration::from_millis(200), rx.changed())
                .await
                .is_ok_and(|r| r.is_ok())
            {
                seen.push(rx.borrow_and_update().clone());
            }
            seen
        });

        let a = adapter.submit_streaming("a");
        let b = adapter.submit("b");
        let c = adapter.submit_streaming("c");
        let _ = tokio::join!(a, b, c);

        for state in observer.await.unwrap() {
            match state {
                UiState::Loading => {}
                UiState::Success(text) => {
                    assert!(["x", "xy", "xyz", "one-shot"].contains(&text.as_str()))
                }
                other => panic!("unexpected state {other:?}"),
            }
        }
        // The last call wins
        assert_eq!(adapter.state(), UiState::Success("xyz".to_string()));
    }
}
