use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::adapter::RequestAdapter;
use crate::client::ChatSession;
use crate::factory::{GenerativeModelFactory, ScreenKind};
use crate::models::{Content, Role};
use crate::state::UiState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    User,
    Model,
    Error,
}

/// One line of the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub participant: Participant,
    pub is_pending: bool,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, participant: Participant, is_pending: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            participant,
            is_pending,
        }
    }
}

/// Conversation the chat screen opens with.
pub fn initial_history() -> Vec<Content> {
    vec![
        Content::user("Hello, I have 2 dogs in my house."),
        Content::model("Great to meet you. What would you like to know?"),
    ]
}

type Transcript = Arc<Mutex<Vec<ChatMessage>>>;

fn lock(transcript: &Mutex<Vec<ChatMessage>>) -> MutexGuard<'_, Vec<ChatMessage>> {
    transcript.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Chat screen: streams each reply through a `ChatSession` and mirrors the
/// adapter's state into a message transcript. One message is in flight at a time.
pub struct ChatScreen {
    adapter: RequestAdapter<ChatSession>,
    transcript: Transcript,
}

impl ChatScreen {
    pub fn open(factory: &GenerativeModelFactory) -> Self {
        let session = factory.create(ScreenKind::Chat).start_chat(initial_history());
        Self::new(Arc::new(session))
    }

    pub fn new(session: Arc<ChatSession>) -> Self {
        let transcript: Vec<ChatMessage> = session
            .history()
            .iter()
            .filter_map(|content| {
                let participant = match content.role {
                    Some(Role::Model) => Participant::Model,
                    _ => Participant::User,
                };
                content
                    .text()
                    .map(|text| ChatMessage::new(text, participant, false))
            })
            .collect();

        Self {
            adapter: RequestAdapter::new(session),
            transcript: Arc::new(Mutex::new(transcript)),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.transcript).clone()
    }

    pub fn session(&self) -> &Arc<ChatSession> {
        self.adapter.client()
    }

    /// Send `text` and stream the reply into the transcript. Returns `None` while
    /// a previous reply is still pending or once the screen is closed.
    pub fn send_message(&self, text: &str) -> Option<JoinHandle<()>> {
        if self.adapter.is_cancelled() {
            tracing::warn!("Ignoring chat message on a closed screen");
            return None;
        }
        let user = ChatMessage::new(text, Participant::User, false);
        let pending = ChatMessage::new("", Participant::Model, true);
        let (user_id, pending_id) = (user.id.clone(), pending.id.clone());
        {
            let mut transcript = lock(&self.transcript);
            if transcript.iter().any(|m| m.is_pending) {
                tracing::warn!("Ignoring chat message while a reply is pending");
                return None;
            }
            transcript.push(user);
            transcript.push(pending);
        }

        // Subscribed before the call starts, so every state after its `Loading` is ours
        let mut rx = self.adapter.subscribe();
        let Some(mut call) = self.adapter.start_streaming(text) else {
            // Closed in between: the exchange never happened
            lock(&self.transcript).retain(|m| m.id != user_id && m.id != pending_id);
            return None;
        };
        rx.borrow_and_update();
        let transcript = Arc::clone(&self.transcript);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = rx.borrow_and_update().clone();
                        if let UiState::Success(partial) = state {
                            update_pending(&transcript, &pending_id, partial);
                        }
                    }
                    _ = &mut call => break,
                }
            }
            let settled = rx.borrow().clone();
            settle_pending(&transcript, &pending_id, settled);
        }))
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

fn update_pending(transcript: &Mutex<Vec<ChatMessage>>, id: &str, text: String) {
    if let Some(message) = lock(transcript).iter_mut().find(|m| m.id == id) {
        message.text = text;
    }
}

fn settle_pending(transcript: &Mutex<Vec<ChatMessage>>, id: &str, state: UiState) {
    let mut transcript = lock(transcript);
    let Some(index) = transcript.iter().position(|m| m.id == id) else {
        return;
    };
    match state {
        // A reply with no text is not recorded by the session; say so instead
        UiState::Success(text) if text.is_empty() => {
            transcript.remove(index);
            transcript.push(ChatMessage::new(
                "response contained no text",
                Participant::Error,
                false,
            ));
        }
        UiState::Success(text) => {
            let message = &mut transcript[index];
            message.text = text;
            message.is_pending = false;
        }
        UiState::Error(error) => {
            transcript.remove(index);
            transcript.push(ChatMessage::new(error, Participant::Error, false));
        }
        // Cancelled before any output
        UiState::Initial | UiState::Loading => {
            transcript.remove(index);
        }
    }
}
