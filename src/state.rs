/// Observable state of one screen.
///
/// Transitions are `Initial -> Loading -> (Success | Error)`; every new call
/// restarts at `Loading`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UiState {
    /// No request issued yet
    #[default]
    Initial,
    /// A request is in flight
    Loading,
    /// Output text so far. For streaming calls this is the running concatenation
    /// of every chunk received.
    Success(String),
    /// Human-readable failure description
    Error(String),
}

impl UiState {
    pub fn is_loading(&self) -> bool {
        matches!(self, UiState::Loading)
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            UiState::Success(text) => Some(text),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            UiState::Error(message) => Some(message),
            _ => None,
        }
    }
}
