use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::RequestAdapter;
use crate::client::{GenerativeModel, ModelClient};
use crate::error::Result;
use crate::factory::{GenerativeModelFactory, ScreenKind};
use crate::models::Recipe;
use crate::state::UiState;

/// Structured output screen. The model is constrained to the recipe schema;
/// the screen passes the raw JSON text through without validating it.
pub struct StructuredOutputScreen<C: ModelClient = GenerativeModel> {
    adapter: RequestAdapter<C>,
}

impl StructuredOutputScreen<GenerativeModel> {
    pub fn open(factory: &GenerativeModelFactory) -> Self {
        Self::new(Arc::new(factory.create(ScreenKind::StructuredOutput)))
    }
}

impl<C: ModelClient> StructuredOutputScreen<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            adapter: RequestAdapter::new(client),
        }
    }

    pub fn structured_output(&self, prompt: &str) -> JoinHandle<()> {
        self.adapter.submit(prompt)
    }

    pub fn structured_output_streaming(&self, prompt: &str) -> JoinHandle<()> {
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

/// Consumer-side validation of the screen's output against the recipe schema.
pub fn parse_recipes(json: &str) -> Result<Vec<Recipe>> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockModelClient;
    use crate::error::GenerativeAiError;
    use crate::models::GenerateContentResponse;

    const RECIPES: &str = r#"[{"recipeName":"Chocolate Chip Cookies"},{"recipeName":"Oatmeal Raisin"}]"#;

    #[tokio::test]
    async fn one_shot_passes_prompt_and_json_through() {
        let mut client = MockModelClient::new();
        client.expect_generate().times(1).returning(|prompt| {
            assert_eq!(prompt.text, "List a few popular cookie recipes.");
            Ok(GenerateContentResponse::from_text(RECIPES))
        });

        let screen = StructuredOutputScreen::new(Arc::new(client));
        screen
            .structured_output("List a few popular cookie recipes.")
            .await
            .unwrap();

        let state = screen.state();
        let recipes = parse_recipes(state.output().expect("success")).unwrap();
        assert_eq!(recipes.len(), 2);
        assert_eq!(recipes[0].recipe_name, "Chocolate Chip Cookies");
    }

    #[tokio::test]
    async fn malformed_output_is_still_published() {
        let mut client = MockModelClient::new();
        client
            .expect_generate()
            .returning(|_| Ok(GenerateContentResponse::from_text("[{\"name\":1}]")));

        let screen = StructuredOutputScreen::new(Arc::new(client));
        screen.structured_output("anything").await.unwrap();

        let state = screen.state();
        assert_eq!(state.output(), Some("[{\"name\":1}]"));
        assert!(matches!(
            parse_recipes(state.output().unwrap()),
            Err(GenerativeAiError::Serialization(_))
        ));
    }
}
