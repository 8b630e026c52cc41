use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::client::GenerativeModel;
use crate::config::Config;
use crate::error::{GenerativeAiError, Result};
use crate::models::{FunctionType, GenerationConfig, Schema};
use crate::transport::{GeminiTransport, Transport};

/// The screens of the sample, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenKind {
    Summarize,
    StructuredOutput,
    PhotoReasoning,
    Chat,
}

impl ScreenKind {
    pub const ALL: [ScreenKind; 4] = [
        ScreenKind::Summarize,
        ScreenKind::StructuredOutput,
        ScreenKind::PhotoReasoning,
        ScreenKind::Chat,
    ];

    pub fn route(self) -> &'static str {
        match self {
            ScreenKind::Summarize => "summarize",
            ScreenKind::StructuredOutput => "structured_output",
            ScreenKind::PhotoReasoning => "photo_reasoning",
            ScreenKind::Chat => "chat",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ScreenKind::Summarize => "Summarize",
            ScreenKind::StructuredOutput => "Structured output",
            ScreenKind::PhotoReasoning => "Photo reasoning",
            ScreenKind::Chat => "Chat",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScreenKind::Summarize => "Sample app for summarizing text",
            ScreenKind::StructuredOutput => "Generate JSON that follows a response schema",
            ScreenKind::PhotoReasoning => "Sample app for reasoning about photos",
            ScreenKind::Chat => "Sample app for chat conversations",
        }
    }

    pub fn from_route(route: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.route() == route)
    }
}

impl fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route())
    }
}

impl FromStr for ScreenKind {
    type Err = GenerativeAiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_route(s)
            .ok_or_else(|| GenerativeAiError::Config(format!("Unknown screen: {s}")))
    }
}

/// Everything needed to build the model client for one screen kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelClientConfig {
    pub model_name: String,
    pub api_key: String,
    pub generation_config: GenerationConfig,
}

/// Schema for the structured output screen: a list of recipes, each with a
/// required `recipeName`.
pub fn recipe_list_schema() -> Schema {
    Schema::array_of(
        Schema::new(FunctionType::Object)
            .with_description("A recipe")
            .with_property(
                "recipeName",
                Schema::new(FunctionType::String)
                    .with_description("Name of the recipe")
                    .non_nullable(),
            )
            .with_required(&["recipeName"]),
    )
    .with_description("List of recipes")
}

/// Opens the transport a screen's client talks through, given that screen's config.
pub type Connector = Arc<dyn Fn(&ModelClientConfig) -> Arc<dyn Transport> + Send + Sync>;

/// Builds one configured model client per screen.
pub struct GenerativeModelFactory {
    config: Arc<Config>,
    connect: Connector,
}

impl GenerativeModelFactory {
    /// Factory whose clients all share `transport`.
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        Self::with_connector(config, Arc::new(move |_: &ModelClientConfig| Arc::clone(&transport)))
    }

    pub fn with_connector(config: Arc<Config>, connect: Connector) -> Self {
        Self { config, connect }
    }

    /// Factory talking to the real service over HTTP. Every client gets its own
    /// transport carrying its config's API key; the connection pool is shared.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        if !config.has_api_key() {
            return Err(GenerativeAiError::Config(
                "GEMINI_API_KEY environment variable must be set".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let base_url = config.api.base_url.clone();
        let connect: Connector = Arc::new(move |client_config: &ModelClientConfig| {
            Arc::new(GeminiTransport::with_client(
                http.clone(),
                client_config.api_key.clone(),
                base_url.clone(),
            )) as Arc<dyn Transport>
        });
        Ok(Self::with_connector(config, connect))
    }

    pub fn client_config(&self, kind: ScreenKind) -> ModelClientConfig {
        let generation_config = match kind {
            ScreenKind::Summarize | ScreenKind::PhotoReasoning | ScreenKind::Chat => {
                GenerationConfig {
                    temperature: Some(self.config.generation.temperature),
                    ..Default::default()
                }
            }
            ScreenKind::StructuredOutput => GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(recipe_list_schema()),
                ..Default::default()
            },
        };

        ModelClientConfig {
            model_name: self.config.generation.model_name.clone(),
            api_key: self.config.api.api_key.clone(),
            generation_config,
        }
    }

    pub fn create(&self, kind: ScreenKind) -> GenerativeModel {
        let client_config = self.client_config(kind);
        tracing::info!(
            screen = %kind,
            model = %client_config.model_name,
            "Creating model client"
        );
        GenerativeModel::new(
            (self.connect)(&client_config),
            client_config.model_name,
            client_config.generation_config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn factory() -> GenerativeModelFactory {
        let mut config = Config::default();
        config.api.api_key = "test-key".to_string();
        GenerativeModelFactory::new(Arc::new(config), Arc::new(MockTransport::new()))
    }

    #[test]
    fn routes_round_trip() {
        for kind in ScreenKind::ALL {
            assert_eq!(ScreenKind::from_route(kind.route()), Some(kind));
            assert_eq!(kind.to_string().parse::<ScreenKind>().unwrap(), kind);
        }
        assert!(ScreenKind::from_route("settings").is_none());
        assert!("menu".parse::<ScreenKind>().is_err());
    }

    #[test]
    fn free_form_screens_use_low_temperature() {
        let factory = factory();
        for kind in [ScreenKind::Summarize, ScreenKind::PhotoReasoning, ScreenKind::Chat] {
            let cfg = factory.client_config(kind);
            assert_eq!(cfg.model_name, "gemini-2.0-flash");
            assert_eq!(cfg.api_key, "test-key");
            assert_eq!(cfg.generation_config.temperature, Some(0.2));
            assert!(cfg.generation_config.response_schema.is_none());
        }
    }

    #[test]
    fn structured_output_constrains_to_recipe_json() {
        let cfg = factory().client_config(ScreenKind::StructuredOutput);
        assert_eq!(
            cfg.generation_config.response_mime_type.as_deref(),
            Some("application/json")
        );
        assert!(cfg.generation_config.temperature.is_none());

        let schema = cfg.generation_config.response_schema.unwrap();
        assert_eq!(schema.schema_type, FunctionType::Array);
        let item = schema.items.unwrap();
        assert_eq!(item.required, Some(vec!["recipeName".to_string()]));
        let properties = item.properties.unwrap();
        let name = &properties["recipeName"];
        assert_eq!(name.schema_type, FunctionType::String);
        assert_eq!(name.nullable, Some(false));
    }

    #[test]
    fn created_model_carries_config() {
        let model = factory().create(ScreenKind::StructuredOutput);
        assert_eq!(model.model_name(), "gemini-2.0-flash");
        assert!(model.generation_config().response_schema.is_some());
    }

    #[test]
    fn each_client_connects_with_its_own_config() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut config = Config::default();
        config.api.api_key = "screen-key".to_string();
        let factory = GenerativeModelFactory::with_connector(
            Arc::new(config),
            Arc::new(move |client_config: &ModelClientConfig| {
                recorder.lock().unwrap().push((
                    client_config.api_key.clone(),
                    client_config.generation_config.response_schema.is_some(),
                ));
                Arc::new(MockTransport::new()) as Arc<dyn Transport>
            }),
        );

        factory.create(ScreenKind::Summarize);
        factory.create(ScreenKind::StructuredOutput);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("screen-key".to_string(), false),
                ("screen-key".to_string(), true)
            ]
        );
    }

    #[test]
    fn from_config_builds_http_clients() {
        let mut config = Config::default();
        config.api.api_key = "test-key".to_string();
        let factory = GenerativeModelFactory::from_config(Arc::new(config)).unwrap();
        let model = factory.create(ScreenKind::Chat);
        assert_eq!(model.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn from_config_requires_api_key() {
        let err = GenerativeModelFactory::from_config(Arc::new(Config::default()))
            .err()
            .expect("placeholder key should be rejected");
        assert!(matches!(err, GenerativeAiError::Config(_)));
    }
}
