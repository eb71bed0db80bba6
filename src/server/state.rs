//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::llm::ollama::{OllamaClient, PREFERRED_MODELS};

/// Environment variable that pins the model instead of auto-selecting one.
pub const MODEL_ENV: &str = "AURORA_MODEL";

/// Produces a reply for one prompt.
///
/// Implementations block; handlers call them from the blocking pool.
pub trait ReplyGenerator: Send + Sync {
    /// Generate reply text for `prompt`.
    ///
    /// # Errors
    /// Returns a human-readable description of the failure.
    fn generate(&self, prompt: &str) -> Result<String, String>;

    /// Name of the model answering requests.
    fn model(&self) -> &str;
}

/// Reply generator backed by a local Ollama server.
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    /// Wrap a client with a fixed model.
    #[must_use]
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl ReplyGenerator for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, String> {
        self.client
            .generate(&self.model, prompt)
            .map(|text| text.trim().to_string())
            .map_err(|e| e.to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Shared application state.
pub struct AppState {
    /// Generator answering `/api/chat`.
    pub generator: Arc<dyn ReplyGenerator>,
}

impl AppState {
    /// Create state around an existing generator.
    #[must_use]
    pub fn new(generator: Arc<dyn ReplyGenerator>) -> Arc<Self> {
        Arc::new(Self { generator })
    }

    /// Create state backed by Ollama.
    ///
    /// Uses `AURORA_MODEL` when set, otherwise the best installed model.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be created or no model is available.
    pub fn from_ollama() -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let client = OllamaClient::from_env()
            .map_err(|e| format!("Failed to create Ollama client: {e}"))?;
        tracing::info!("Ollama endpoint: {}", client.base_url());
        if !client.is_ready().unwrap_or(false) {
            return Err(format!("Ollama is not reachable at {}", client.base_url()).into());
        }

        let model = match std::env::var(MODEL_ENV) {
            Ok(name) if !name.trim().is_empty() => name,
            _ => client
                .select_model(PREFERRED_MODELS)
                .map_err(|e| format!("Failed to select a model: {e}"))?,
        };
        tracing::info!("Using model {model}");

        Ok(Self::new(Arc::new(OllamaGenerator::new(client, model))))
    }
}
