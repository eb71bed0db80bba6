//! Blocking Ollama client used by the reply server.
//!
//! Behaviour:
//! - Check whether Ollama is reachable via `GET /api/version`.
//! - List installed models via `GET /api/tags` and pick one from a priority list.
//! - Generate non-streaming completions via `POST /api/generate`.
//!
//! The client is blocking; async callers run it on the blocking pool.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Environment variable for a custom Ollama URL (e.g. `http://10.0.0.5:11434`).
pub const OLLAMA_URL_ENV: &str = "AURORA_OLLAMA_URL";

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Models tried in order when no model is configured explicitly.
pub const PREFERRED_MODELS: &[&str] = &[
    "ministral-3:8b-instruct-2512-q8_0",
    "mistral:7b-instruct-q8_0",
    "llama3.1:8b",
    "llama3.2:latest",
];

/// Keep the model loaded in memory between requests.
const KEEP_ALIVE: &str = "1h";

/// Target context length (tokens).
const CONTEXT_LENGTH: u32 = 8_192;

/// Default token budget for generation.
const DEFAULT_NUM_PREDICT: u32 = 512;

/// HTTP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// HTTP client timeout for long-running generations.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced by the Ollama client.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// HTTP client error.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// HTTP response was not a success.
    #[error("ollama http status not ok: {0}")]
    HttpStatusNotOk(u16),
    /// The response did not carry the expected fields.
    #[error("ollama http response malformed")]
    HttpMalformedResponse,
    /// No installed model can serve generation requests.
    #[error("no ollama model is installed")]
    NoModels,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Blocking Ollama client.
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, OllamaError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CLIENT_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Create a client for the URL in `AURORA_OLLAMA_URL`, or the local default.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_env() -> Result<Self, OllamaError> {
        let base_url =
            std::env::var(OLLAMA_URL_ENV).unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        Self::new(base_url)
    }

    /// Base URL of the Ollama server.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the server answers `GET /api/version`.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent.
    pub fn is_ready(&self) -> Result<bool, OllamaError> {
        let url = format!("{}/api/version", self.base_url);
        let response = self.client.get(&url).send()?;
        Ok(response.status().is_success())
    }

    /// Names of the installed models.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response is malformed.
    pub fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::HttpStatusNotOk(status.as_u16()));
        }
        let tags = response
            .json::<TagsResponse>()
            .map_err(|_| OllamaError::HttpMalformedResponse)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Pick the best installed model from `preferred`.
    ///
    /// # Errors
    /// Returns `NoModels` if nothing is installed, or a request error.
    pub fn select_model(&self, preferred: &[&str]) -> Result<String, OllamaError> {
        let available = self.list_models()?;
        let model = pick_model(&available, preferred).ok_or(OllamaError::NoModels)?;
        info!(%model, available = available.len(), "selected ollama model");
        Ok(model)
    }

    /// Generate a completion for `prompt` and return the raw model output.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response is malformed.
    pub fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            keep_alive: KEEP_ALIVE,
            options: GenerateOptions {
                num_ctx: CONTEXT_LENGTH,
                num_predict: DEFAULT_NUM_PREDICT,
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::HttpStatusNotOk(status.as_u16()));
        }

        response
            .json::<GenerateResponse>()?
            .response
            .ok_or(OllamaError::HttpMalformedResponse)
    }
}

/// Choose a model: the first preferred name that is installed (exact name,
/// or the same name with a different tag), else the first installed model.
#[must_use]
pub fn pick_model(available: &[String], preferred: &[&str]) -> Option<String> {
    let base = |name: &str| name.split(':').next().unwrap_or(name).to_string();

    for wanted in preferred {
        if let Some(found) = available.iter().find(|name| name.as_str() == *wanted) {
            return Some(found.clone());
        }
    }
    for wanted in preferred {
        let wanted_base = base(wanted);
        if let Some(found) = available.iter().find(|name| base(name) == wanted_base) {
            return Some(found.clone());
        }
    }
    available.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_pick_model_prefers_priority_order() {
        let available = names(&["qwen2:7b", "llama3.2:latest", "mistral:7b-instruct-q8_0"]);
        assert_eq!(
            pick_model(&available, PREFERRED_MODELS).as_deref(),
            Some("mistral:7b-instruct-q8_0")
        );
    }

    #[test]
    fn test_pick_model_matches_other_tag() {
        let available = names(&["qwen2:7b", "llama3.1:70b"]);
        assert_eq!(
            pick_model(&available, PREFERRED_MODELS).as_deref(),
            Some("llama3.1:70b")
        );
    }

    #[test]
    fn test_pick_model_falls_back_to_first() {
        let available = names(&["qwen2:7b", "phi3:mini"]);
        assert_eq!(pick_model(&available, PREFERRED_MODELS).as_deref(), Some("qwen2:7b"));
        assert_eq!(pick_model(&[], PREFERRED_MODELS), None);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = OllamaClient::new("http://127.0.0.1:11434/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:11434");
    }
}
