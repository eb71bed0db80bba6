//! Local model backends used by the reply server.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaError, PREFERRED_MODELS, pick_model};
