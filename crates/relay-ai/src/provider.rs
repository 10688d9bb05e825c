use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-opus-4-6";

const PROVIDER_ALIASES: &[(&str, &str)] = &[
    ("z.ai", "zai"),
    ("z-ai", "zai"),
    ("opencode-zen", "opencode"),
    ("qwen", "qwen-portal"),
    ("kimi-code", "kimi-coding"),
];

const ANTHROPIC_MODEL_ALIASES: &[(&str, &str)] = &[
    ("opus-4.6", "claude-opus-4-6"),
    ("opus-4.5", "claude-opus-4-5"),
    ("sonnet-4.5", "claude-sonnet-4-5"),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelRefParseError {
    #[error("missing model identifier")]
    MissingModel,
    #[error("missing provider before '/' in '{0}'")]
    MissingProvider(String),
}

/// Canonical provider id: trimmed, lowercased, with legacy aliases folded.
pub fn normalize_provider_id(provider: &str) -> String {
    let normalized = provider.trim().to_ascii_lowercase();
    PROVIDER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

/// Case-insensitive identity key for a provider/model pair.
pub fn model_key(provider: &str, model: &str) -> String {
    format!("{}/{}", provider.trim(), model.trim()).to_ascii_lowercase()
}

fn normalize_anthropic_model_id(model: &str) -> String {
    let trimmed = model.trim();
    let lowered = trimmed.to_ascii_lowercase();
    ANTHROPIC_MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    /// Builds a normalized reference; provider aliases and Anthropic
    /// shorthand model ids are folded to their canonical forms.
    pub fn new(provider: &str, model: &str) -> Self {
        let provider = normalize_provider_id(provider);
        let model = if provider == "anthropic" {
            normalize_anthropic_model_id(model)
        } else {
            model.trim().to_string()
        };
        Self { provider, model }
    }

    /// Parses `provider/model`, or a bare model id under `default_provider`.
    /// Only the first `/` separates the provider; the model keeps the rest.
    pub fn parse_with_default(
        input: &str,
        default_provider: &str,
    ) -> Result<Self, ModelRefParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ModelRefParseError::MissingModel);
        }

        let Some((provider, model)) = trimmed.split_once('/') else {
            return Ok(Self::new(default_provider, trimmed));
        };
        let provider = provider.trim();
        let model = model.trim();
        if provider.is_empty() {
            return Err(ModelRefParseError::MissingProvider(trimmed.to_string()));
        }
        if model.is_empty() {
            return Err(ModelRefParseError::MissingModel);
        }
        Ok(Self::new(provider, model))
    }

    pub fn parse(input: &str) -> Result<Self, ModelRefParseError> {
        Self::parse_with_default(input, DEFAULT_PROVIDER)
    }

    pub fn key(&self) -> String {
        model_key(&self.provider, &self.model)
    }

    pub fn same_model(&self, other: &ModelRef) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
