//! Read-only gateway configuration consumed by the failover engine.
//!
//! Mirrors the `agents.defaults.*` and `auth.*` sections of the gateway
//! config file. Only the fields the failover path reads are modeled; unknown
//! keys are ignored so the full gateway file can be passed in unchanged.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use relay_ai::normalize_provider_id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Public struct `GatewayConfig` used across relay components.
pub struct GatewayConfig {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaultsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaultsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<AgentModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_model: Option<AgentModelConfig>,
    /// Model catalog keyed by `provider/model`; keys double as the allow-list.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub models: IndexMap<String, AgentModelEntryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
/// A model setting written either as a bare primary or as `{primary, fallbacks}`.
pub enum AgentModelConfig {
    Primary(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fallbacks: Vec<String>,
    },
}

impl AgentModelConfig {
    pub fn primary(&self) -> Option<&str> {
        let raw = match self {
            AgentModelConfig::Primary(primary) => Some(primary.as_str()),
            AgentModelConfig::Detailed { primary, .. } => primary.as_deref(),
        };
        raw.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn fallbacks(&self) -> &[String] {
        match self {
            AgentModelConfig::Primary(_) => &[],
            AgentModelConfig::Detailed { fallbacks, .. } => fallbacks,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentModelEntryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `AuthProfileMode` values.
pub enum AuthProfileMode {
    ApiKey,
    Oauth,
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Declared profile metadata; distinct from the credential store itself.
pub struct AuthProfileConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AuthProfileMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub profiles: IndexMap<String, AuthProfileConfig>,
}

impl AuthConfig {
    /// Explicit profile ordering for `provider`, matched on normalized ids.
    pub fn explicit_order(&self, provider: &str) -> Option<&[String]> {
        let provider = normalize_provider_id(provider);
        self.order
            .iter()
            .find(|(key, _)| normalize_provider_id(key) == provider)
            .map(|(_, order)| order.as_slice())
    }
}

impl GatewayConfig {
    pub fn text_model(&self) -> Option<&AgentModelConfig> {
        self.agents.defaults.model.as_ref()
    }

    pub fn image_model(&self) -> Option<&AgentModelConfig> {
        self.agents.defaults.image_model.as_ref()
    }
}

/// Loads a gateway config JSON file.
pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gateway config {}", path.display()))?;
    let config = serde_json::from_str::<GatewayConfig>(&raw)
        .with_context(|| format!("failed to parse gateway config {}", path.display()))?;
    tracing::debug!(
        config = %path.display(),
        configured_models = config.agents.defaults.models.len(),
        auth_order_providers = config.auth.order.len(),
        auth_profiles = config.auth.profiles.len(),
        "loaded gateway config"
    );
    Ok(config)
}
