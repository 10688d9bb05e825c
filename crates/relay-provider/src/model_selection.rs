//! Model reference resolution: alias index, allow-list, and configured primary.

use std::collections::{HashMap, HashSet};

use relay_ai::{model_key, ModelRef, DEFAULT_MODEL, DEFAULT_PROVIDER};

use crate::config::{AgentModelConfig, GatewayConfig};

/// A `{provider, model}` pair eligible to be tried for one request.
pub type ModelCandidate = ModelRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModelRef {
    pub model_ref: ModelRef,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default)]
/// Per-request lookup from short alias names to full model references.
pub struct ModelAliasIndex {
    by_alias: HashMap<String, (String, ModelRef)>,
    by_key: HashMap<String, Vec<String>>,
}

fn normalize_alias_key(alias: &str) -> String {
    alias.trim().to_ascii_lowercase()
}

impl ModelAliasIndex {
    pub fn build(config: &GatewayConfig, default_provider: &str) -> Self {
        let mut index = Self::default();
        for (raw_key, entry) in &config.agents.defaults.models {
            let Ok(model_ref) = ModelRef::parse_with_default(raw_key, default_provider) else {
                continue;
            };
            let Some(alias) = entry
                .alias
                .as_deref()
                .map(str::trim)
                .filter(|alias| !alias.is_empty())
            else {
                continue;
            };
            index
                .by_key
                .entry(model_ref.key())
                .or_default()
                .push(alias.to_string());
            index
                .by_alias
                .insert(normalize_alias_key(alias), (alias.to_string(), model_ref));
        }
        index
    }

    pub fn aliases_for(&self, model_ref: &ModelRef) -> &[String] {
        self.by_key
            .get(&model_ref.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Resolves a raw `provider/model` or alias string. Blank or malformed input
/// yields `None`; callers skip such entries silently.
pub fn resolve_model_ref_from_string(
    raw: &str,
    default_provider: &str,
    alias_index: &ModelAliasIndex,
) -> Option<ResolvedModelRef> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some((alias, model_ref)) = alias_index.by_alias.get(&normalize_alias_key(trimmed)) {
        return Some(ResolvedModelRef {
            model_ref: model_ref.clone(),
            alias: Some(alias.clone()),
        });
    }
    ModelRef::parse_with_default(trimmed, default_provider)
        .ok()
        .map(|model_ref| ResolvedModelRef {
            model_ref,
            alias: None,
        })
}

/// Identity keys of `agents.defaults.models`, or `None` when no catalog is
/// configured (no allow-list in force).
pub fn build_configured_allowlist_keys(
    config: &GatewayConfig,
    default_provider: &str,
) -> Option<HashSet<String>> {
    let keys = config
        .agents
        .defaults
        .models
        .keys()
        .filter_map(|raw| ModelRef::parse_with_default(raw, default_provider).ok())
        .map(|model_ref| model_ref.key())
        .collect::<HashSet<_>>();
    if keys.is_empty() {
        None
    } else {
        Some(keys)
    }
}

fn resolve_primary_from(
    model_config: Option<&AgentModelConfig>,
    config: &GatewayConfig,
    default_provider: &str,
) -> Option<ModelRef> {
    let raw = model_config.and_then(AgentModelConfig::primary)?;
    let alias_index = ModelAliasIndex::build(config, default_provider);
    resolve_model_ref_from_string(raw, default_provider, &alias_index)
        .map(|resolved| resolved.model_ref)
}

/// The globally configured text primary, or the built-in default.
pub fn resolve_configured_model_ref(config: &GatewayConfig) -> ModelRef {
    match resolve_primary_from(config.text_model(), config, DEFAULT_PROVIDER) {
        Some(model_ref) => model_ref,
        None => {
            if config.text_model().is_some() {
                tracing::debug!(
                    default_model = %model_key(DEFAULT_PROVIDER, DEFAULT_MODEL),
                    "configured primary model is blank or malformed; using default"
                );
            }
            ModelRef::new(DEFAULT_PROVIDER, DEFAULT_MODEL)
        }
    }
}

/// The configured image primary, if any.
pub fn resolve_configured_image_model_ref(
    config: &GatewayConfig,
    default_provider: &str,
) -> Option<ModelRef> {
    resolve_primary_from(config.image_model(), config, default_provider)
}
