//! Ordered, deduplicated candidate lists for text and image model requests.

use std::collections::HashSet;

use relay_ai::ModelRef;

use crate::config::{AgentModelConfig, GatewayConfig};
use crate::model_selection::{
    build_configured_allowlist_keys, resolve_configured_image_model_ref,
    resolve_configured_model_ref, resolve_model_ref_from_string, ModelAliasIndex, ModelCandidate,
};

/// Accumulates candidates, rejecting duplicate identity keys.
pub struct CandidateCollector {
    allowlist: Option<HashSet<String>>,
    seen: HashSet<String>,
    candidates: Vec<ModelCandidate>,
}

impl CandidateCollector {
    pub fn new(allowlist: Option<HashSet<String>>) -> Self {
        Self {
            allowlist,
            seen: HashSet::new(),
            candidates: Vec::new(),
        }
    }

    fn add(&mut self, candidate: ModelCandidate, enforce_allowlist: bool) -> bool {
        if candidate.provider.is_empty() || candidate.model.is_empty() {
            return false;
        }
        let key = candidate.key();
        if self.seen.contains(&key) {
            return false;
        }
        if enforce_allowlist {
            if let Some(allowlist) = &self.allowlist {
                if !allowlist.contains(&key) {
                    return false;
                }
            }
        }
        self.seen.insert(key);
        self.candidates.push(candidate);
        true
    }

    /// Adds user/config intent; never filtered by the allow-list.
    pub fn add_explicit_candidate(&mut self, candidate: ModelCandidate) -> bool {
        self.add(candidate, false)
    }

    /// Adds a candidate only when no allow-list is set or it contains the key.
    pub fn add_allowlisted_candidate(&mut self, candidate: ModelCandidate) -> bool {
        self.add(candidate, true)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<ModelCandidate> {
        self.candidates
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Explicit per-request model selection.
pub struct TextCandidateRequest<'a> {
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    /// Replaces the configured fallback chain entirely, even when empty.
    pub fallbacks_override: Option<&'a [String]>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Builds the text-model candidate chain: effective primary, then the
/// fallback source, then the configured primary as last resort.
pub fn resolve_fallback_candidates(
    config: Option<&GatewayConfig>,
    request: &TextCandidateRequest<'_>,
) -> Vec<ModelCandidate> {
    let empty = GatewayConfig::default();
    let config = config.unwrap_or(&empty);
    let configured_primary = resolve_configured_model_ref(config);
    let default_provider = configured_primary.provider.clone();

    let effective_primary = ModelRef::new(
        non_blank(request.provider).unwrap_or(configured_primary.provider.as_str()),
        non_blank(request.model).unwrap_or(configured_primary.model.as_str()),
    );
    let alias_index = ModelAliasIndex::build(config, &default_provider);
    let mut collector =
        CandidateCollector::new(build_configured_allowlist_keys(config, &default_provider));
    collector.add_explicit_candidate(effective_primary.clone());

    let configured_fallbacks = config
        .text_model()
        .map(AgentModelConfig::fallbacks)
        .unwrap_or(&[]);
    let fallback_source: &[String] = match request.fallbacks_override {
        Some(fallbacks) => fallbacks,
        None if effective_primary.same_model(&configured_primary) => configured_fallbacks,
        None => {
            let running_on_fallback = configured_fallbacks.iter().any(|raw| {
                resolve_model_ref_from_string(raw, &default_provider, &alias_index)
                    .is_some_and(|resolved| resolved.model_ref.same_model(&effective_primary))
            });
            if running_on_fallback {
                configured_fallbacks
            } else {
                &[]
            }
        }
    };

    for raw in fallback_source {
        if let Some(resolved) = resolve_model_ref_from_string(raw, &default_provider, &alias_index)
        {
            collector.add_explicit_candidate(resolved.model_ref);
        }
    }

    if request.fallbacks_override.is_none() {
        collector.add_explicit_candidate(configured_primary);
    }

    let candidates = collector.into_candidates();
    tracing::debug!(
        primary = %effective_primary,
        candidates = candidates.len(),
        fallbacks_overridden = request.fallbacks_override.is_some(),
        "resolved model fallback candidates"
    );
    candidates
}

/// Builds the image-model candidate chain: override or configured image
/// primary, then every configured image fallback.
pub fn resolve_image_fallback_candidates(
    config: Option<&GatewayConfig>,
    model_override: Option<&str>,
) -> Vec<ModelCandidate> {
    let empty = GatewayConfig::default();
    let config = config.unwrap_or(&empty);
    let default_provider = resolve_configured_model_ref(config).provider;
    let alias_index = ModelAliasIndex::build(config, &default_provider);
    let mut collector =
        CandidateCollector::new(build_configured_allowlist_keys(config, &default_provider));
    let resolve_raw = |raw: &str| {
        resolve_model_ref_from_string(raw, &default_provider, &alias_index)
            .map(|resolved| resolved.model_ref)
    };

    let primary = match non_blank(model_override) {
        Some(model_override) => resolve_raw(model_override),
        None => resolve_configured_image_model_ref(config, &default_provider),
    };
    if let Some(primary) = primary {
        collector.add_explicit_candidate(primary);
    }
    let fallbacks = config
        .image_model()
        .map(AgentModelConfig::fallbacks)
        .unwrap_or(&[]);
    for candidate in fallbacks.iter().filter_map(|raw| resolve_raw(raw)) {
        collector.add_explicit_candidate(candidate);
    }

    collector.into_candidates()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentModelEntryConfig;

    fn keys(candidates: &[ModelCandidate]) -> Vec<String> {
        candidates.iter().map(ModelRef::key).collect()
    }

    fn text_config(primary: &str, fallbacks: &[&str]) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.agents.defaults.model = Some(AgentModelConfig::Detailed {
            primary: Some(primary.to_string()),
            fallbacks: fallbacks.iter().map(|value| value.to_string()).collect(),
        });
        config
    }

    #[test]
    fn unit_configured_primary_uses_configured_fallback_chain() {
        let config = text_config(
            "anthropic/claude-opus-4-6",
            &["openai/gpt-4o", "google/gemini-2.5-pro"],
        );
        let candidates =
            resolve_fallback_candidates(Some(&config), &TextCandidateRequest::default());
        assert_eq!(
            keys(&candidates),
            vec![
                "anthropic/claude-opus-4-6",
                "openai/gpt-4o",
                "google/gemini-2.5-pro"
            ]
        );
    }

    #[test]
    fn functional_explicit_primary_outside_chain_gets_only_configured_primary() {
        let config = text_config("anthropic/claude-opus-4-6", &["openai/gpt-4o"]);
        let request = TextCandidateRequest {
            provider: Some("groq"),
            model: Some("llama-3.3-70b"),
            ..TextCandidateRequest::default()
        };
        let candidates = resolve_fallback_candidates(Some(&config), &request);
        assert_eq!(
            keys(&candidates),
            vec!["groq/llama-3.3-70b", "anthropic/claude-opus-4-6"]
        );
    }

    #[test]
    fn regression_running_on_configured_fallback_keeps_chain_traversable() {
        let config = text_config(
            "anthropic/claude-opus-4-6",
            &["openai/gpt-4o", "google/gemini-2.5-pro"],
        );
        let request = TextCandidateRequest {
            provider: Some("openai"),
            model: Some("gpt-4o"),
            ..TextCandidateRequest::default()
        };
        let candidates = resolve_fallback_candidates(Some(&config), &request);
        assert_eq!(
            keys(&candidates),
            vec![
                "openai/gpt-4o",
                "google/gemini-2.5-pro",
                "anthropic/claude-opus-4-6"
            ]
        );
    }

    #[test]
    fn functional_fallbacks_override_replaces_chain_and_drops_last_resort() {
        let config = text_config("anthropic/claude-opus-4-6", &["openai/gpt-4o"]);
        let override_chain = vec!["google/gemini-2.5-pro".to_string()];
        let request = TextCandidateRequest {
            provider: Some("openai"),
            model: Some("gpt-4o-mini"),
            fallbacks_override: Some(&override_chain),
        };
        let candidates = resolve_fallback_candidates(Some(&config), &request);
        assert_eq!(
            keys(&candidates),
            vec!["openai/gpt-4o-mini", "google/gemini-2.5-pro"]
        );

        let empty_override: Vec<String> = Vec::new();
        let request = TextCandidateRequest {
            fallbacks_override: Some(&empty_override),
            ..TextCandidateRequest::default()
        };
        let candidates = resolve_fallback_candidates(Some(&config), &request);
        assert_eq!(keys(&candidates), vec!["anthropic/claude-opus-4-6"]);
    }

    #[test]
    fn unit_candidates_never_repeat_identity_keys() {
        let config = text_config(
            "anthropic/claude-opus-4-6",
            &[
                "OpenAI/GPT-4o",
                "openai/gpt-4o",
                "anthropic/opus-4.6",
                "  ",
                "gpt",
            ],
        );
        let mut config = config;
        config.agents.defaults.models.insert(
            "openai/gpt-4o".to_string(),
            AgentModelEntryConfig {
                alias: Some("gpt".to_string()),
            },
        );
        let candidates =
            resolve_fallback_candidates(Some(&config), &TextCandidateRequest::default());
        let keys = keys(&candidates);
        let unique = keys.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(keys, vec!["anthropic/claude-opus-4-6", "openai/gpt-4o"]);
    }

    #[test]
    fn unit_fallbacks_bypass_allowlist() {
        let mut config = text_config("anthropic/claude-opus-4-6", &["openai/gpt-4o"]);
        config.agents.defaults.models.insert(
            "anthropic/claude-opus-4-6".to_string(),
            AgentModelEntryConfig::default(),
        );
        let candidates =
            resolve_fallback_candidates(Some(&config), &TextCandidateRequest::default());
        assert_eq!(
            keys(&candidates),
            vec!["anthropic/claude-opus-4-6", "openai/gpt-4o"]
        );
    }

    #[test]
    fn unit_allowlisted_candidates_are_filtered_by_allow_set() {
        let allowlist = ["openai/gpt-4o".to_string()].into_iter().collect();
        let mut collector = CandidateCollector::new(Some(allowlist));
        assert!(!collector.add_allowlisted_candidate(ModelRef::new("openai", "gpt-4o-mini")));
        assert!(collector.add_allowlisted_candidate(ModelRef::new("OpenAI", "GPT-4o")));
        assert!(!collector.add_allowlisted_candidate(ModelRef::new("openai", "gpt-4o")));
        assert!(collector.add_explicit_candidate(ModelRef::new("openai", "gpt-4o-mini")));
        assert_eq!(collector.len(), 2);

        let mut open = CandidateCollector::new(None);
        assert!(open.add_allowlisted_candidate(ModelRef::new("openai", "gpt-4o-mini")));
        assert!(!open.is_empty());
    }

    #[test]
    fn unit_no_config_yields_default_primary_only() {
        let candidates = resolve_fallback_candidates(None, &TextCandidateRequest::default());
        assert_eq!(
            keys(&candidates),
            vec![ModelRef::new(relay_ai::DEFAULT_PROVIDER, relay_ai::DEFAULT_MODEL).key()]
        );
    }

    #[test]
    fn functional_image_candidates_prefer_override_then_all_fallbacks() {
        let mut config = GatewayConfig::default();
        config.agents.defaults.image_model = Some(AgentModelConfig::Detailed {
            primary: Some("openai/gpt-image-1".to_string()),
            fallbacks: vec![
                "google/imagen-4".to_string(),
                "openai/gpt-image-1".to_string(),
            ],
        });
        config.agents.defaults.models.insert(
            "openai/gpt-4o".to_string(),
            AgentModelEntryConfig::default(),
        );

        let candidates = resolve_image_fallback_candidates(Some(&config), None);
        assert_eq!(
            keys(&candidates),
            vec!["openai/gpt-image-1", "google/imagen-4"]
        );

        let candidates = resolve_image_fallback_candidates(Some(&config), Some("xai/grok-2-image"));
        assert_eq!(
            keys(&candidates),
            vec!["xai/grok-2-image", "google/imagen-4", "openai/gpt-image-1"]
        );
    }

    #[test]
    fn unit_image_primary_resolves_through_alias_table() {
        let mut config = GatewayConfig::default();
        config.agents.defaults.image_model =
            Some(AgentModelConfig::Primary("painter".to_string()));
        config.agents.defaults.models.insert(
            "openai/gpt-image-1".to_string(),
            AgentModelEntryConfig {
                alias: Some("painter".to_string()),
            },
        );
        let candidates = resolve_image_fallback_candidates(Some(&config), None);
        assert_eq!(keys(&candidates), vec!["openai/gpt-image-1"]);
        assert_eq!(
            resolve_configured_image_model_ref(&config, "anthropic"),
            Some(ModelRef::new("openai", "gpt-image-1"))
        );
    }

    #[test]
    fn unit_image_candidates_empty_without_image_config() {
        assert!(resolve_image_fallback_candidates(None, None).is_empty());
        assert!(resolve_image_fallback_candidates(None, Some("  ")).is_empty());
    }
}
