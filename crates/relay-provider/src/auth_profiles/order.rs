use indexmap::IndexMap;
use relay_ai::normalize_provider_id;

use super::store::AuthProfileStore;
use crate::config::{AuthConfig, AuthProfileConfig};

#[derive(Debug, Clone, Copy, Default)]
/// Configuration inputs for [`resolve_auth_profile_order`].
pub struct AuthProfileOrderInputs<'a> {
    /// `auth.order[provider]`.
    pub explicit_order: Option<&'a [String]>,
    /// `auth.profiles`, consulted only for drift detection.
    pub config_profiles: Option<&'a IndexMap<String, AuthProfileConfig>>,
    pub preferred_profile: Option<&'a str>,
}

impl<'a> AuthProfileOrderInputs<'a> {
    pub fn from_config(config: Option<&'a AuthConfig>, provider: &str) -> Self {
        Self {
            explicit_order: config.and_then(|config| config.explicit_order(provider)),
            config_profiles: config.map(|config| &config.profiles),
            preferred_profile: None,
        }
    }

    pub fn with_preferred_profile(mut self, preferred_profile: Option<&'a str>) -> Self {
        self.preferred_profile = preferred_profile;
        self
    }
}

fn valid_profiles_for_provider(
    store: &AuthProfileStore,
    provider: &str,
    now_unix_ms: u64,
) -> Vec<String> {
    store
        .profiles
        .iter()
        .filter(|(_, credential)| {
            credential.matches_provider(provider) && credential.is_usable_at(now_unix_ms)
        })
        .map(|(profile_id, _)| profile_id.clone())
        .collect()
}

/// Ordered, validity-filtered profile ids to try for `provider`.
///
/// Without an explicit order every valid profile for the provider is returned
/// in store order. With one, listed ids are kept only when stored for this
/// provider and valid. A listed id that is missing from the store but declared
/// for this provider in `auth.profiles` has drifted (for example an oauth
/// login re-issued under an account-derived id); the explicit order is then
/// discarded in favor of every valid stored profile. Cooldown is not applied
/// here. The preferred profile, when present in the result, moves to the front.
pub fn resolve_auth_profile_order(
    store: &AuthProfileStore,
    provider: &str,
    inputs: &AuthProfileOrderInputs<'_>,
    now_unix_ms: u64,
) -> Vec<String> {
    let provider = normalize_provider_id(provider);
    let mut order = match inputs.explicit_order {
        None => valid_profiles_for_provider(store, &provider, now_unix_ms),
        Some(explicit_order) => {
            let mut resolved: Vec<String> = Vec::new();
            let mut drifted_id = None;
            for profile_id in explicit_order {
                let profile_id = profile_id.trim();
                if profile_id.is_empty() {
                    continue;
                }
                match store.get(profile_id) {
                    Some(credential) => {
                        if credential.matches_provider(&provider)
                            && credential.is_usable_at(now_unix_ms)
                            && !resolved.iter().any(|existing| existing == profile_id)
                        {
                            resolved.push(profile_id.to_string());
                        }
                    }
                    None => {
                        let declared_for_provider = inputs
                            .config_profiles
                            .and_then(|profiles| profiles.get(profile_id))
                            .is_some_and(|declared| {
                                normalize_provider_id(&declared.provider) == provider
                            });
                        if declared_for_provider {
                            drifted_id = Some(profile_id);
                            break;
                        }
                    }
                }
            }
            match drifted_id {
                Some(drifted_id) => {
                    tracing::debug!(
                        provider = %provider,
                        profile = drifted_id,
                        "configured auth order references a drifted profile id; using stored profiles"
                    );
                    valid_profiles_for_provider(store, &provider, now_unix_ms)
                }
                None => resolved,
            }
        }
    };

    if let Some(preferred) = inputs
        .preferred_profile
        .map(str::trim)
        .filter(|preferred| !preferred.is_empty())
    {
        if let Some(position) = order.iter().position(|profile_id| profile_id == preferred) {
            let profile_id = order.remove(position);
            order.insert(0, profile_id);
        }
    }
    order
}
