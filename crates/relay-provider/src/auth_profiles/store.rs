use std::{collections::BTreeMap, fmt, path::Path};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use relay_ai::normalize_provider_id;
use relay_core::{is_expired_unix_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

use super::external::{sync_external_credentials, AuthStoreLoadOptions};
use crate::config::AuthProfileMode;
use crate::failover_error::FailoverReason;

pub const AUTH_PROFILE_STORE_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// One stored credential. Secrets never appear in `Debug` output.
pub enum AuthProfileCredential {
    ApiKey {
        provider: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
    Token {
        provider: String,
        token: String,
        /// Unix milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
    Oauth {
        provider: String,
        #[serde(default)]
        access: String,
        #[serde(default)]
        refresh: String,
        /// Unix milliseconds; applies to `access`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl AuthProfileCredential {
    pub fn api_key(provider: impl Into<String>, key: impl Into<String>) -> Self {
        AuthProfileCredential::ApiKey {
            provider: provider.into(),
            key: key.into(),
            email: None,
        }
    }

    pub fn token(provider: impl Into<String>, token: impl Into<String>, expires: Option<u64>) -> Self {
        AuthProfileCredential::Token {
            provider: provider.into(),
            token: token.into(),
            expires,
            email: None,
        }
    }

    pub fn oauth(
        provider: impl Into<String>,
        access: impl Into<String>,
        refresh: impl Into<String>,
        expires: Option<u64>,
    ) -> Self {
        AuthProfileCredential::Oauth {
            provider: provider.into(),
            access: access.into(),
            refresh: refresh.into(),
            expires,
            email: None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            AuthProfileCredential::ApiKey { provider, .. }
            | AuthProfileCredential::Token { provider, .. }
            | AuthProfileCredential::Oauth { provider, .. } => provider,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            AuthProfileCredential::ApiKey { email, .. }
            | AuthProfileCredential::Token { email, .. }
            | AuthProfileCredential::Oauth { email, .. } => email.as_deref(),
        }
    }

    pub fn kind(&self) -> AuthProfileMode {
        match self {
            AuthProfileCredential::ApiKey { .. } => AuthProfileMode::ApiKey,
            AuthProfileCredential::Token { .. } => AuthProfileMode::Token,
            AuthProfileCredential::Oauth { .. } => AuthProfileMode::Oauth,
        }
    }

    pub fn matches_provider(&self, provider: &str) -> bool {
        normalize_provider_id(self.provider()) == normalize_provider_id(provider)
    }

    /// Whether the credential can back a call at `now_unix_ms`. A non-empty
    /// oauth refresh token keeps the profile usable after access expiry.
    pub fn is_usable_at(&self, now_unix_ms: u64) -> bool {
        match self {
            AuthProfileCredential::ApiKey { key, .. } => !is_blank(key),
            AuthProfileCredential::Token { token, expires, .. } => {
                !is_blank(token) && !is_expired_unix_ms(*expires, now_unix_ms)
            }
            AuthProfileCredential::Oauth {
                access,
                refresh,
                expires,
                ..
            } => {
                !is_blank(refresh)
                    || (!is_blank(access) && !is_expired_unix_ms(*expires, now_unix_ms))
            }
        }
    }
}

impl fmt::Debug for AuthProfileCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("AuthProfileCredential");
        debug
            .field("type", &self.kind())
            .field("provider", &self.provider())
            .field("secret", &"[REDACTED]");
        match self {
            AuthProfileCredential::Token { expires, .. }
            | AuthProfileCredential::Oauth { expires, .. } => {
                debug.field("expires", expires);
            }
            AuthProfileCredential::ApiKey { .. } => {}
        }
        debug.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Cooldown and failure bookkeeping for one profile. Times are unix ms.
pub struct ProfileUsageStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<FailoverReason>,
    /// Failure counts keyed by reason wire name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_counts: BTreeMap<String, u32>,
}

impl ProfileUsageStats {
    pub fn failure_count(&self, reason: FailoverReason) -> u32 {
        self.failure_counts
            .get(reason.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn record_failure(&mut self, reason: FailoverReason) {
        let count = self
            .failure_counts
            .entry(reason.as_str().to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Public struct `AuthProfileStore` used across relay components.
pub struct AuthProfileStore {
    pub version: u32,
    #[serde(default)]
    pub profiles: IndexMap<String, AuthProfileCredential>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub usage_stats: IndexMap<String, ProfileUsageStats>,
}

impl Default for AuthProfileStore {
    fn default() -> Self {
        Self {
            version: AUTH_PROFILE_STORE_VERSION,
            profiles: IndexMap::new(),
            usage_stats: IndexMap::new(),
        }
    }
}

impl AuthProfileStore {
    pub fn get(&self, profile_id: &str) -> Option<&AuthProfileCredential> {
        self.profiles.get(profile_id)
    }

    /// Inserts or replaces a profile, keeping its original position on replace.
    pub fn upsert(
        &mut self,
        profile_id: impl Into<String>,
        credential: AuthProfileCredential,
    ) -> Option<AuthProfileCredential> {
        self.profiles.insert(profile_id.into(), credential)
    }

    pub fn usage(&self, profile_id: &str) -> Option<&ProfileUsageStats> {
        self.usage_stats.get(profile_id)
    }

    /// Profile ids stored for `provider`, in store order, valid or not.
    pub fn profile_ids_for_provider(&self, provider: &str) -> Vec<String> {
        self.profiles
            .iter()
            .filter(|(_, credential)| credential.matches_provider(provider))
            .map(|(profile_id, _)| profile_id.clone())
            .collect()
    }
}

/// Reads the store at `path`; a missing file yields an empty store.
pub fn load_auth_profile_store(path: &Path) -> Result<AuthProfileStore> {
    if !path.exists() {
        return Ok(AuthProfileStore::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read auth profile store {}", path.display()))?;
    let store = serde_json::from_str::<AuthProfileStore>(&raw)
        .with_context(|| format!("failed to parse auth profile store {}", path.display()))?;
    if store.version != AUTH_PROFILE_STORE_VERSION {
        bail!(
            "unsupported auth profile store version {} in {} (expected {})",
            store.version,
            path.display(),
            AUTH_PROFILE_STORE_VERSION
        );
    }
    Ok(store)
}

pub fn save_auth_profile_store(path: &Path, store: &AuthProfileStore) -> Result<()> {
    let mut encoded =
        serde_json::to_string_pretty(store).context("failed to encode auth profile store")?;
    encoded.push('\n');
    write_text_atomic(path, &encoded)
}

/// Loads the store, creating it when absent, and syncs external credential
/// sources into it. The file is rewritten only when something changed.
pub fn ensure_auth_profile_store(
    path: &Path,
    options: &AuthStoreLoadOptions,
) -> Result<AuthProfileStore> {
    let existed = path.exists();
    let mut store = load_auth_profile_store(path)?;
    let synced = sync_external_credentials(&mut store, options);
    if !existed || synced > 0 {
        save_auth_profile_store(path, &store)?;
    }
    tracing::debug!(
        store = %path.display(),
        profiles = store.profiles.len(),
        synced,
        created = !existed,
        "auth profile store ready"
    );
    Ok(store)
}

/// Store loading for the request path. Sources are synced with keychain
/// prompts disabled whatever `options` asks for.
pub fn load_auth_profile_store_for_failover(
    path: &Path,
    options: &AuthStoreLoadOptions,
) -> Result<AuthProfileStore> {
    let options = AuthStoreLoadOptions {
        allow_keychain_prompt: false,
        sources: options.sources.clone(),
    };
    ensure_auth_profile_store(path, &options)
}
