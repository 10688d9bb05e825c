use std::{fmt, sync::Arc};

use anyhow::Result;
use relay_ai::normalize_provider_id;

use super::store::{AuthProfileCredential, AuthProfileStore};

/// Credentials managed outside the store (CLI logins, environment, keychain)
/// that are mirrored into it on load.
pub trait ExternalCredentialSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `(profile_id, credential)` pairs. Implementations must not
    /// prompt the user when `allow_keychain_prompt` is false.
    fn collect(&self, allow_keychain_prompt: bool) -> Result<Vec<(String, AuthProfileCredential)>>;
}

#[derive(Clone, Default)]
/// Public struct `AuthStoreLoadOptions` used across relay components.
pub struct AuthStoreLoadOptions {
    pub allow_keychain_prompt: bool,
    pub sources: Vec<Arc<dyn ExternalCredentialSource>>,
}

impl AuthStoreLoadOptions {
    pub fn with_source(mut self, source: Arc<dyn ExternalCredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_sources(
        mut self,
        sources: impl IntoIterator<Item = Arc<dyn ExternalCredentialSource>>,
    ) -> Self {
        self.sources.extend(sources);
        self
    }
}

impl fmt::Debug for AuthStoreLoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStoreLoadOptions")
            .field("allow_keychain_prompt", &self.allow_keychain_prompt)
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|source| source.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Applies every source's credentials to `store`, returning how many
/// profiles were added or replaced. A failing source is logged and skipped.
pub fn sync_external_credentials(
    store: &mut AuthProfileStore,
    options: &AuthStoreLoadOptions,
) -> usize {
    let mut changed = 0;
    for source in &options.sources {
        let entries = match source.collect(options.allow_keychain_prompt) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    source = source.name(),
                    error = %error,
                    "external credential sync failed"
                );
                continue;
            }
        };
        for (profile_id, credential) in entries {
            if store.get(&profile_id) == Some(&credential) {
                continue;
            }
            tracing::debug!(
                source = source.name(),
                profile = %profile_id,
                provider = credential.provider(),
                "synced external credential"
            );
            store.upsert(profile_id, credential);
            changed += 1;
        }
    }
    changed
}

pub type EnvLookupFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider API keys conventionally exported in the environment.
pub const DEFAULT_ENV_CREDENTIAL_VARS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("google", "GEMINI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("xai", "XAI_API_KEY"),
    ("mistral", "MISTRAL_API_KEY"),
];

/// Imports an API key from one environment variable as `<provider>:env`.
pub struct EnvCredentialSource {
    provider: String,
    env_var: String,
    lookup: EnvLookupFn,
}

impl EnvCredentialSource {
    pub fn new(provider: &str, env_var: impl Into<String>) -> Self {
        Self::with_lookup(
            provider,
            env_var,
            Arc::new(|name: &str| std::env::var(name).ok()),
        )
    }

    pub fn with_lookup(provider: &str, env_var: impl Into<String>, lookup: EnvLookupFn) -> Self {
        Self {
            provider: normalize_provider_id(provider),
            env_var: env_var.into(),
            lookup,
        }
    }

    pub fn profile_id(&self) -> String {
        format!("{}:env", self.provider)
    }
}

impl ExternalCredentialSource for EnvCredentialSource {
    fn name(&self) -> &str {
        &self.env_var
    }

    fn collect(&self, _allow_keychain_prompt: bool) -> Result<Vec<(String, AuthProfileCredential)>> {
        let Some(value) = (self.lookup)(&self.env_var) else {
            return Ok(Vec::new());
        };
        let key = value.trim();
        if key.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![(
            self.profile_id(),
            AuthProfileCredential::api_key(self.provider.clone(), key),
        )])
    }
}

pub fn default_env_credential_sources() -> Vec<Arc<dyn ExternalCredentialSource>> {
    DEFAULT_ENV_CREDENTIAL_VARS
        .iter()
        .map(|(provider, env_var)| {
            Arc::new(EnvCredentialSource::new(provider, *env_var)) as Arc<dyn ExternalCredentialSource>
        })
        .collect()
}
