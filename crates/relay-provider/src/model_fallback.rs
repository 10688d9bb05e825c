//! Sequential provider/model failover for one agent turn.
//!
//! Candidates are tried strictly in order. Auth-profile cooldown can skip a
//! candidate without calling it, user aborts and context overflow end the run
//! immediately, and exhaustion surfaces either the single underlying error or
//! an aggregate listing every attempt.

use std::{future::Future, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use relay_core::current_unix_timestamp_ms;
use serde::Serialize;
use thiserror::Error;

use crate::auth_profiles::{
    all_profiles_in_cooldown, resolve_auth_profile_order, resolve_profiles_unavailable_reason,
    soonest_cooldown_expiry, AuthProfileOrderInputs, AuthProfileStore,
};
use crate::config::{AuthConfig, GatewayConfig};
use crate::failover_error::{
    classify_failover_error, is_context_overflow_error, is_user_abort, resolve_failover_status,
    FailoverReason,
};
use crate::fallback_candidates::{
    resolve_fallback_candidates, resolve_image_fallback_candidates, TextCandidateRequest,
};
use crate::model_selection::ModelCandidate;
use crate::probe_throttle::{probe_throttle_key, CooldownProbeThrottle};

pub type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// One failed or skipped candidate, in call order.
pub struct FallbackAttempt {
    pub provider: String,
    pub model: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailoverReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FallbackAttempt {
    fn describe(&self) -> String {
        match self.reason {
            Some(reason) => format!(
                "{}/{}: {} ({reason})",
                self.provider, self.model, self.error
            ),
            None => format!("{}/{}: {}", self.provider, self.model, self.error),
        }
    }
}

#[derive(Debug)]
/// Public struct `ModelFallbackRunResult` used across relay components.
pub struct ModelFallbackRunResult<T> {
    pub result: T,
    pub provider: String,
    pub model: String,
    /// Failures recorded before the successful candidate.
    pub attempts: Vec<FallbackAttempt>,
}

#[derive(Debug, Clone, Error)]
#[error("{summary}")]
/// Raised when every candidate failed. Attached as context to the last
/// underlying error, which stays reachable through the error chain.
pub struct FallbackExhaustedError {
    summary: String,
    attempts: Vec<FallbackAttempt>,
}

impl FallbackExhaustedError {
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn attempts(&self) -> &[FallbackAttempt] {
        &self.attempts
    }
}

/// Payload for [`ErrorObserver::on_error`].
pub struct FallbackErrorEvent<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub error: &'a anyhow::Error,
    pub reason: Option<FailoverReason>,
    /// 1-based index of the failed candidate.
    pub attempt: usize,
    pub total: usize,
}

#[async_trait]
/// Notified once per failed call; awaited before the next candidate runs.
pub trait ErrorObserver: Send + Sync {
    async fn on_error(&self, event: FallbackErrorEvent<'_>);
}

#[derive(Debug, Clone, Copy)]
/// Store and config used to check whether a candidate's provider is usable.
pub struct AuthProfileGate<'a> {
    pub store: &'a AuthProfileStore,
    pub config: Option<&'a AuthConfig>,
}

#[derive(Clone, Copy, Default)]
/// Public struct `FallbackRunOptions` used across relay components.
pub struct FallbackRunOptions<'a> {
    pub auth: Option<AuthProfileGate<'a>>,
    /// Scopes probe throttling to one agent.
    pub agent_scope: Option<&'a str>,
    pub observer: Option<&'a dyn ErrorObserver>,
}

#[derive(Clone, Copy, Default)]
/// Text-model run: candidates come from config plus the per-request selection.
pub struct ModelFallbackRequest<'a> {
    pub config: Option<&'a GatewayConfig>,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    /// Replaces the configured fallback chain, even when empty.
    pub fallbacks_override: Option<&'a [String]>,
    pub auth_store: Option<&'a AuthProfileStore>,
    pub agent_scope: Option<&'a str>,
    pub observer: Option<&'a dyn ErrorObserver>,
}

#[derive(Clone, Copy, Default)]
/// Public struct `ImageModelFallbackRequest` used across relay components.
pub struct ImageModelFallbackRequest<'a> {
    pub config: Option<&'a GatewayConfig>,
    pub model_override: Option<&'a str>,
    pub observer: Option<&'a dyn ErrorObserver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackChainKind {
    Text,
    Image,
}

impl FallbackChainKind {
    fn summary_label(self) -> &'static str {
        match self {
            FallbackChainKind::Text => "models",
            FallbackChainKind::Image => "image models",
        }
    }
}

/// Runs candidate chains. Holds the probe throttle so it outlives single
/// turns; clone the `Arc` to share throttling between executors.
pub struct ModelFallbackExecutor {
    probe_throttle: Arc<CooldownProbeThrottle>,
    clock: ClockFn,
}

impl Default for ModelFallbackExecutor {
    fn default() -> Self {
        Self::new(Arc::new(CooldownProbeThrottle::new()))
    }
}

impl ModelFallbackExecutor {
    pub fn new(probe_throttle: Arc<CooldownProbeThrottle>) -> Self {
        Self::with_clock(probe_throttle, Arc::new(current_unix_timestamp_ms))
    }

    pub fn with_clock(probe_throttle: Arc<CooldownProbeThrottle>, clock: ClockFn) -> Self {
        Self {
            probe_throttle,
            clock,
        }
    }

    pub fn probe_throttle(&self) -> &Arc<CooldownProbeThrottle> {
        &self.probe_throttle
    }

    /// Tries `candidates` in order with `run(provider, model)`.
    pub async fn run_candidates<T, F, Fut>(
        &self,
        candidates: &[ModelCandidate],
        options: FallbackRunOptions<'_>,
        run: F,
    ) -> Result<ModelFallbackRunResult<T>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_chain(candidates, options, FallbackChainKind::Text, run)
            .await
    }

    /// Resolves text candidates from config and the request, then runs them.
    pub async fn run_with_model_fallback<T, F, Fut>(
        &self,
        request: ModelFallbackRequest<'_>,
        run: F,
    ) -> Result<ModelFallbackRunResult<T>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = resolve_fallback_candidates(
            request.config,
            &TextCandidateRequest {
                provider: request.provider,
                model: request.model,
                fallbacks_override: request.fallbacks_override,
            },
        );
        let options = FallbackRunOptions {
            auth: request.auth_store.map(|store| AuthProfileGate {
                store,
                config: request.config.map(|config| &config.auth),
            }),
            agent_scope: request.agent_scope,
            observer: request.observer,
        };
        self.run_chain(&candidates, options, FallbackChainKind::Text, run)
            .await
    }

    /// Image runs skip the auth-profile gate and record every failure other
    /// than a user abort.
    pub async fn run_with_image_model_fallback<T, F, Fut>(
        &self,
        request: ImageModelFallbackRequest<'_>,
        run: F,
    ) -> Result<ModelFallbackRunResult<T>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = resolve_image_fallback_candidates(request.config, request.model_override);
        if candidates.is_empty() {
            bail!("No image model configured");
        }
        let options = FallbackRunOptions {
            auth: None,
            agent_scope: None,
            observer: request.observer,
        };
        self.run_chain(&candidates, options, FallbackChainKind::Image, run)
            .await
    }

    fn cooldown_skip(
        &self,
        gate: AuthProfileGate<'_>,
        candidate: &ModelCandidate,
        is_primary: bool,
        has_fallbacks: bool,
        agent_scope: Option<&str>,
    ) -> Option<FallbackAttempt> {
        let now_unix_ms = (self.clock)();
        let inputs = AuthProfileOrderInputs::from_config(gate.config, &candidate.provider);
        let profile_ids =
            resolve_auth_profile_order(gate.store, &candidate.provider, &inputs, now_unix_ms);
        if !all_profiles_in_cooldown(gate.store, &profile_ids, now_unix_ms) {
            return None;
        }

        let throttle_key = probe_throttle_key(&candidate.provider, agent_scope);
        let soonest_expiry = soonest_cooldown_expiry(gate.store, &profile_ids);
        if self.probe_throttle.try_begin_probe(
            &throttle_key,
            is_primary,
            has_fallbacks,
            now_unix_ms,
            soonest_expiry,
        ) {
            tracing::debug!(
                provider = %candidate.provider,
                model = %candidate.model,
                throttle_key = %throttle_key,
                soonest_expiry = ?soonest_expiry,
                "probing provider during cooldown"
            );
            return None;
        }

        let reason = resolve_profiles_unavailable_reason(gate.store, &profile_ids, now_unix_ms)
            .unwrap_or(FailoverReason::RateLimit);
        tracing::debug!(
            provider = %candidate.provider,
            model = %candidate.model,
            profiles = profile_ids.len(),
            reason = %reason,
            "skipping provider in cooldown"
        );
        Some(FallbackAttempt {
            provider: candidate.provider.clone(),
            model: candidate.model.clone(),
            error: format!(
                "Provider {} is in cooldown (all profiles unavailable)",
                candidate.provider
            ),
            reason: Some(reason),
            status: resolve_failover_status(reason),
            code: None,
        })
    }

    async fn run_chain<T, F, Fut>(
        &self,
        candidates: &[ModelCandidate],
        options: FallbackRunOptions<'_>,
        kind: FallbackChainKind,
        mut run: F,
    ) -> Result<ModelFallbackRunResult<T>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if candidates.is_empty() {
            bail!("no model candidates to run");
        }

        let total = candidates.len();
        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut last_error: Option<anyhow::Error> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            if let Some(gate) = options.auth {
                if let Some(skipped) =
                    self.cooldown_skip(gate, candidate, index == 0, total > 1, options.agent_scope)
                {
                    attempts.push(skipped);
                    continue;
                }
            }

            let error = match run(candidate.provider.clone(), candidate.model.clone()).await {
                Ok(result) => {
                    if !attempts.is_empty() {
                        tracing::debug!(
                            provider = %candidate.provider,
                            model = %candidate.model,
                            prior_attempts = attempts.len(),
                            "model fallback succeeded"
                        );
                    }
                    return Ok(ModelFallbackRunResult {
                        result,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        attempts,
                    });
                }
                Err(error) => error,
            };

            if is_user_abort(&error) {
                return Err(error);
            }
            if kind == FallbackChainKind::Text && is_context_overflow_error(&error) {
                tracing::debug!(
                    provider = %candidate.provider,
                    model = %candidate.model,
                    "context overflow; not trying remaining candidates"
                );
                return Err(error);
            }

            let classified = classify_failover_error(&error);
            let is_last = index + 1 == total;
            if kind == FallbackChainKind::Text && classified.is_none() && is_last {
                return Err(error);
            }

            let reason = classified.as_ref().map(|classified| classified.reason);
            tracing::warn!(
                provider = %candidate.provider,
                model = %candidate.model,
                attempt = index + 1,
                total,
                reason = reason.map(FailoverReason::as_str).unwrap_or("unrecognized"),
                error = %error,
                "model candidate failed"
            );
            attempts.push(match classified {
                Some(classified) => FallbackAttempt {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    error: classified.message,
                    reason: Some(classified.reason),
                    status: classified.status,
                    code: classified.code,
                },
                None => FallbackAttempt {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    error: error.to_string(),
                    reason: None,
                    status: None,
                    code: None,
                },
            });

            if let Some(observer) = options.observer {
                observer
                    .on_error(FallbackErrorEvent {
                        provider: &candidate.provider,
                        model: &candidate.model,
                        error: &error,
                        reason,
                        attempt: index + 1,
                        total,
                    })
                    .await;
            }
            last_error = Some(error);
        }

        if attempts.len() <= 1 {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        let summary = format!(
            "All {} failed ({}): {}",
            kind.summary_label(),
            attempts.len(),
            attempts
                .iter()
                .map(FallbackAttempt::describe)
                .collect::<Vec<_>>()
                .join(" | ")
        );
        let exhausted = FallbackExhaustedError { summary, attempts };
        Err(match last_error {
            Some(error) => error.context(exhausted),
            None => anyhow::Error::new(exhausted),
        })
    }
}
