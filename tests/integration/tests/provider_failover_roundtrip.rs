use std::{
    collections::VecDeque,
    future::{ready, Ready},
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use relay_ai::ProviderError;
use relay_provider::{
    ensure_auth_profile_store, load_auth_profile_store, load_auth_profile_store_for_failover,
    save_auth_profile_store, AuthProfileCredential, AuthProfileStore, AuthStoreLoadOptions,
    CooldownProbeThrottle, EnvCredentialSource, FailoverReason, FallbackExhaustedError,
    GatewayConfig, ImageModelFallbackRequest, JsonEventObserver, ModelFallbackExecutor,
    ModelFallbackRequest, MIN_PROBE_INTERVAL_MS,
};
use serde_json::Value;

const NOW: u64 = 1_700_000_000_000;

struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Result<&'static str>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(outcomes: Vec<Result<&'static str>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call(&self, provider: String, model: String) -> Ready<Result<&'static str>> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{provider}/{model}"));
        let outcome = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted provider exhausted")));
        ready(outcome)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

fn collecting_observer() -> (JsonEventObserver, Arc<Mutex<Vec<Value>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let observer = JsonEventObserver::new(Arc::new(move |event| {
        sink_events.lock().expect("events lock").push(event);
    }));
    (observer, events)
}

fn gateway_config(raw: &str) -> GatewayConfig {
    serde_json::from_str(raw).expect("gateway config")
}

fn http_status(status: u16, body: &str) -> anyhow::Error {
    anyhow::Error::new(ProviderError::HttpStatus {
        status,
        body: body.to_string(),
    })
}

fn executor_at(throttle: &Arc<CooldownProbeThrottle>, now: u64) -> ModelFallbackExecutor {
    ModelFallbackExecutor::with_clock(Arc::clone(throttle), Arc::new(move || now))
}

fn write_store(path: &Path, cooled: &[(&str, &str, u64)], healthy: &[(&str, &str)]) {
    let mut store = AuthProfileStore::default();
    for (profile_id, provider, until) in cooled {
        store.upsert(*profile_id, AuthProfileCredential::api_key(*provider, "sk-cooled"));
        store.mark_profile_cooldown(profile_id, *until, FailoverReason::RateLimit);
    }
    for (profile_id, provider) in healthy {
        store.upsert(*profile_id, AuthProfileCredential::api_key(*provider, "sk-live"));
    }
    save_auth_profile_store(path, &store).expect("save store");
}

const TEXT_CHAIN_CONFIG: &str = r#"{
  "agents": {
    "defaults": {
      "model": {
        "primary": "anthropic/claude-opus-4-6",
        "fallbacks": ["openai/gpt-4o"]
      }
    }
  },
  "auth": {
    "order": { "anthropic": ["anthropic:work", "anthropic:default"] }
  }
}"#;

#[tokio::test]
async fn integration_cooled_provider_from_disk_is_skipped_for_fallback() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store_path = tempdir.path().join("agent").join("auth-profiles.json");
    write_store(
        &store_path,
        &[
            ("anthropic:default", "anthropic", NOW + 3_600_000),
            ("anthropic:work", "anthropic", NOW + 7_200_000),
        ],
        &[("openai:default", "openai")],
    );
    let store = load_auth_profile_store_for_failover(&store_path, &AuthStoreLoadOptions::default())
        .expect("load store");
    let config = gateway_config(TEXT_CHAIN_CONFIG);
    let provider = ScriptedProvider::new(vec![Ok("from openai")]);
    let (observer, events) = collecting_observer();
    let throttle = Arc::new(CooldownProbeThrottle::new());

    let outcome = executor_at(&throttle, NOW)
        .run_with_model_fallback(
            ModelFallbackRequest {
                config: Some(&config),
                auth_store: Some(&store),
                observer: Some(&observer),
                ..ModelFallbackRequest::default()
            },
            |provider_id, model| provider.call(provider_id, model),
        )
        .await
        .expect("fallback succeeds");

    assert_eq!(outcome.result, "from openai");
    assert_eq!(outcome.provider, "openai");
    assert_eq!(outcome.model, "gpt-4o");
    assert_eq!(provider.calls(), vec!["openai/gpt-4o"]);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].provider, "anthropic");
    assert_eq!(outcome.attempts[0].reason, Some(FailoverReason::RateLimit));
    assert!(outcome.attempts[0].error.contains("in cooldown"));
    assert!(events.lock().expect("events lock").is_empty());
}

#[tokio::test]
async fn integration_exhausted_chain_reports_every_attempt() {
    let config = gateway_config(TEXT_CHAIN_CONFIG);
    let provider = ScriptedProvider::new(vec![
        Err(http_status(429, "rate limited")),
        Err(http_status(401, "invalid api key")),
    ]);
    let (observer, events) = collecting_observer();
    let throttle = Arc::new(CooldownProbeThrottle::new());

    let error = executor_at(&throttle, NOW)
        .run_with_model_fallback(
            ModelFallbackRequest {
                config: Some(&config),
                observer: Some(&observer),
                ..ModelFallbackRequest::default()
            },
            |provider_id, model| provider.call(provider_id, model),
        )
        .await
        .expect_err("every candidate fails");

    let exhausted = error
        .downcast_ref::<FallbackExhaustedError>()
        .expect("aggregate error");
    assert!(exhausted.summary().starts_with("All models failed (2): "));
    let reasons = exhausted
        .attempts()
        .iter()
        .map(|attempt| attempt.reason)
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        vec![Some(FailoverReason::RateLimit), Some(FailoverReason::Auth)]
    );
    let cause = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProviderError>())
        .expect("provider error kept as cause");
    assert_eq!(cause.status(), Some(401));

    let events = events.lock().expect("events lock");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["reason"], "rate_limit");
    assert_eq!(events[1]["provider"], "openai");
    assert_eq!(events[1]["reason"], "auth");
    assert_eq!(events[1]["attempt"], 2);
    assert_eq!(events[1]["total"], 2);
}

#[tokio::test]
async fn integration_context_overflow_is_returned_without_fallback() {
    let config = gateway_config(TEXT_CHAIN_CONFIG);
    let provider = ScriptedProvider::new(vec![Err(http_status(
        400,
        "prompt is too long: 250000 tokens > 200000 maximum",
    ))]);
    let throttle = Arc::new(CooldownProbeThrottle::new());

    let error = executor_at(&throttle, NOW)
        .run_with_model_fallback(
            ModelFallbackRequest {
                config: Some(&config),
                ..ModelFallbackRequest::default()
            },
            |provider_id, model| provider.call(provider_id, model),
        )
        .await
        .expect_err("overflow surfaces");

    assert!(error.downcast_ref::<FallbackExhaustedError>().is_none());
    assert!(error.to_string().contains("prompt is too long"));
    assert_eq!(provider.calls(), vec!["anthropic/claude-opus-4-6"]);
}

#[tokio::test]
async fn integration_shared_throttle_limits_recovery_probes_across_turns() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store_path = tempdir.path().join("auth-profiles.json");
    write_store(
        &store_path,
        &[("anthropic:default", "anthropic", NOW + 60_000)],
        &[("openai:default", "openai")],
    );
    let store = load_auth_profile_store(&store_path).expect("load store");
    let config = gateway_config(TEXT_CHAIN_CONFIG);
    let throttle = Arc::new(CooldownProbeThrottle::new());
    let request = ModelFallbackRequest {
        config: Some(&config),
        auth_store: Some(&store),
        agent_scope: Some("agent-1"),
        ..ModelFallbackRequest::default()
    };

    let first_turn = ScriptedProvider::new(vec![Err(http_status(429, "still limited")), Ok("a")]);
    executor_at(&throttle, NOW)
        .run_with_model_fallback(request, |provider_id, model| {
            first_turn.call(provider_id, model)
        })
        .await
        .expect("first turn");
    assert_eq!(
        first_turn.calls(),
        vec!["anthropic/claude-opus-4-6", "openai/gpt-4o"]
    );
    assert_eq!(throttle.last_probe_at("agent-1::anthropic"), Some(NOW));

    let second_turn = ScriptedProvider::new(vec![Ok("b")]);
    let outcome = executor_at(&throttle, NOW + 1_000)
        .run_with_model_fallback(request, |provider_id, model| {
            second_turn.call(provider_id, model)
        })
        .await
        .expect("second turn");
    assert_eq!(second_turn.calls(), vec!["openai/gpt-4o"]);
    assert_eq!(outcome.attempts[0].reason, Some(FailoverReason::RateLimit));

    let other_scope = ScriptedProvider::new(vec![Ok("c")]);
    executor_at(&throttle, NOW + 1_000)
        .run_with_model_fallback(
            ModelFallbackRequest {
                agent_scope: Some("agent-2"),
                ..request
            },
            |provider_id, model| other_scope.call(provider_id, model),
        )
        .await
        .expect("other scope");
    assert_eq!(other_scope.calls(), vec!["anthropic/claude-opus-4-6"]);

    let after_interval = ScriptedProvider::new(vec![Ok("d")]);
    executor_at(&throttle, NOW + MIN_PROBE_INTERVAL_MS)
        .run_with_model_fallback(request, |provider_id, model| {
            after_interval.call(provider_id, model)
        })
        .await
        .expect("probe after interval");
    assert_eq!(after_interval.calls(), vec!["anthropic/claude-opus-4-6"]);
}

#[tokio::test]
async fn integration_image_chain_records_unrecognized_failures() {
    let config = gateway_config(
        r#"{"agents":{"defaults":{"imageModel":{"primary":"openai/gpt-image-1","fallbacks":["google/imagen-3"]}}}}"#,
    );
    let provider = ScriptedProvider::new(vec![Err(anyhow!("renderer crashed")), Ok("png")]);
    let throttle = Arc::new(CooldownProbeThrottle::new());

    let outcome = executor_at(&throttle, NOW)
        .run_with_image_model_fallback(
            ImageModelFallbackRequest {
                config: Some(&config),
                ..ImageModelFallbackRequest::default()
            },
            |provider_id, model| provider.call(provider_id, model),
        )
        .await
        .expect("image fallback");

    assert_eq!(outcome.result, "png");
    assert_eq!(outcome.provider, "google");
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].reason, None);
    assert_eq!(outcome.attempts[0].error, "renderer crashed");

    let missing = executor_at(&throttle, NOW)
        .run_with_image_model_fallback(ImageModelFallbackRequest::default(), |provider_id, model| {
            provider.call(provider_id, model)
        })
        .await
        .expect_err("no image model");
    assert_eq!(missing.to_string(), "No image model configured");
}

#[test]
fn integration_env_credentials_are_imported_once_and_persisted() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store_path = tempdir.path().join("auth-profiles.json");
    let source = Arc::new(EnvCredentialSource::with_lookup(
        "openai",
        "OPENAI_API_KEY",
        Arc::new(|name: &str| (name == "OPENAI_API_KEY").then(|| " sk-env ".to_string())),
    ));
    let options = AuthStoreLoadOptions::default().with_source(source);

    let store = ensure_auth_profile_store(&store_path, &options).expect("ensure store");
    assert_eq!(store.profile_ids_for_provider("openai"), vec!["openai:env"]);

    let reloaded = load_auth_profile_store(&store_path).expect("reload");
    assert_eq!(
        reloaded.get("openai:env"),
        Some(&AuthProfileCredential::api_key("openai", "sk-env"))
    );
}
