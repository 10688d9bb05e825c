//! Subcommand execution. Every command returns a JSON value for stdout.

use anyhow::Result;
use relay_ai::normalize_provider_id;
use relay_provider::{
    all_profiles_in_cooldown, default_env_credential_sources, ensure_auth_profile_store,
    is_profile_in_cooldown, load_auth_profile_store, load_gateway_config, probe_throttle_key,
    profile_unusable_until, resolve_auth_profile_order, resolve_fallback_candidates,
    resolve_image_fallback_candidates, resolve_profiles_unavailable_reason,
    should_probe_during_cooldown, soonest_cooldown_expiry, AuthProfileOrderInputs,
    AuthProfileStore, AuthStoreLoadOptions, GatewayConfig, ModelCandidate, TextCandidateRequest,
};
use serde_json::{json, Value};

use crate::cli_args::{
    AuthOrderArgs, AuthStoreArgs, CandidatesArgs, Cli, CliCommand, ProbeWindowArgs,
};

pub(crate) fn execute_cli(cli: &Cli, now_unix_ms: u64) -> Result<Value> {
    let config = cli
        .config
        .as_deref()
        .map(load_gateway_config)
        .transpose()?;
    match &cli.command {
        CliCommand::Candidates(args) => Ok(execute_candidates(config.as_ref(), args)),
        CliCommand::AuthOrder(args) => execute_auth_order(config.as_ref(), args, now_unix_ms),
        CliCommand::ProbeWindow(args) => execute_probe_window(config.as_ref(), args, now_unix_ms),
    }
}

fn load_store(args: &AuthStoreArgs) -> Result<AuthProfileStore> {
    if args.import_env {
        let options = AuthStoreLoadOptions::default().with_sources(default_env_credential_sources());
        return ensure_auth_profile_store(&args.store, &options);
    }
    load_auth_profile_store(&args.store)
}

fn candidates_json(candidates: &[ModelCandidate]) -> Vec<Value> {
    candidates
        .iter()
        .map(|candidate| {
            json!({
                "provider": candidate.provider,
                "model": candidate.model,
                "key": candidate.key(),
            })
        })
        .collect()
}

fn execute_candidates(config: Option<&GatewayConfig>, args: &CandidatesArgs) -> Value {
    if args.image {
        let candidates = resolve_image_fallback_candidates(config, args.model.as_deref());
        return json!({
            "kind": "image",
            "candidates": candidates_json(&candidates),
        });
    }
    let candidates = resolve_fallback_candidates(
        config,
        &TextCandidateRequest {
            provider: args.provider.as_deref(),
            model: args.model.as_deref(),
            fallbacks_override: args.fallbacks_override(),
        },
    );
    json!({
        "kind": "text",
        "fallbacks_overridden": args.fallbacks_override().is_some(),
        "candidates": candidates_json(&candidates),
    })
}

fn order_inputs<'a>(
    config: Option<&'a GatewayConfig>,
    provider: &str,
    preferred: Option<&'a str>,
) -> AuthProfileOrderInputs<'a> {
    AuthProfileOrderInputs::from_config(config.map(|config| &config.auth), provider)
        .with_preferred_profile(preferred)
}

fn execute_auth_order(
    config: Option<&GatewayConfig>,
    args: &AuthOrderArgs,
    now_unix_ms: u64,
) -> Result<Value> {
    let store = load_store(&args.store)?;
    let inputs = order_inputs(config, &args.provider, args.preferred.as_deref());
    let order = resolve_auth_profile_order(&store, &args.provider, &inputs, now_unix_ms);
    let profiles = order
        .iter()
        .map(|profile_id| {
            json!({
                "id": profile_id,
                "type": store.get(profile_id).map(|credential| credential.kind()),
                "in_cooldown": is_profile_in_cooldown(&store, profile_id, now_unix_ms),
                "unusable_until": store.usage(profile_id).and_then(profile_unusable_until),
            })
        })
        .collect::<Vec<_>>();
    let all_in_cooldown = all_profiles_in_cooldown(&store, &order, now_unix_ms);
    Ok(json!({
        "provider": args.provider,
        "explicit_order": inputs.explicit_order.is_some(),
        "profiles": profiles,
        "all_in_cooldown": all_in_cooldown,
        "unavailable_reason": all_in_cooldown
            .then(|| resolve_profiles_unavailable_reason(&store, &order, now_unix_ms))
            .flatten(),
    }))
}

fn execute_probe_window(
    config: Option<&GatewayConfig>,
    args: &ProbeWindowArgs,
    now_unix_ms: u64,
) -> Result<Value> {
    let store = load_store(&args.store)?;
    let inputs = order_inputs(config, &args.provider, None);
    let order = resolve_auth_profile_order(&store, &args.provider, &inputs, now_unix_ms);
    let all_in_cooldown = all_profiles_in_cooldown(&store, &order, now_unix_ms);
    let soonest_expiry = soonest_cooldown_expiry(&store, &order);
    let request = match args.model.as_deref() {
        Some(model) => TextCandidateRequest {
            provider: Some(args.provider.as_str()),
            model: Some(model),
            ..TextCandidateRequest::default()
        },
        None => TextCandidateRequest::default(),
    };
    let candidates = resolve_fallback_candidates(config, &request);
    let provider = normalize_provider_id(&args.provider);
    let is_primary = candidates
        .first()
        .is_some_and(|candidate| candidate.provider == provider);
    let has_fallbacks = candidates.len() > 1;
    let probe_allowed =
        should_probe_during_cooldown(is_primary, has_fallbacks, now_unix_ms, None, soonest_expiry);
    Ok(json!({
        "provider": args.provider,
        "throttle_key": probe_throttle_key(&args.provider, args.agent_scope.as_deref()),
        "profiles": order.len(),
        "all_in_cooldown": all_in_cooldown,
        "soonest_cooldown_expiry": soonest_expiry,
        "is_primary": is_primary,
        "has_fallbacks": has_fallbacks,
        "probe_allowed": probe_allowed,
        "would_skip": all_in_cooldown && !probe_allowed,
    }))
}
