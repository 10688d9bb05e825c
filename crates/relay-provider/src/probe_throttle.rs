//! Throttled recovery probing for providers whose profiles are all cooling down.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// At most one probe per throttle key within this window.
pub const MIN_PROBE_INTERVAL_MS: u64 = 30_000;
/// Probe only once the soonest cooldown expiry is this close.
pub const PROBE_MARGIN_MS: u64 = 120_000;

/// `"<scope>::<provider>"`, or the bare provider without a scope.
pub fn probe_throttle_key(provider: &str, agent_scope: Option<&str>) -> String {
    match agent_scope.map(str::trim).filter(|scope| !scope.is_empty()) {
        Some(scope) => format!("{scope}::{provider}"),
        None => provider.to_string(),
    }
}

/// Decides whether a cooling-down primary candidate should be probed anyway.
pub fn should_probe_during_cooldown(
    is_primary_candidate: bool,
    has_fallback_candidates: bool,
    now_unix_ms: u64,
    last_probe_at: Option<u64>,
    soonest_cooldown_expiry: Option<u64>,
) -> bool {
    if !is_primary_candidate || !has_fallback_candidates {
        return false;
    }
    if last_probe_at
        .is_some_and(|last_probe| now_unix_ms.saturating_sub(last_probe) < MIN_PROBE_INTERVAL_MS)
    {
        return false;
    }
    match soonest_cooldown_expiry {
        None => true,
        Some(expiry) => now_unix_ms >= expiry.saturating_sub(PROBE_MARGIN_MS),
    }
}

fn lock_or_recover_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
/// Last probe time per throttle key. Owned by the executor and shared through
/// an `Arc` by callers that want throttling across agent turns.
pub struct CooldownProbeThrottle {
    last_probe_at: Mutex<HashMap<String, u64>>,
}

impl CooldownProbeThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_probe_at(&self, key: &str) -> Option<u64> {
        lock_or_recover_mutex(&self.last_probe_at).get(key).copied()
    }

    /// Checks and records a probe under one lock, so two racing callers on
    /// the same key cannot both probe inside the minimum interval.
    pub fn try_begin_probe(
        &self,
        key: &str,
        is_primary_candidate: bool,
        has_fallback_candidates: bool,
        now_unix_ms: u64,
        soonest_cooldown_expiry: Option<u64>,
    ) -> bool {
        let mut probes = lock_or_recover_mutex(&self.last_probe_at);
        let allowed = should_probe_during_cooldown(
            is_primary_candidate,
            has_fallback_candidates,
            now_unix_ms,
            probes.get(key).copied(),
            soonest_cooldown_expiry,
        );
        if allowed {
            probes.insert(key.to_string(), now_unix_ms);
        }
        allowed
    }

    pub fn len(&self) -> usize {
        lock_or_recover_mutex(&self.last_probe_at).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
