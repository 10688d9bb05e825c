use std::collections::BTreeMap;

use super::store::{AuthProfileStore, ProfileUsageStats};
use crate::failover_error::FailoverReason;

const DISABLED_REASON_WEIGHT: u64 = 1000;

/// Tie-break order when several reasons score equally.
const UNAVAILABLE_REASON_PRIORITY: [FailoverReason; 8] = [
    FailoverReason::Auth,
    FailoverReason::Billing,
    FailoverReason::Format,
    FailoverReason::Timeout,
    FailoverReason::Overloaded,
    FailoverReason::RateLimit,
    FailoverReason::Unknown,
    FailoverReason::ContextOverflow,
];

/// Latest of the cooldown and disabled windows.
pub fn profile_unusable_until(stats: &ProfileUsageStats) -> Option<u64> {
    match (stats.cooldown_until, stats.disabled_until) {
        (Some(cooldown), Some(disabled)) => Some(cooldown.max(disabled)),
        (cooldown, disabled) => cooldown.or(disabled),
    }
}

pub fn is_profile_in_cooldown(store: &AuthProfileStore, profile_id: &str, now_unix_ms: u64) -> bool {
    store
        .usage(profile_id)
        .and_then(profile_unusable_until)
        .is_some_and(|until| now_unix_ms < until)
}

/// True when `profile_ids` is non-empty and every profile is unusable now.
pub fn all_profiles_in_cooldown(
    store: &AuthProfileStore,
    profile_ids: &[String],
    now_unix_ms: u64,
) -> bool {
    !profile_ids.is_empty()
        && profile_ids
            .iter()
            .all(|profile_id| is_profile_in_cooldown(store, profile_id, now_unix_ms))
}

/// Earliest recorded unusable-until among `profile_ids`, if any is known.
pub fn soonest_cooldown_expiry(store: &AuthProfileStore, profile_ids: &[String]) -> Option<u64> {
    profile_ids
        .iter()
        .filter_map(|profile_id| store.usage(profile_id).and_then(profile_unusable_until))
        .min()
}

/// Best explanation for why `profile_ids` are unavailable at `now_unix_ms`.
///
/// Active disabled windows dominate; active cooldowns contribute their
/// recorded failure counts, or a single rate-limit vote when none exist.
pub fn resolve_profiles_unavailable_reason(
    store: &AuthProfileStore,
    profile_ids: &[String],
    now_unix_ms: u64,
) -> Option<FailoverReason> {
    let mut scores: BTreeMap<FailoverReason, u64> = BTreeMap::new();
    for profile_id in profile_ids {
        let Some(stats) = store.usage(profile_id) else {
            continue;
        };
        if stats
            .disabled_until
            .is_some_and(|until| now_unix_ms < until)
        {
            let reason = stats.disabled_reason.unwrap_or(FailoverReason::Unknown);
            *scores.entry(reason).or_insert(0) += DISABLED_REASON_WEIGHT;
            continue;
        }
        if !stats
            .cooldown_until
            .is_some_and(|until| now_unix_ms < until)
        {
            continue;
        }
        let mut recorded = false;
        for (raw_reason, count) in &stats.failure_counts {
            let Some(reason) = FailoverReason::parse(raw_reason) else {
                continue;
            };
            if *count == 0 {
                continue;
            }
            *scores.entry(reason).or_insert(0) += u64::from(*count);
            recorded = true;
        }
        if !recorded {
            *scores.entry(FailoverReason::RateLimit).or_insert(0) += 1;
        }
    }

    let best_score = scores.values().copied().max()?;
    UNAVAILABLE_REASON_PRIORITY
        .into_iter()
        .find(|reason| scores.get(reason) == Some(&best_score))
}

impl AuthProfileStore {
    /// Records a cooldown window ending at `until_unix_ms`.
    pub fn mark_profile_cooldown(
        &mut self,
        profile_id: &str,
        until_unix_ms: u64,
        reason: FailoverReason,
    ) {
        let stats = self.usage_stats.entry(profile_id.to_string()).or_default();
        stats.cooldown_until = Some(until_unix_ms);
        stats.record_failure(reason);
    }

    pub fn mark_profile_disabled(
        &mut self,
        profile_id: &str,
        until_unix_ms: u64,
        reason: FailoverReason,
    ) {
        let stats = self.usage_stats.entry(profile_id.to_string()).or_default();
        stats.disabled_until = Some(until_unix_ms);
        stats.disabled_reason = Some(reason);
        stats.record_failure(reason);
    }

    /// Records a successful use, clearing windows and failure counts.
    pub fn mark_profile_used(&mut self, profile_id: &str, now_unix_ms: u64) {
        let stats = self.usage_stats.entry(profile_id.to_string()).or_default();
        stats.last_used = Some(now_unix_ms);
        stats.cooldown_until = None;
        stats.disabled_until = None;
        stats.disabled_reason = None;
        stats.failure_counts.clear();
    }
}
