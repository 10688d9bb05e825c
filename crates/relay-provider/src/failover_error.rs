//! Failure classification for the model fallback executor.
//!
//! Classification runs as a fixed pipeline: tagged [`FailoverError`], HTTP
//! status, transport code and timeout shape, provider JSON payload embedded in
//! the message, then message patterns. The order matters; reordering changes
//! which reason wins for messages that match more than one family.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use relay_ai::ProviderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `FailoverReason` values.
pub enum FailoverReason {
    RateLimit,
    Billing,
    Auth,
    Overloaded,
    Timeout,
    Format,
    ContextOverflow,
    Unknown,
}

impl FailoverReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailoverReason::RateLimit => "rate_limit",
            FailoverReason::Billing => "billing",
            FailoverReason::Auth => "auth",
            FailoverReason::Overloaded => "overloaded",
            FailoverReason::Timeout => "timeout",
            FailoverReason::Format => "format",
            FailoverReason::ContextOverflow => "context_overflow",
            FailoverReason::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rate_limit" => Some(FailoverReason::RateLimit),
            "billing" => Some(FailoverReason::Billing),
            "auth" => Some(FailoverReason::Auth),
            "overloaded" => Some(FailoverReason::Overloaded),
            "timeout" => Some(FailoverReason::Timeout),
            "format" => Some(FailoverReason::Format),
            "context_overflow" => Some(FailoverReason::ContextOverflow),
            "unknown" => Some(FailoverReason::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
/// A failure already tagged with its failover reason.
pub struct FailoverError {
    pub message: String,
    pub reason: FailoverReason,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl FailoverError {
    pub fn new(message: impl Into<String>, reason: FailoverReason) -> Self {
        Self {
            message: message.into(),
            reason,
            provider: None,
            model: None,
            status: None,
            code: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of [`classify_failover_error`] for a recognized failure.
pub struct ClassifiedError {
    pub message: String,
    pub reason: FailoverReason,
    pub status: Option<u16>,
    pub code: Option<String>,
}

const TIMEOUT_TRANSPORT_CODES: &[&str] =
    &["ETIMEDOUT", "ESOCKETTIMEDOUT", "ECONNRESET", "ECONNABORTED"];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "too many requests",
    "exceeded your current quota",
    "resource has been exhausted",
    "resource_exhausted",
    "quota exceeded",
    "usage limit",
];
const OVERLOADED_PHRASES: &[&str] = &["overloaded"];
const FORMAT_PHRASES: &[&str] = &[
    "string should match pattern",
    "tool_use.id",
    "tool_use_id",
    "invalid request format",
];
const BILLING_PHRASES: &[&str] = &[
    "payment required",
    "insufficient credits",
    "insufficient balance",
    "credit balance",
    "plans & billing",
];
const AUTH_PHRASES: &[&str] = &[
    "incorrect api key",
    "invalid token",
    "authentication",
    "re-authenticate",
    "oauth token refresh failed",
    "unauthorized",
    "forbidden",
    "access denied",
    "token has expired",
    "expired",
    "no credentials found",
    "no api key found",
];
const CONTEXT_OVERFLOW_PHRASES: &[&str] = &[
    "request_too_large",
    "request exceeds the maximum size",
    "context length exceeded",
    "context_length_exceeded",
    "maximum context length",
    "prompt is too long",
    "exceeds model context window",
    "context overflow",
];

const RATE_LIMIT_PATTERN: &str = r"(?i)rate[_ ]limit|\b429\b";
const BILLING_PATTERN: &str = r"\b402\b";
const AUTH_PATTERN: &str = r"(?i)invalid[_ ]?api[_ ]?key|\b401\b|\b403\b";
const TIMEOUT_HINT_PATTERN: &str = r"(?i)timeout|timed out|deadline exceeded";
const CONTEXT_WINDOW_TOO_SMALL_PATTERN: &str = r"(?i)context window.*(too small|minimum is)";
const CONTEXT_OVERFLOW_HINT_PATTERN: &str = r"(?i)\bcontext window\b.*\b(too (large|long)|exceed(s|ed)?|over|limit|max(imum)?)\b|\b(prompt|input)\b.*\btoo (long|large)\b|\b(prompt|input|request)\b.*\bexceed(s|ed)?\b.*\b(context|window|length|tokens?)\b";
const IMAGE_SIZE_PATTERN: &str =
    r"(?i)\bimage\b.*\b(dimensions?|size)\b.*\bexceed|\bimage exceeds\b";

static RATE_LIMIT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BILLING_RE: OnceLock<Option<Regex>> = OnceLock::new();
static AUTH_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TIMEOUT_HINT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CONTEXT_WINDOW_TOO_SMALL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CONTEXT_OVERFLOW_HINT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static IMAGE_SIZE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern_matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(text))
}

fn has_timeout_hint(text: &str) -> bool {
    pattern_matches(&TIMEOUT_HINT_RE, TIMEOUT_HINT_PATTERN, text)
}

fn is_image_size_message(text: &str) -> bool {
    pattern_matches(&IMAGE_SIZE_RE, IMAGE_SIZE_PATTERN, text)
}

fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| lower.contains(phrase))
}

fn find_in_chain<T>(error: &anyhow::Error) -> Option<&T>
where
    T: std::error::Error + Send + Sync + 'static,
{
    error.chain().find_map(|cause| cause.downcast_ref::<T>())
}

fn is_rate_limit_message(lower: &str) -> bool {
    pattern_matches(&RATE_LIMIT_RE, RATE_LIMIT_PATTERN, lower)
        || contains_any(lower, RATE_LIMIT_PHRASES)
}

/// Message-only classification in fixed family order.
pub fn classify_failover_reason_from_message(message: &str) -> Option<FailoverReason> {
    let lower = message.to_ascii_lowercase();
    if is_image_size_message(&lower) {
        return None;
    }
    if is_rate_limit_message(&lower) {
        return Some(FailoverReason::RateLimit);
    }
    if contains_any(&lower, OVERLOADED_PHRASES) {
        return Some(FailoverReason::Overloaded);
    }
    if contains_any(&lower, FORMAT_PHRASES) {
        return Some(FailoverReason::Format);
    }
    if pattern_matches(&BILLING_RE, BILLING_PATTERN, &lower) || contains_any(&lower, BILLING_PHRASES)
    {
        return Some(FailoverReason::Billing);
    }
    if has_timeout_hint(&lower) {
        return Some(FailoverReason::Timeout);
    }
    if pattern_matches(&AUTH_RE, AUTH_PATTERN, &lower) || contains_any(&lower, AUTH_PHRASES) {
        return Some(FailoverReason::Auth);
    }
    None
}

fn reason_from_status(status: u16) -> Option<FailoverReason> {
    match status {
        402 => Some(FailoverReason::Billing),
        429 => Some(FailoverReason::RateLimit),
        401 | 403 => Some(FailoverReason::Auth),
        408 => Some(FailoverReason::Timeout),
        503 | 529 => Some(FailoverReason::Overloaded),
        _ => None,
    }
}

fn is_timeout_transport_code(code: &str) -> bool {
    TIMEOUT_TRANSPORT_CODES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(code.trim()))
}

/// HTTP status conventionally associated with a reason.
pub fn resolve_failover_status(reason: FailoverReason) -> Option<u16> {
    match reason {
        FailoverReason::Billing => Some(402),
        FailoverReason::RateLimit => Some(429),
        FailoverReason::Auth => Some(401),
        FailoverReason::Timeout => Some(408),
        FailoverReason::Format => Some(400),
        FailoverReason::Overloaded => Some(503),
        FailoverReason::ContextOverflow | FailoverReason::Unknown => None,
    }
}

fn is_timeout_shaped(error: &anyhow::Error) -> bool {
    if find_in_chain::<FailoverError>(error)
        .is_some_and(|tagged| tagged.reason == FailoverReason::Timeout)
    {
        return true;
    }
    match find_in_chain::<ProviderError>(error) {
        Some(ProviderError::Timeout(_)) => return true,
        Some(ProviderError::Aborted(reason)) if has_timeout_hint(reason) => {
            return true
        }
        Some(ProviderError::Transport { code, .. }) if is_timeout_transport_code(code) => {
            return true
        }
        _ => {}
    }
    find_in_chain::<std::io::Error>(error)
        .is_some_and(|io_error| io_error.kind() == std::io::ErrorKind::TimedOut)
}

/// True for timeouts, including aborts raised by a timeout signal.
pub fn is_timeout_error(error: &anyhow::Error) -> bool {
    is_timeout_shaped(error) || has_timeout_hint(&format!("{error:#}"))
}

/// A genuine user cancellation: an abort that is not also a timeout.
pub fn is_user_abort(error: &anyhow::Error) -> bool {
    find_in_chain::<ProviderError>(error).is_some_and(ProviderError::is_abort)
        && !is_timeout_error(error)
}

fn is_excluded_from_overflow(lower: &str) -> bool {
    lower.trim().is_empty()
        || pattern_matches(
            &CONTEXT_WINDOW_TOO_SMALL_RE,
            CONTEXT_WINDOW_TOO_SMALL_PATTERN,
            lower,
        )
        || is_rate_limit_message(lower)
        || lower.contains("deadline exceeded")
}

fn has_context_overflow_phrase(lower: &str) -> bool {
    contains_any(lower, CONTEXT_OVERFLOW_PHRASES)
        || (lower.contains("request size exceeds") && lower.contains("context window"))
        || (lower.contains("413") && lower.contains("too large"))
}

/// Heuristic for provider messages reporting an oversized prompt.
pub fn is_likely_context_overflow_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if is_excluded_from_overflow(&lower) {
        return false;
    }
    has_context_overflow_phrase(&lower)
        || pattern_matches(
            &CONTEXT_OVERFLOW_HINT_RE,
            CONTEXT_OVERFLOW_HINT_PATTERN,
            &lower,
        )
}

/// Context overflow from a tag, a payload, or the message. An HTTP status
/// that already maps to a retryable reason needs a payload or an explicit
/// overflow phrase; the loose hint pattern is not enough to override it.
pub fn is_context_overflow_error(error: &anyhow::Error) -> bool {
    if find_in_chain::<FailoverError>(error)
        .is_some_and(|tagged| tagged.reason == FailoverReason::ContextOverflow)
    {
        return true;
    }
    let text = format!("{error:#}");
    let has_retryable_status = find_in_chain::<ProviderError>(error)
        .and_then(ProviderError::status)
        .and_then(reason_from_status)
        .is_some();
    if !has_retryable_status {
        return is_likely_context_overflow_message(&text);
    }
    let lower = text.to_ascii_lowercase();
    reason_from_embedded_payload(&text) == Some(FailoverReason::ContextOverflow)
        || (!is_excluded_from_overflow(&lower) && has_context_overflow_phrase(&lower))
}

#[derive(Debug, Deserialize)]
struct EmbeddedErrorPayload {
    #[serde(default)]
    error: Option<EmbeddedErrorBody>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedErrorBody {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

fn reason_from_payload_kind(kind: &str) -> Option<FailoverReason> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "rate_limit_error" | "rate_limit_exceeded" | "resource_exhausted" => {
            Some(FailoverReason::RateLimit)
        }
        "overloaded_error" => Some(FailoverReason::Overloaded),
        "authentication_error" | "permission_error" | "invalid_api_key" => {
            Some(FailoverReason::Auth)
        }
        "billing_error" | "insufficient_quota" => Some(FailoverReason::Billing),
        "timeout_error" => Some(FailoverReason::Timeout),
        "request_too_large" | "context_length_exceeded" => Some(FailoverReason::ContextOverflow),
        _ => None,
    }
}

/// Maps a provider error payload embedded in free text, e.g.
/// `429 {"type":"error","error":{"type":"rate_limit_error"}}`.
fn reason_from_embedded_payload(text: &str) -> Option<FailoverReason> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let payload = serde_json::from_str::<EmbeddedErrorPayload>(&text[start..=end]).ok()?;
    let body = payload.error?;
    let code = body.code.as_ref().and_then(serde_json::Value::as_str);
    body.kind
        .as_deref()
        .and_then(reason_from_payload_kind)
        .or_else(|| code.and_then(reason_from_payload_kind))
}

/// Classifies a failure, or returns `None` when it is unrecognized.
pub fn classify_failover_error(error: &anyhow::Error) -> Option<ClassifiedError> {
    let message = error.to_string();
    if let Some(tagged) = find_in_chain::<FailoverError>(error) {
        return Some(ClassifiedError {
            message,
            reason: tagged.reason,
            status: tagged.status,
            code: tagged.code.clone(),
        });
    }

    let provider_error = find_in_chain::<ProviderError>(error);
    let status = provider_error.and_then(ProviderError::status);
    let code = provider_error
        .and_then(ProviderError::code)
        .map(str::to_string);
    let structural = status
        .and_then(reason_from_status)
        .or_else(|| is_timeout_shaped(error).then_some(FailoverReason::Timeout));

    let reason = match structural {
        Some(reason) => reason,
        None => {
            let text = format!("{error:#}");
            if is_image_size_message(&text) {
                return None;
            }
            reason_from_embedded_payload(&text)
                .or_else(|| {
                    is_likely_context_overflow_message(&text)
                        .then_some(FailoverReason::ContextOverflow)
                })
                .or_else(|| classify_failover_reason_from_message(&text))
                .or_else(|| status.map(|_| FailoverReason::Unknown))?
        }
    };

    Some(ClassifiedError {
        message,
        reason,
        status,
        code,
    })
}

/// Wraps a classifiable failure as a tagged [`FailoverError`] carrying the
/// provider and model it came from.
pub fn coerce_to_failover_error(
    error: &anyhow::Error,
    provider: &str,
    model: &str,
) -> Option<FailoverError> {
    if let Some(tagged) = find_in_chain::<FailoverError>(error) {
        let mut coerced = tagged.clone();
        coerced.provider.get_or_insert_with(|| provider.to_string());
        coerced.model.get_or_insert_with(|| model.to_string());
        return Some(coerced);
    }
    let classified = classify_failover_error(error)?;
    let mut coerced = FailoverError::new(classified.message, classified.reason)
        .with_provider(provider)
        .with_model(model);
    coerced.status = classified
        .status
        .or_else(|| resolve_failover_status(classified.reason));
    coerced.code = classified.code;
    Some(coerced)
}
