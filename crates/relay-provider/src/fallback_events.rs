//! JSON fallback events for telemetry and UI consumers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::model_fallback::{ErrorObserver, FallbackErrorEvent};

pub type FallbackEventSink = Arc<dyn Fn(Value) + Send + Sync>;

pub fn fallback_event_json(event: &FallbackErrorEvent<'_>) -> Value {
    json!({
        "type": "provider_fallback",
        "provider": event.provider,
        "model": event.model,
        "error": event.error.to_string(),
        "reason": event.reason.map(|reason| reason.as_str()),
        "attempt": event.attempt,
        "total": event.total,
    })
}

/// Forwards every failed attempt to a sink as a `provider_fallback` event.
pub struct JsonEventObserver {
    sink: FallbackEventSink,
}

impl JsonEventObserver {
    pub fn new(sink: FallbackEventSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ErrorObserver for JsonEventObserver {
    async fn on_error(&self, event: FallbackErrorEvent<'_>) {
        (self.sink)(fallback_event_json(&event));
    }
}
