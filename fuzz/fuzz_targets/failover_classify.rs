#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_ai::ProviderError;
use relay_provider::{classify_failover_error, FailoverReason};

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data).into_owned();
    let status = data
        .first()
        .map(|byte| 400 + u16::from(*byte % 130))
        .unwrap_or(500);
    let error = anyhow::Error::new(ProviderError::HttpStatus { status, body: body.clone() });
    if let Some(classified) = classify_failover_error(&error) {
        assert_eq!(FailoverReason::parse(classified.reason.as_str()), Some(classified.reason));
    }
    let _ = classify_failover_error(&anyhow::Error::msg(body));
});
