use thiserror::Error;

#[derive(Debug, Error)]
/// Failures raised by provider calls handed to the failover engine.
pub enum ProviderError {
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("transport error {code}: {message}")]
    Transport { code: String, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing credential for provider '{0}'")]
    MissingCredential(String),
}

impl ProviderError {
    /// Error-kind name, mirroring the names transport layers attach.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderError::Aborted(_) => "AbortError",
            ProviderError::Timeout(_) => "TimeoutError",
            ProviderError::HttpStatus { .. } => "HttpStatusError",
            ProviderError::Transport { .. } => "TransportError",
            ProviderError::InvalidResponse(_) => "InvalidResponseError",
            ProviderError::MissingCredential(_) => "MissingCredentialError",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Transport { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ProviderError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderError;

    #[test]
    fn unit_accessors_expose_status_and_code() {
        let http = ProviderError::HttpStatus {
            status: 429,
            body: "slow down".to_string(),
        };
        assert_eq!(http.status(), Some(429));
        assert_eq!(http.code(), None);
        assert_eq!(
            http.to_string(),
            "provider returned non-success status 429: slow down"
        );

        let transport = ProviderError::Transport {
            code: "ECONNRESET".to_string(),
            message: "socket hang up".to_string(),
        };
        assert_eq!(transport.code(), Some("ECONNRESET"));
        assert_eq!(transport.status(), None);
    }

    #[test]
    fn unit_only_aborted_variant_reports_abort() {
        assert!(ProviderError::Aborted("user".to_string()).is_abort());
        assert_eq!(ProviderError::Aborted("user".to_string()).name(), "AbortError");
        assert!(!ProviderError::Timeout("30s".to_string()).is_abort());
    }
}
