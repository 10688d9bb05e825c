//! Provider-call vocabulary shared between the agent runtime and the
//! failover engine: model references and the error type model calls raise.
mod error;
mod provider;

pub use error::ProviderError;
pub use provider::{
    model_key, normalize_provider_id, ModelRef, ModelRefParseError, DEFAULT_MODEL,
    DEFAULT_PROVIDER,
};
