#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_ai::{model_key, ModelRef, DEFAULT_PROVIDER};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(model_ref) = ModelRef::parse_with_default(&raw, DEFAULT_PROVIDER) {
        assert!(!model_ref.provider.is_empty());
        assert!(!model_ref.model.is_empty());
        assert_eq!(model_ref.key(), model_key(&model_ref.provider, &model_ref.model));
    }
});
