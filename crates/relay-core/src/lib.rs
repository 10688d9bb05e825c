//! Foundational low-level utilities shared across relay crates.
//!
//! Provides the atomic file-write helper used by the auth profile store and
//! the millisecond clock and the expiry check used for token and OAuth
//! credential validity.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp_ms, is_expired_unix_ms};
