//! Process-level run ID for tracking executor and API instances.
//!
//! Each process gets a unique ULID at startup. Every auto-execute batch and
//! learning refresh logs this ID, which makes it possible to tell which run
//! produced a given execution record or bias change.

use once_cell::sync::Lazy;
use ulid::Ulid;

/// Process-level run ID, generated once at first access.
static RUN_ID: Lazy<String> = Lazy::new(|| Ulid::new().to_string());

/// Returns the process-level run ID.
///
/// Generated once per process, time-ordered (ULIDs sort lexicographically by
/// creation time), 26 characters, URL-safe.
#[inline]
pub fn get() -> &'static str {
    &RUN_ID
}

/// Generates a fresh ULID for sub-operations (batch runs, request IDs).
#[inline]
pub fn generate() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_same_value() {
        let first = get();
        let second = get();
        assert_eq!(first, second);
        assert_eq!(first.len(), 26);
    }

    #[test]
    fn generate_returns_unique_values() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }
}
