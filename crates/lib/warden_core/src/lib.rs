//! # warden_core
//!
//! Lifecycle logic for dynamically registered OAuth clients: quarantine at
//! registration, administrative approval, and the periodic cleanup sweep.

pub mod cleanup;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod policy;
pub mod registration;
pub mod seed;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
