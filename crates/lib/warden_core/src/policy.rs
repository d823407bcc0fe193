//! Timing knobs for the client lifecycle.

use chrono::Duration;

use crate::models::client;

/// Default period between cleanup sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 15 * 60;

/// Default age after which a never-approved client is deleted.
pub const DEFAULT_UNAPPROVED_MAX_AGE_SECS: i64 = 60 * 60;

/// Default age after which an enabled client is labelled expired.
pub const DEFAULT_STATUS_EXPIRY_AGE_SECS: i64 = 60 * 60;

/// Refresh-token lifetime assumed when a record carries none.
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_SECS: i64 =
    client::DEFAULT_REFRESH_TOKEN_LIFETIME_SECS as i64;

/// Upper bound accepted for any policy knob, ten years in seconds.
pub const MAX_POLICY_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Lifecycle timing policy.
///
/// `status_expiry_age` only affects the displayed status. Deletion of
/// approved clients is driven by refresh-token lifetime and live grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub sweep_interval: Duration,
    pub unapproved_max_age: Duration,
    pub status_expiry_age: Duration,
    pub default_refresh_token_lifetime: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::seconds(DEFAULT_SWEEP_INTERVAL_SECS),
            unapproved_max_age: Duration::seconds(DEFAULT_UNAPPROVED_MAX_AGE_SECS),
            status_expiry_age: Duration::seconds(DEFAULT_STATUS_EXPIRY_AGE_SECS),
            default_refresh_token_lifetime: Duration::seconds(
                DEFAULT_REFRESH_TOKEN_LIFETIME_SECS,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.sweep_interval, Duration::minutes(15));
        assert_eq!(policy.unapproved_max_age, Duration::hours(1));
        assert_eq!(policy.status_expiry_age, Duration::hours(1));
        assert_eq!(policy.default_refresh_token_lifetime, Duration::days(30));
    }
}
