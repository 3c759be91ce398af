//! Bridge from the tgmconfig configuration to a [`SessionPolicy`].
//!
//! Only compiled with the `tgmconfig` feature, so the core stays
//! usable with a hand-built policy in tests and embeddings.

use std::time::Duration;

use crate::model::SessionPolicy;
use tgmconfig::Config;

impl SessionPolicy {
    /// Build a policy from the loaded configuration. Knobs the
    /// configuration does not expose (sweep cadence) keep their
    /// defaults.
    pub fn from_config(config: &Config) -> Self {
        let defaults = SessionPolicy::default();
        Self {
            min_member_count: config.min_member_count,
            default_platform: config.default_platform,
            fallback_platforms: config.fallback_platforms.clone(),
            max_queue_size: Some(config.max_queue_size),
            resolve_slots: config.resolve_slots,
            idle_grace: Duration::from_secs(config.idle_grace_secs),
            sweep_interval: defaults.sweep_interval,
            auto_end_empty_calls: config.auto_end_empty_calls,
        }
    }
}
