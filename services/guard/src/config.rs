//! Guard service configuration
//!
//! Defaults are overlaid by `GUARD_*` environment variables, e.g.
//! `GUARD_MAX_DEVICES_PER_DAY=5` or `GUARD_ADVISORY_LOCK_ENABLED=true`.

use anyhow::{Result, bail};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

use crate::geo::GeoConfig;
use crate::lockout::LockoutPolicy;

/// Guard settings
#[derive(Debug, Clone, Deserialize)]
pub struct GuardSettings {
    /// Distinct devices allowed per UTC day before the account locks
    pub max_devices_per_day: u32,
    /// Lock length applied by the device velocity check
    pub lock_duration_hours: u32,
    /// Upper bound for any lock, automatic or administrative
    pub max_lock_duration_hours: u32,
    /// Age after which ledger and audit rows are purged
    pub retention_days: u32,
    /// Cron expression (with seconds) for the retention job
    pub purge_schedule: String,
    pub geo_enabled: bool,
    pub geo_base_url: String,
    pub geo_timeout_ms: u64,
    /// Minimum spacing between two geolocation lookups for one user
    pub geo_tracking_interval_secs: u64,
    /// Wrap session termination in a per-user Redis claim
    pub advisory_lock_enabled: bool,
    pub advisory_lock_ttl_ms: u64,
    pub bind_address: String,
    /// Shared secret expected in `x-internal-key` on `/internal` routes
    #[serde(default)]
    pub internal_api_key: Option<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_devices_per_day: 3,
            lock_duration_hours: 24,
            max_lock_duration_hours: 720, // 30 days
            retention_days: 90,
            purge_schedule: "0 0 3 * * *".to_string(), // daily at 03:00
            geo_enabled: true,
            geo_base_url: GeoConfig::default().base_url,
            geo_timeout_ms: 3000,
            geo_tracking_interval_secs: 3600,
            advisory_lock_enabled: false,
            advisory_lock_ttl_ms: 5000,
            bind_address: "0.0.0.0:3000".to_string(),
            internal_api_key: None,
        }
    }
}

impl GuardSettings {
    /// Load settings from defaults and `GUARD_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = GuardSettings::default();

        let settings: GuardSettings = Config::builder()
            .set_default("max_devices_per_day", i64::from(defaults.max_devices_per_day))?
            .set_default("lock_duration_hours", i64::from(defaults.lock_duration_hours))?
            .set_default(
                "max_lock_duration_hours",
                i64::from(defaults.max_lock_duration_hours),
            )?
            .set_default("retention_days", i64::from(defaults.retention_days))?
            .set_default("purge_schedule", defaults.purge_schedule.as_str())?
            .set_default("geo_enabled", defaults.geo_enabled)?
            .set_default("geo_base_url", defaults.geo_base_url.as_str())?
            .set_default("geo_timeout_ms", defaults.geo_timeout_ms as i64)?
            .set_default(
                "geo_tracking_interval_secs",
                defaults.geo_tracking_interval_secs as i64,
            )?
            .set_default("advisory_lock_enabled", defaults.advisory_lock_enabled)?
            .set_default("advisory_lock_ttl_ms", defaults.advisory_lock_ttl_ms as i64)?
            .set_default("bind_address", defaults.bind_address.as_str())?
            .add_source(Environment::with_prefix("GUARD").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would break the lock invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_devices_per_day == 0 {
            bail!("max_devices_per_day must be at least 1");
        }
        if self.lock_duration_hours == 0 {
            bail!("lock_duration_hours must be at least 1");
        }
        if self.lock_duration_hours > self.max_lock_duration_hours {
            bail!(
                "lock_duration_hours ({}) exceeds max_lock_duration_hours ({})",
                self.lock_duration_hours,
                self.max_lock_duration_hours
            );
        }
        if self.retention_days == 0 {
            bail!("retention_days must be at least 1");
        }
        if self.geo_timeout_ms == 0 || self.geo_timeout_ms > 3000 {
            bail!("geo_timeout_ms must be between 1 and 3000");
        }
        Ok(())
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_devices_per_day: self.max_devices_per_day,
            lock_duration_hours: self.lock_duration_hours,
            max_lock_duration_hours: self.max_lock_duration_hours,
        }
    }

    pub fn geo_config(&self) -> GeoConfig {
        GeoConfig {
            base_url: self.geo_base_url.clone(),
            timeout: Duration::from_millis(self.geo_timeout_ms),
        }
    }

    pub fn geo_tracking_interval(&self) -> Duration {
        Duration::from_secs(self.geo_tracking_interval_secs)
    }

    pub fn advisory_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.advisory_lock_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "GUARD_MAX_DEVICES_PER_DAY",
        "GUARD_LOCK_DURATION_HOURS",
        "GUARD_ADVISORY_LOCK_ENABLED",
        "GUARD_INTERNAL_API_KEY",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        clear_env();

        let settings = GuardSettings::from_env().unwrap();
        assert_eq!(settings.max_devices_per_day, 3);
        assert_eq!(settings.lock_duration_hours, 24);
        assert_eq!(settings.retention_days, 90);
        assert!(!settings.advisory_lock_enabled);
        assert!(settings.internal_api_key.is_none());
        assert_eq!(settings.geo_config().timeout, Duration::from_secs(3));
    }

    #[test]
    #[serial]
    fn test_settings_from_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("GUARD_MAX_DEVICES_PER_DAY", "5");
            std::env::set_var("GUARD_ADVISORY_LOCK_ENABLED", "true");
            std::env::set_var("GUARD_INTERNAL_API_KEY", "s3cret-key");
        }

        let settings = GuardSettings::from_env().unwrap();
        assert_eq!(settings.max_devices_per_day, 5);
        assert!(settings.advisory_lock_enabled);
        assert_eq!(settings.internal_api_key.as_deref(), Some("s3cret-key"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_lock_duration_above_maximum_is_rejected() {
        clear_env();
        unsafe {
            std::env::set_var("GUARD_LOCK_DURATION_HOURS", "100000");
        }

        assert!(GuardSettings::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_zero_device_allowance_is_rejected() {
        let settings = GuardSettings {
            max_devices_per_day: 0,
            ..GuardSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
