use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use shared::error::TrackerError;

use crate::ledger::LedgerWindows;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub grace_period_ms: i64,
    pub maximum_late_decryption_period_ms: i64,
    pub check_interval_ms: u64,
    pub track_interval_ms: u64,
    pub well_known_provider_domain: String,
    pub rust_crypto_version_prefix: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 4_000,
            maximum_late_decryption_period_ms: 60_000,
            check_interval_ms: 40_000,
            track_interval_ms: 60_000,
            well_known_provider_domain: "matrix.org".into(),
            rust_crypto_version_prefix: "Rust SDK".into(),
        }
    }
}

impl TrackerSettings {
    pub fn windows(&self) -> LedgerWindows {
        LedgerWindows {
            grace_period_ms: self.grace_period_ms,
            maximum_late_decryption_period_ms: self.maximum_late_decryption_period_ms,
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn track_interval(&self) -> Duration {
        Duration::from_millis(self.track_interval_ms)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.check_interval_ms == 0 || self.track_interval_ms == 0 {
            return Err(TrackerError::InvalidSettings(
                "check and track intervals must be non-zero".into(),
            ));
        }
        if self.grace_period_ms < 0 {
            return Err(TrackerError::InvalidSettings(format!(
                "grace period must not be negative, got {}",
                self.grace_period_ms
            )));
        }
        if self.grace_period_ms > self.maximum_late_decryption_period_ms {
            return Err(TrackerError::InvalidSettings(format!(
                "grace period {}ms exceeds the late decryption window {}ms",
                self.grace_period_ms, self.maximum_late_decryption_period_ms
            )));
        }
        Ok(())
    }
}

/// Reads the optional settings file, then applies `UTD_*` environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<TrackerSettings> {
    let mut settings = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read tracker settings '{}'", path.display()))?;
            toml::from_str::<TrackerSettings>(&raw)
                .with_context(|| format!("failed to parse tracker settings '{}'", path.display()))?
        }
        None => TrackerSettings::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn apply_env_overrides(settings: &mut TrackerSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("UTD_GRACE_PERIOD_MS").and_then(|v| v.parse().ok()) {
        settings.grace_period_ms = v;
    }
    if let Some(v) = var("UTD_MAXIMUM_LATE_DECRYPTION_PERIOD_MS").and_then(|v| v.parse().ok()) {
        settings.maximum_late_decryption_period_ms = v;
    }
    if let Some(v) = var("UTD_CHECK_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        settings.check_interval_ms = v;
    }
    if let Some(v) = var("UTD_TRACK_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        settings.track_interval_ms = v;
    }
    if let Some(v) = var("UTD_WELL_KNOWN_PROVIDER_DOMAIN") {
        settings.well_known_provider_domain = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
