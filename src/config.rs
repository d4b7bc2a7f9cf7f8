//! TOML configuration loading and validation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::chain::RiskProfile;
use crate::error::{Error, Result};
use crate::scheduler::RebalanceSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine timing and retention knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Scheduler poll resolution.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Pause between consecutive on-chain operations.
    #[serde(default = "default_op_delay")]
    pub per_operation_delay_ms: u64,
    /// Run records kept per wallet.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_op_delay() -> u64 {
    750
}
fn default_history_cap() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_secs: default_tick_secs(),
            per_operation_delay_ms: default_op_delay(),
            history_cap: default_history_cap(),
        }
    }
}

impl EngineConfig {
    pub fn per_operation_delay(&self) -> Duration {
        Duration::from_millis(self.per_operation_delay_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

/// Settings applied to wallets that have never stored any.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: f64,
    #[serde(default = "default_true")]
    pub preserve_staked_positions: bool,
    #[serde(default)]
    pub risk_profile: RiskProfile,
}

fn default_interval_hours() -> u32 {
    24
}
fn default_threshold_pct() -> f64 {
    5.0
}
fn default_max_slippage_pct() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        DefaultsConfig {
            interval_hours: default_interval_hours(),
            threshold_pct: default_threshold_pct(),
            max_slippage_pct: default_max_slippage_pct(),
            preserve_staked_positions: default_true(),
            risk_profile: RiskProfile::default(),
        }
    }
}

impl DefaultsConfig {
    /// Settings for a wallet with no stored policy.
    pub fn settings(&self) -> RebalanceSettings {
        RebalanceSettings {
            enabled: false,
            interval_hours: self.interval_hours,
            threshold_pct: self.threshold_pct,
            max_slippage_pct: self.max_slippage_pct,
            preserve_staked_positions: self.preserve_staked_positions,
            risk_profile: self.risk_profile,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_secs == 0 {
            return Err(Error::Config("tick_secs must be > 0".into()));
        }
        if self.engine.per_operation_delay_ms > 60_000 {
            return Err(Error::Config(
                "per_operation_delay_ms must be <= 60000".into(),
            ));
        }
        if self.engine.history_cap == 0 {
            return Err(Error::Config("history_cap must be > 0".into()));
        }
        // Default settings must themselves pass the per-wallet validation.
        self.defaults
            .settings()
            .validate()
            .map_err(|e| Error::Config(format!("defaults: {e}")))?;
        Ok(())
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[engine]
tick_secs = 60
per_operation_delay_ms = 750
history_cap = 10

[defaults]
interval_hours = 24
threshold_pct = 5.0
max_slippage_pct = 1.0
preserve_staked_positions = true
risk_profile = "balanced"

[logging]
dir = "./logs"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(config.engine.tick_secs, 60);
        assert_eq!(config.engine.per_operation_delay_ms, 750);
        assert_eq!(config.defaults.threshold_pct, 5.0);
        assert_eq!(config.defaults.risk_profile, RiskProfile::Balanced);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.tick_secs, 60);
        assert_eq!(config.engine.history_cap, 10);
        assert!(config.defaults.preserve_staked_positions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_catches_zero_tick() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.engine.tick_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_zero_history_cap() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.engine.history_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_defaults() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.defaults.threshold_pct = 99.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn audit_path() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(
            config.audit_path(),
            std::path::PathBuf::from("./logs/audit.jsonl")
        );
    }

    #[test]
    fn default_settings_start_disabled() {
        let config = Config::default();
        let settings = config.defaults.settings();
        assert!(!settings.enabled);
        assert!(settings.next_run_at.is_none());
    }
}
