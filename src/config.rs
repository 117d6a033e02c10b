//! Configuration management.
//!
//! Settings load from `config/<name>.toml` (default `config/default.toml`)
//! and map one-to-one onto the runtime structures: link parameters for the
//! two serial ports, the shared poll ceiling and the sequence definition.

use crate::dump::TerminationPolicy;
use crate::error::ScanError;
use crate::poll::PollConfig;
use crate::sequence::{DeviceProfile, RunMode, SequenceConfig};
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    pub links: LinkSettings,
    #[serde(default)]
    pub poll: PollConfig,
    pub sequence: SequenceSettings,
    pub storage: StorageSettings,
}

/// Serial parameters for the two instrument links.
#[derive(Debug, Deserialize, Clone)]
pub struct LinkSettings {
    pub motor_port: String,
    pub acq_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_motor_address")]
    pub motor_address: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SequenceSettings {
    pub run_mode: RunMode,
    pub termination: TerminationPolicy,
    #[serde(default)]
    pub setup_command: Option<String>,
    #[serde(default = "default_settle_first_ms")]
    pub settle_first_ms: u64,
    #[serde(default = "default_settle_second_ms")]
    pub settle_second_ms: u64,
    #[serde(default = "default_inter_profile_delay_ms")]
    pub inter_profile_delay_ms: u64,
    #[serde(default)]
    pub continue_on_persist_error: bool,
    pub profiles: Vec<DeviceProfile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub output_dir: String,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_motor_address() -> u8 {
    0x30
}

fn default_settle_first_ms() -> u64 {
    3000
}

fn default_settle_second_ms() -> u64 {
    5000
}

fn default_inter_profile_delay_ms() -> u64 {
    1000
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> Result<Self, ScanError> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(ScanError::Config)?;

        s.try_deserialize().map_err(ScanError::Config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.links.read_timeout_ms)
    }

    /// Assemble the runtime sequence configuration from the settings.
    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            profiles: self.sequence.profiles.clone(),
            run_mode: self.sequence.run_mode,
            termination: self.sequence.termination.clone(),
            setup_command: self.sequence.setup_command.clone(),
            settle_first: Duration::from_millis(self.sequence.settle_first_ms),
            settle_second: Duration::from_millis(self.sequence.settle_second_ms),
            inter_profile_delay: Duration::from_millis(self.sequence.inter_profile_delay_ms),
            poll: self.poll.clone(),
            continue_on_persist_error: self.sequence.continue_on_persist_error,
            ..SequenceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
log_level = "info"

[links]
motor_port = "COM3"
acq_port = "COM4"

[poll]
max_attempts = 500
interval_ms = 100

[sequence]
run_mode = "single_pass"
termination = { mode = "sentinel" }
setup_command = "SC,002,005"

[[sequence.profiles]]
label = "X"
initial = "X0+"
drive = "X-400"
destination = "acquired_data_X.csv"

[storage]
output_dir = "data"
"#;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn example_settings_parse_with_defaults() {
        let settings = parse(EXAMPLE);

        assert_eq!(settings.links.baud_rate, 9600);
        assert_eq!(settings.links.motor_address, 0x30);
        assert_eq!(settings.read_timeout(), Duration::from_secs(1));
        assert_eq!(settings.poll.max_attempts, 500);

        let sequence = settings.sequence_config();
        assert_eq!(sequence.run_mode, RunMode::SinglePass);
        assert_eq!(sequence.termination, TerminationPolicy::sentinel_default());
        assert_eq!(sequence.setup_command.as_deref(), Some("SC,002,005"));
        assert_eq!(sequence.settle_first, Duration::from_secs(3));
        assert_eq!(sequence.profiles.len(), 1);
        assert!(!sequence.continue_on_persist_error);
        assert_eq!(sequence.arm_command, "A");
    }

    #[test]
    fn count_termination_defaults_to_observed_shape() {
        let toml = EXAMPLE.replace(
            r#"termination = { mode = "sentinel" }"#,
            r#"termination = { mode = "count" }"#,
        );
        let settings = parse(&toml);
        assert_eq!(
            settings.sequence.termination,
            TerminationPolicy::count_default()
        );
    }
}
