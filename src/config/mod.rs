//! Configuration loading and validation
//!
//! Handles TOML configuration parsing with strict validation.
//! No runtime mutation - configuration is immutable after load.

pub mod file;
mod validation;

pub use file::{load_config, load_from_path};
pub use validation::validate;

use crate::tor::{LaunchConfig, RelayId, RetryPolicy};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

/// Run-wide probe settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Work items run at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Report output path
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Log file path
    #[serde(default = "default_log")]
    pub log: PathBuf,
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    /// Per-item deadline; unset means no deadline
    pub item_timeout_secs: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            output: default_output(),
            log: default_log(),
            verbosity: default_verbosity(),
            item_timeout_secs: None,
        }
    }
}

impl ProbeConfig {
    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_secs.map(Duration::from_secs)
    }
}

fn default_parallelism() -> usize {
    10
}
fn default_output() -> PathBuf {
    PathBuf::from("report.log")
}
fn default_log() -> PathBuf {
    PathBuf::from("oonicli.log")
}
fn default_verbosity() -> u8 {
    1
}

/// Tor daemon launch and control settings
#[derive(Debug, Clone, Deserialize)]
pub struct TorConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_control_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    /// Data directory; a temporary one is created when unset
    pub data_dir: Option<PathBuf>,
    pub control_password: Option<String>,
    /// Extra `Key Value` torrc lines
    #[serde(default)]
    pub extra_torrc: Vec<String>,
    /// Bridge lines; enables `UseBridges` when non-empty
    #[serde(default)]
    pub bridges: Vec<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            control_host: default_control_host(),
            control_port: default_control_port(),
            socks_port: default_socks_port(),
            data_dir: None,
            control_password: None,
            extra_torrc: Vec::new(),
            bridges: Vec::new(),
        }
    }
}

impl TorConfig {
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            binary: self.binary.clone(),
            control_host: self.control_host.clone(),
            control_port: self.control_port,
            socks_port: self.socks_port,
            data_dir: self.data_dir.clone(),
            control_password: self.control_password.clone(),
            bridges: self.bridges.clone(),
            extra_torrc: self.extra_torrc.clone(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("tor")
}
fn default_control_host() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    9052
}
fn default_socks_port() -> u16 {
    9050
}

/// Circuit building settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CircuitConfig {
    /// Unset retries failed circuits without limit
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: u64,
    /// Pre-vetted relay fingerprints used for circuits built without an
    /// explicit path; popped from the end, three per circuit
    #[serde(default)]
    pub relay_pool: Vec<String>,
}

impl CircuitConfig {
    pub fn relay_pool(&self) -> Vec<RelayId> {
        self.relay_pool.iter().map(|raw| RelayId::new(raw)).collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.probe.parallelism, 10);
        assert_eq!(config.probe.output, PathBuf::from("report.log"));
        assert_eq!(config.probe.log, PathBuf::from("oonicli.log"));
        assert_eq!(config.tor.control_port, 9052);
        assert!(config.circuit.max_retries.is_none());
        assert!(config.circuit.relay_pool().is_empty());
        assert!(config.probe.item_timeout().is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
[probe]
parallelism = 4
item_timeout_secs = 30

[tor]
binary = "/usr/sbin/tor"
bridges = ["1.2.3.4:443"]

[circuit]
max_retries = 5
retry_delay_secs = 2
relay_pool = ["$aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa~first"]
"#,
        )
        .unwrap();

        assert_eq!(config.probe.parallelism, 4);
        assert_eq!(config.probe.item_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.tor.launch_config().bridges, vec!["1.2.3.4:443".to_string()]);

        let policy = config.circuit.retry_policy();
        assert_eq!(policy.max_retries, Some(5));
        assert_eq!(policy.delay, Duration::from_secs(2));
        assert_eq!(
            config.circuit.relay_pool(),
            vec![RelayId::new("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")]
        );
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(toml::from_str::<Config>("[wireguard]\nlisten_port = 1").is_err());
    }
}
