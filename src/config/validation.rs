//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::Config;
use anyhow::{bail, Result};

/// Highest accepted verbosity level
const MAX_VERBOSITY: u8 = 5;

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_probe(config)?;
    validate_tor(config)?;
    validate_circuit(config)?;
    Ok(())
}

fn validate_probe(config: &Config) -> Result<()> {
    if config.probe.parallelism == 0 {
        bail!("probe.parallelism must be at least 1");
    }

    if config.probe.verbosity > MAX_VERBOSITY {
        bail!(
            "probe.verbosity ({}) must be at most {}",
            config.probe.verbosity,
            MAX_VERBOSITY
        );
    }

    if config.probe.item_timeout_secs == Some(0) {
        bail!("probe.item_timeout_secs cannot be 0");
    }

    Ok(())
}

fn validate_tor(config: &Config) -> Result<()> {
    if config.tor.binary.as_os_str().is_empty() {
        bail!("tor.binary cannot be empty");
    }

    if config.tor.control_port == 0 {
        bail!("tor.control_port cannot be 0");
    }
    if config.tor.socks_port == 0 {
        bail!("tor.socks_port cannot be 0");
    }
    if config.tor.control_port == config.tor.socks_port {
        bail!(
            "tor.control_port and tor.socks_port must differ (both {})",
            config.tor.control_port
        );
    }

    Ok(())
}

fn validate_circuit(config: &Config) -> Result<()> {
    for (raw, relay) in config.circuit.relay_pool.iter().zip(config.circuit.relay_pool()) {
        if !relay.is_fingerprint() {
            bail!("circuit.relay_pool entry {:?} is not a relay fingerprint", raw);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        config.probe.parallelism = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.probe.verbosity = 6;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.tor.socks_port = config.tor.control_port;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.tor.binary = PathBuf::new();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.circuit.relay_pool = vec!["not-a-relay".to_string()];
        assert!(validate(&config).is_err());
    }
}
