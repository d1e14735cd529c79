//! TCP connect test
//!
//! Tries a plain TCP connection to every `host:port` input and records
//! whether it went through.

use super::{InputSpec, NetTest, OptionSpec, TestContext};
use crate::work::WorkItem;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub struct TcpConnect;

impl TcpConnect {
    fn timeout(ctx: &TestContext) -> Result<Duration> {
        let secs = ctx
            .options
            .parse::<u64>("timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Ok(Duration::from_secs(secs))
    }
}

/// Check an input is `host:port` with a numeric port
fn validate_target(input: &str) -> Result<()> {
    match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => bail!("expected host:port, got {:?}", input),
    }
}

/// Attempt one connection, returning the error text on failure
pub async fn try_connect(target: &str, timeout: Duration) -> Option<String> {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {:?}", timeout)),
    }
}

#[async_trait]
impl NetTest for TcpConnect {
    fn short_name(&self) -> &'static str {
        "tcp_connect"
    }

    fn description(&self) -> &'static str {
        "Check TCP reachability of host:port pairs"
    }

    fn options_spec(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("file", "File with one host:port per line").short('f'),
            OptionSpec::value("timeout", "Connect timeout in seconds")
                .short('t')
                .default_value("10"),
        ]
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::File {
            option: "file",
            required: true,
        }
    }

    async fn run_item(&self, ctx: &TestContext, item: WorkItem<String>) -> Result<Value> {
        validate_target(&item.payload)?;
        let timeout = Self::timeout(ctx)?;

        debug!("Connecting to {}", item.payload);
        let error = try_connect(&item.payload, timeout).await;

        Ok(json!({
            "input": item.payload,
            "connected": error.is_none(),
            "error": error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_validate_target() {
        assert!(validate_target("example.com:80").is_ok());
        assert!(validate_target("[::1]:443").is_ok());
        assert!(validate_target("example.com").is_err());
        assert!(validate_target(":80").is_err());
        assert!(validate_target("example.com:http").is_err());
    }

    #[tokio::test]
    async fn test_connect_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        assert_eq!(try_connect(&addr, Duration::from_secs(5)).await, None);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(try_connect(&addr, Duration::from_secs(5)).await.is_some());
    }
}
