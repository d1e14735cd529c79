//! Relay reachability through Tor
//!
//! For every relay fingerprint in the input, asks the shared Tor session
//! for a circuit that uses that relay as its first hop and records
//! whether the circuit was built in time.

use super::{InputSpec, NetTest, OptionSpec, TestContext};
use crate::report::fragment;
use crate::tor::{RelayId, TorError};
use crate::work::WorkItem;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct Bridget;

#[async_trait]
impl NetTest for Bridget {
    fn short_name(&self) -> &'static str {
        "bridget"
    }

    fn description(&self) -> &'static str {
        "Build a Tor circuit through each listed relay"
    }

    fn options_spec(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("file", "File with one relay fingerprint per line").short('f'),
            OptionSpec::value("timeout", "Seconds to wait for each circuit")
                .short('t')
                .default_value("60"),
        ]
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::File {
            option: "file",
            required: true,
        }
    }

    /// Launch Tor before any relay is tried
    async fn setup(&self, ctx: &TestContext) -> Result<()> {
        let session = ctx.tor.session().await.context("Tor did not start")?;
        ctx.report.update(fragment([
            ("torrc", Value::from(session.torrc())),
            ("routers", Value::from(session.directory().routers().len())),
        ]));
        Ok(())
    }

    async fn run_item(&self, ctx: &TestContext, item: WorkItem<String>) -> Result<Value> {
        let relay = RelayId::new(&item.payload);
        if !relay.is_fingerprint() {
            bail!("not a relay fingerprint: {:?}", item.payload);
        }
        let timeout = Duration::from_secs(
            ctx.options
                .parse::<u64>("timeout")?
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        let session = ctx.tor.session().await?;
        let attacher = session.attacher();
        let already_in_circuit = attacher.is_hop_in_use(&relay);
        if already_in_circuit {
            debug!("{} is already a hop in a built circuit", relay);
        }

        let path = session
            .directory()
            .path_through(&relay)
            .ok_or(TorError::NoRelays)?;
        let request = attacher.request_circuit_build(Some(path))?;

        let outcome = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(circuit)) => {
                info!("Circuit {} through {} built", circuit.id, relay);
                json!({
                    "built": true,
                    "circuit_id": circuit.id.0,
                    "path": circuit.path_string(),
                })
            },
            Ok(Err(e)) => json!({ "built": false, "error": e.to_string() }),
            Err(_) => json!({
                "built": false,
                "error": format!("no circuit after {:?}", timeout),
            }),
        };

        let mut entry = json!({
            "input": item.payload,
            "relay": relay.fingerprint(),
            "already_in_circuit": already_in_circuit,
        });
        if let (Value::Object(entry), Value::Object(outcome)) = (&mut entry, outcome) {
            entry.extend(outcome);
        }
        Ok(entry)
    }
}
