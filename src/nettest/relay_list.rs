//! Relay directory dump
//!
//! Starts Tor and writes the guards and routers it knows about into the
//! report.

use super::{NetTest, OptionSpec, TestContext};
use crate::report::fragment;
use crate::tor::RelayId;
use crate::work::WorkItem;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub struct RelayList;

fn fingerprints<'a, I>(relays: I, limit: Option<usize>) -> Value
where
    I: IntoIterator<Item = &'a RelayId>,
{
    let iter = relays.into_iter().map(|r| Value::from(r.fingerprint()));
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

#[async_trait]
impl NetTest for RelayList {
    fn short_name(&self) -> &'static str {
        "relay_list"
    }

    fn description(&self) -> &'static str {
        "Record the relays known to a freshly started Tor"
    }

    fn options_spec(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("limit", "Record at most this many relays per list").short('l'),
            OptionSpec::flag("guards-only", "Skip the full router list"),
        ]
    }

    fn is_tool(&self) -> bool {
        true
    }

    async fn run_tool(&self, ctx: &TestContext) -> Result<()> {
        let limit = ctx.options.parse::<usize>("limit")?;
        let session = ctx.tor.session().await.context("Tor did not start")?;
        let directory = session.directory();

        let mut summary = fragment([
            ("guard_count", Value::from(directory.entry_guards().len())),
            ("router_count", Value::from(directory.routers().len())),
            ("entry_guards", fingerprints(directory.entry_guards(), limit)),
        ]);
        if !ctx.options.flag("guards-only") {
            summary.insert("routers".to_string(), fingerprints(directory.routers(), limit));
        }
        ctx.report.update(summary);
        Ok(())
    }

    async fn run_item(&self, _ctx: &TestContext, _item: WorkItem<String>) -> Result<Value> {
        bail!("relay_list runs as a tool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_limit() {
        let relays: Vec<RelayId> = (1..=3).map(|n: u8| RelayId::new(&hex::encode_upper([n; 20]))).collect();

        assert_eq!(fingerprints(&relays, None).as_array().unwrap().len(), 3);
        assert_eq!(fingerprints(&relays, Some(2)).as_array().unwrap().len(), 2);
    }
}
