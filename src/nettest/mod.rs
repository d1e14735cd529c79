//! Network tests
//!
//! A test declares its options and inputs through [`NetTest`] and runs
//! either once as a tool or once per input item under the worker.

pub mod bridget;
pub mod registry;
pub mod relay_list;
pub mod tcp_connect;

pub use registry::{Registry, RegistryError};

use crate::config::Config;
use crate::report::Report;
use crate::tor::TorService;
use crate::work::{InputSource, WorkItem};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Option name every test accepts for resuming a run
pub const RESUME_OPTION: &str = "resume";

/// One command-line option of a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub long: &'static str,
    pub short: Option<char>,
    pub help: &'static str,
    pub default: Option<&'static str>,
    /// `false` for on/off flags
    pub takes_value: bool,
}

impl OptionSpec {
    pub fn value(long: &'static str, help: &'static str) -> Self {
        Self {
            long,
            short: None,
            help,
            default: None,
            takes_value: true,
        }
    }

    pub fn flag(long: &'static str, help: &'static str) -> Self {
        Self {
            long,
            short: None,
            help,
            default: None,
            takes_value: false,
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn default_value(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// Where a test's work items come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// Runs a single item with an empty input
    None,
    /// One item per line of the file named by `option`
    File {
        option: &'static str,
        required: bool,
    },
}

/// Option values given to a test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestOptions {
    values: BTreeMap<String, String>,
    flags: BTreeSet<String>,
    resume: usize,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_flag(mut self, name: &str) -> Self {
        self.flags.insert(name.to_string());
        self
    }

    pub fn with_resume(mut self, resume: usize) -> Self {
        self.resume = resume;
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Parse an option value, if present
    pub fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(name)
            .map(|raw| {
                raw.parse::<T>()
                    .with_context(|| format!("Invalid value for --{}: {}", name, raw))
            })
            .transpose()
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn resume(&self) -> usize {
        self.resume
    }
}

/// Shared state handed to a running test
pub struct TestContext {
    pub report: Arc<Report>,
    pub tor: Arc<TorService>,
    pub config: Arc<Config>,
    pub options: TestOptions,
}

/// A network test
#[async_trait]
pub trait NetTest: Send + Sync + 'static {
    /// Name used on the command line and in reports
    fn short_name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn options_spec(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::None
    }

    /// Tools run once through `run_tool` instead of per item
    fn is_tool(&self) -> bool {
        false
    }

    /// Ended tests are registered but do nothing when run
    fn ended(&self) -> bool {
        false
    }

    /// Called once before any item is dispatched
    async fn setup(&self, _ctx: &TestContext) -> Result<()> {
        Ok(())
    }

    async fn run_tool(&self, _ctx: &TestContext) -> Result<()> {
        bail!("{} is not a tool", self.short_name())
    }

    /// Measure one input, returning the report entry
    async fn run_item(&self, ctx: &TestContext, item: WorkItem<String>) -> Result<Value>;
}

/// Resolve the input source of `test` from its options
pub fn input_source(test: &dyn NetTest, options: &TestOptions) -> Result<InputSource> {
    match test.input_spec() {
        InputSpec::None => Ok(InputSource::Inline(vec![String::new()])),
        InputSpec::File { option, required } => match options.get(option) {
            Some(path) => Ok(InputSource::File(PathBuf::from(path))),
            None if required => bail!("{} needs --{}", test.short_name(), option),
            None => Ok(InputSource::None),
        },
    }
}

/// Every test shipped with the probe
pub fn builtin_tests() -> Vec<Arc<dyn NetTest>> {
    vec![
        Arc::new(tcp_connect::TcpConnect),
        Arc::new(bridget::Bridget),
        Arc::new(relay_list::RelayList),
    ]
}
