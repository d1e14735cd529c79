//! Command-line interface for onionprobe
//!
//! `onionprobe [global options] <test> [test options]`
//!
//! Global options are parsed here; everything after the test name goes
//! to a per-test parser built from the test's option spec.

mod options;
mod run;

pub use options::{parse_test_options, test_command};
pub use run::{execute, run_test, tor_service};

use crate::config::Config;
use crate::nettest::Registry;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

/// onionprobe - network censorship measurement probe
#[derive(Parser, Debug)]
#[command(name = "onionprobe")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Don't log to stdout
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Number of parallel tests to run
    #[arg(short = 'n', long)]
    pub parallelism: Option<usize>,

    /// Output report file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output log file
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Logging level (0-5)
    #[arg(short, long)]
    pub verbosity: Option<u8>,

    #[command(subcommand)]
    pub command: Option<TestCommand>,
}

/// Any test name followed by its own options
#[derive(Subcommand, Debug)]
pub enum TestCommand {
    #[command(external_subcommand)]
    Run(Vec<String>),
}

impl Cli {
    /// Test name and the arguments that followed it
    pub fn test(&self) -> Option<(&str, &[String])> {
        match &self.command {
            Some(TestCommand::Run(args)) => {
                let (name, rest) = args.split_first()?;
                Some((name.as_str(), rest))
            },
            None => None,
        }
    }

    /// Apply command-line overrides on top of the loaded config
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(parallelism) = self.parallelism {
            config.probe.parallelism = parallelism;
        }
        if let Some(output) = &self.output {
            config.probe.output = output.clone();
        }
        if let Some(log) = &self.log {
            config.probe.log = log.clone();
        }
        if let Some(verbosity) = self.verbosity {
            config.probe.verbosity = verbosity;
        }
        config
    }
}

/// Full help text with the registered tests listed under "Tests:"
pub fn help_text(registry: &Registry) -> String {
    let mut tests = String::from("Tests:\n");
    for test in registry.iter() {
        tests.push_str(&format!("  {:<14} {}\n", test.short_name(), test.description()));
    }

    Cli::command()
        .after_help(tests)
        .render_help()
        .to_string()
}
