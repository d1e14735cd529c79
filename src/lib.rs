//! onionprobe library crate
//!
//! Core components of a network censorship measurement probe.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and test runner
//! - [`config`] - Configuration loading and validation
//! - [`nettest`] - Test trait, registry and built-in tests
//! - [`work`] - Work item generation and bounded-concurrency dispatch
//! - [`report`] - Per-run report document
//! - [`tor`] - Tor launch, control port and circuit building
//! - [`util`] - Time, randomization helpers

// Lints that fight the code style used throughout the crate
#![allow(clippy::uninlined_format_args)] // "{}" with trailing args everywhere
#![allow(clippy::doc_markdown)] // Tor keywords in docs (EXTENDCIRCUIT, GETINFO)
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)] // tor::TorError, nettest::NetTest
#![allow(clippy::significant_drop_tightening)] // Lock scopes are kept short by hand
#![allow(clippy::items_after_statements)]

pub mod cli;
pub mod config;
pub mod logging;
pub mod nettest;
pub mod report;
pub mod tor;
pub mod util;
pub mod work;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
