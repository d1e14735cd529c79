//! Test runner
//!
//! Resolves a test, builds its report, and either runs it once as a tool
//! or feeds its inputs through the worker. An interrupted run still
//! writes its report, including the offset to resume from.

use super::{help_text, parse_test_options, Cli};
use crate::config::{load_config, Config};
use crate::logging::{self, LogSettings};
use crate::nettest::{builtin_tests, input_source, NetTest, Registry, TestContext, TestOptions};
use crate::report::{fragment, Report};
use crate::tor::{ProcessLauncher, ShutdownHooks, TorService};
use crate::util::time::{format_duration, unix_timestamp};
use crate::work::{RunState, WorkGenerator, WorkItem, Worker, WorkerOptions};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Parse-to-exit flow behind `main`
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    let (registry, broken) = Registry::with_tests(builtin_tests());
    for e in &broken {
        eprintln!("Skipping broken test: {}", e);
    }

    let Some((name, args)) = cli.test() else {
        println!("{}", help_text(&registry));
        return Ok(ExitCode::FAILURE);
    };

    let Some(test) = registry.get(name) else {
        eprintln!("No such test: {}", name);
        eprintln!("Available tests: {}", registry.names().join(", "));
        return Ok(ExitCode::FAILURE);
    };

    let options = match parse_test_options(test.as_ref(), args) {
        Ok(options) => options,
        Err(e) => {
            e.print()?;
            return Ok(if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        },
    };

    let config = cli.apply(load_config(cli.config.as_deref())?);
    crate::config::validate(&config)?;

    logging::init(&LogSettings {
        verbosity: config.probe.verbosity,
        quiet: cli.quiet,
        file: Some(config.probe.log.clone()),
    })?;
    info!("onionprobe v{} starting", crate::VERSION);

    let config = Arc::new(config);
    let hooks = ShutdownHooks::new();
    let tor = Arc::new(tor_service(&config, Arc::clone(&hooks)));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, writing report");
                cancel.cancel();
            }
        })
    };

    let result = run_test(&registry, name, options, Arc::clone(&config), Arc::clone(&tor), &cancel).await;
    interrupt.abort();

    tor.shutdown().await;
    let cleaned = hooks.run();
    debug!("Ran {} shutdown hooks", cleaned);

    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{} failed: {:#}", name, e);
            eprintln!("Error: {:#}", e);
            Ok(ExitCode::FAILURE)
        },
    }
}

/// Tor handle for a run, seeded with the configured relay pool
pub fn tor_service(config: &Config, hooks: Arc<ShutdownHooks>) -> TorService {
    TorService::new(
        ProcessLauncher::new(config.tor.launch_config()),
        config.circuit.retry_policy(),
        hooks,
    )
    .with_relay_pool(config.circuit.relay_pool())
}

/// Run one test to completion
///
/// The report is created before anything else, so ended tests also leave
/// one behind. Returns the final run state for item-based tests, `None`
/// for tools and ended tests.
///
/// When `cancel` fires, running items are aborted and the report is
/// still flushed with `run_state` and `next_resume` before the
/// interruption is returned as an error.
pub async fn run_test(
    registry: &Registry,
    name: &str,
    options: TestOptions,
    config: Arc<Config>,
    tor: Arc<TorService>,
    cancel: &CancellationToken,
) -> Result<Option<RunState>> {
    let test = registry
        .get(name)
        .ok_or_else(|| anyhow!("No such test: {}", name))?;

    let report = Arc::new(Report::new(name, &config.probe.output));
    report.update(fragment([
        ("start_time", Value::from(unix_timestamp())),
        ("probe_version", Value::from(crate::VERSION)),
        ("options", serde_json::to_value(&options)?),
    ]));

    let ctx = Arc::new(TestContext {
        report: Arc::clone(&report),
        tor,
        config: Arc::clone(&config),
        options,
    });

    let started = Instant::now();
    let outcome = if test.ended() {
        info!("Ending test {}", name);
        report.set("ended", true);
        Ok(None)
    } else if test.is_tool() {
        info!("Running tool {}", name);
        tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("interrupted")),
            result = test.run_tool(&ctx) => result.map(|()| None),
        }
    } else {
        run_items(Arc::clone(&test), Arc::clone(&ctx), &config, cancel)
            .await
            .map(Some)
    };

    report.set("end_time", unix_timestamp());
    if let Err(e) = &outcome {
        report.set("error", format!("{:#}", e));
    }
    report.flush()?;
    info!("{} finished in {}", name, format_duration(started.elapsed()));

    outcome
}

async fn run_items(
    test: Arc<dyn NetTest>,
    ctx: Arc<TestContext>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<RunState> {
    let source = input_source(test.as_ref(), &ctx.options)?;
    let inputs = source.open()?;
    let resume = ctx.options.resume();

    tokio::select! {
        _ = cancel.cancelled() => bail!("interrupted during {} setup", test.short_name()),
        result = test.setup(&ctx) => {
            result.with_context(|| format!("{} setup failed", test.short_name()))?;
        },
    }

    let handler = {
        let test = Arc::clone(&test);
        let ctx = Arc::clone(&ctx);
        move |item: WorkItem<String>| {
            let test = Arc::clone(&test);
            let ctx = Arc::clone(&ctx);
            async move {
                let index = item.index;
                match test.run_item(&ctx, item).await {
                    Ok(entry) => {
                        ctx.report.record_entry(index, entry);
                        Ok(())
                    },
                    Err(e) => {
                        ctx.report.record_entry(index, json!({ "error": format!("{:#}", e) }));
                        Err(e)
                    },
                }
            }
        }
    };

    let worker_options = WorkerOptions::new(config.probe.parallelism)
        .with_item_timeout(config.probe.item_timeout());
    let mut worker = Worker::new(worker_options, handler);
    worker.set_resume_offset(resume);

    info!(
        "Running {} with parallelism {} from input {}",
        test.short_name(),
        worker.parallelism(),
        resume
    );
    for item in WorkGenerator::new(inputs, resume) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = worker.push(item) => {},
        }
    }

    let state = worker.drain_or_abort(cancel).await;
    info!(
        "{}: {} items, {} completed, {} failed",
        test.short_name(),
        state.total,
        state.completed.len(),
        state.failed.len()
    );

    ctx.report.update(fragment([
        ("run_state", serde_json::to_value(&state)?),
        ("next_resume", Value::from(state.safe_resume_offset())),
    ]));

    if cancel.is_cancelled() {
        bail!(
            "interrupted; resume with --resume {}",
            state.safe_resume_offset()
        );
    }
    Ok(state)
}
