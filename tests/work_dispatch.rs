//! Integration tests for work generation, dispatch and the test runner

use anyhow::{bail, Result};
use async_trait::async_trait;
use onionprobe::cli::run_test;
use onionprobe::config::Config;
use onionprobe::nettest::{
    builtin_tests, InputSpec, NetTest, OptionSpec, Registry, TestContext, TestOptions,
};
use onionprobe::tor::{LaunchConfig, ProcessLauncher, RetryPolicy, ShutdownHooks, TorService};
use onionprobe::work::{WorkGenerator, WorkItem, Worker, WorkerOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[test]
fn test_generator_yields_tail_in_order() {
    let inputs: Vec<String> = (0..7).map(|n| format!("input-{}", n)).collect();
    for resume in 0..=9 {
        let items: Vec<WorkItem<String>> = WorkGenerator::new(inputs.clone(), resume).collect();
        let expected = inputs.len().saturating_sub(resume);

        assert_eq!(items.len(), expected, "resume {}", resume);
        for (offset, item) in items.iter().enumerate() {
            assert_eq!(item.index, resume + offset);
            assert_eq!(item.payload, inputs[resume + offset]);
        }
    }
}

#[tokio::test]
async fn test_worker_never_exceeds_parallelism() {
    for parallelism in [1usize, 2, 3, 5] {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handler = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |item: WorkItem<u64>| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(item.payload)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }
        };

        let mut worker = Worker::new(WorkerOptions::new(parallelism), handler);
        for (index, delay) in [5u64, 1, 8, 2, 3, 1, 6, 4, 2, 7, 1, 1].into_iter().enumerate() {
            worker.push(WorkItem::new(index, delay)).await;
        }
        let state = worker.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= parallelism);
        assert_eq!(state.completed.len(), 12);
        assert_eq!(state.in_flight, 0);
    }
}

#[tokio::test]
async fn test_slow_first_item_does_not_hold_back_others() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let events = Arc::clone(&events);
        move |item: WorkItem<u64>| {
            let events = Arc::clone(&events);
            async move {
                events.lock().unwrap().push(format!("start {}", item.index));
                tokio::time::sleep(Duration::from_millis(item.payload)).await;
                events.lock().unwrap().push(format!("end {}", item.index));
                Ok::<(), anyhow::Error>(())
            }
        }
    };

    let mut worker = Worker::new(WorkerOptions::new(2), handler);
    worker.push(WorkItem::new(1, 300)).await;
    worker.push(WorkItem::new(2, 10)).await;
    worker.push(WorkItem::new(3, 10)).await;
    worker.drain().await;

    let events = events.lock().unwrap().clone();
    let position = |label: &str| events.iter().position(|e| e == label).unwrap();
    assert!(position("start 2") < position("end 1"));
    assert!(position("start 3") < position("end 1"));
    assert!(position("end 3") < position("end 1"));
}

#[tokio::test]
async fn test_failing_item_does_not_stop_the_rest() {
    let handler = |item: WorkItem<usize>| async move {
        if item.index == 2 {
            bail!("item {} is broken", item.index);
        }
        Ok(())
    };

    let mut worker = Worker::new(WorkerOptions::new(2), handler);
    for item in WorkGenerator::new(0..5usize, 0) {
        worker.push(item).await;
    }
    let state = worker.drain().await;

    assert_eq!(state.completed.into_iter().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    assert_eq!(state.failed.into_iter().collect::<Vec<_>>(), vec![2]);
}

fn idle_tor() -> Arc<TorService> {
    let launcher = ProcessLauncher::new(LaunchConfig {
        binary: PathBuf::from("/nonexistent/bin/tor"),
        control_host: "127.0.0.1".to_string(),
        control_port: 9052,
        socks_port: 9050,
        data_dir: None,
        control_password: None,
        bridges: Vec::new(),
        extra_torrc: Vec::new(),
    });
    Arc::new(TorService::new(launcher, RetryPolicy::default(), ShutdownHooks::new()))
}

#[tokio::test]
async fn test_tcp_connect_run_writes_report() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let open = listener.local_addr()?.to_string();
    let closed = {
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?.to_string()
    };

    let dir = tempfile::tempdir()?;
    let inputs = dir.path().join("hosts.txt");
    std::fs::write(&inputs, format!("# targets\nskipped:1\n{}\n\n{}\nnot-a-target\n", open, closed))?;

    let mut config = Config::default();
    config.probe.parallelism = 2;
    config.probe.output = dir.path().join("report.json");

    let (registry, errors) = Registry::with_tests(builtin_tests());
    assert!(errors.is_empty());

    let options = TestOptions::new()
        .with_value("file", inputs.to_string_lossy())
        .with_value("timeout", "5")
        .with_resume(1);
    let tor = idle_tor();
    let state = run_test(
        &registry,
        "tcp_connect",
        options,
        Arc::new(config.clone()),
        Arc::clone(&tor),
        &CancellationToken::new(),
    )
    .await?
    .unwrap();

    assert_eq!(state.total, 3);
    assert_eq!(state.resume_offset, 1);
    assert_eq!(state.completed.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(state.failed.iter().copied().collect::<Vec<_>>(), vec![3]);
    assert!(!tor.is_running());

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&config.probe.output)?)?;
    assert_eq!(report["test_name"], "tcp_connect");
    let entries = report["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);

    let result_for = |index: u64| {
        entries
            .iter()
            .find(|e| e["index"] == index)
            .map(|e| e["result"].clone())
            .unwrap()
    };
    assert_eq!(result_for(1)["connected"], true);
    assert_eq!(result_for(2)["connected"], false);
    assert!(result_for(3)["error"].as_str().unwrap().contains("host:port"));
    assert_eq!(report["next_resume"], 3);
    Ok(())
}

#[tokio::test]
async fn test_unknown_test_is_rejected() {
    let (registry, _) = Registry::with_tests(builtin_tests());
    let result = run_test(
        &registry,
        "no_such_test",
        TestOptions::new(),
        Arc::new(Config::default()),
        idle_tor(),
        &CancellationToken::new(),
    )
    .await;

    assert!(result.unwrap_err().to_string().contains("No such test"));
}

/// Finishes its first two inputs, then hangs until aborted
struct Stall {
    reached: Arc<Notify>,
}

#[async_trait]
impl NetTest for Stall {
    fn short_name(&self) -> &'static str {
        "stall"
    }

    fn options_spec(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::value("file", "Input list")]
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::File {
            option: "file",
            required: true,
        }
    }

    async fn run_item(&self, _ctx: &TestContext, item: WorkItem<String>) -> Result<Value> {
        if item.index >= 2 {
            self.reached.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(json!({ "input": item.payload }))
    }
}

/// Registered but retired
struct Retired;

#[async_trait]
impl NetTest for Retired {
    fn short_name(&self) -> &'static str {
        "retired"
    }

    fn ended(&self) -> bool {
        true
    }

    async fn run_item(&self, _ctx: &TestContext, _item: WorkItem<String>) -> Result<Value> {
        bail!("retired tests never run items")
    }
}

#[tokio::test]
async fn test_interrupted_run_still_writes_resume_offset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let inputs = dir.path().join("inputs.txt");
    std::fs::write(&inputs, "a\nb\nc\nd\ne\n")?;

    let mut config = Config::default();
    config.probe.parallelism = 1;
    config.probe.output = dir.path().join("report.json");

    let reached = Arc::new(Notify::new());
    let (registry, errors) = Registry::with_tests([Arc::new(Stall {
        reached: Arc::clone(&reached),
    }) as Arc<dyn NetTest>]);
    assert!(errors.is_empty());

    let cancel = CancellationToken::new();
    let options = TestOptions::new().with_value("file", inputs.to_string_lossy());
    let interrupt = async {
        reached.notified().await;
        cancel.cancel();
    };
    let run = run_test(&registry, "stall", options, Arc::new(config.clone()), idle_tor(), &cancel);

    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(run, interrupt) })
        .await?;
    assert!(result.unwrap_err().to_string().contains("interrupted"));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&config.probe.output)?)?;
    assert_eq!(report["next_resume"], 2);
    assert_eq!(report["entries"].as_array().unwrap().len(), 2);
    assert!(report["error"].as_str().unwrap().contains("--resume 2"));
    assert!(report["end_time"].is_u64());
    Ok(())
}

#[tokio::test]
async fn test_ended_test_still_gets_a_report() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = Config::default();
    config.probe.output = dir.path().join("report.json");

    let (registry, _) = Registry::with_tests([Arc::new(Retired) as Arc<dyn NetTest>]);
    let state = run_test(
        &registry,
        "retired",
        TestOptions::new(),
        Arc::new(config.clone()),
        idle_tor(),
        &CancellationToken::new(),
    )
    .await?;

    assert!(state.is_none());
    let report: Value = serde_json::from_str(&std::fs::read_to_string(&config.probe.output)?)?;
    assert_eq!(report["test_name"], "retired");
    assert_eq!(report["ended"], true);
    assert!(report.get("entries").is_none());
    Ok(())
}
