//! Tor process launcher
//!
//! Writes a torrc into a workspace, spawns the daemon with that
//! workspace as its home, and waits for bootstrap to reach 100%.

use super::bootstrap::{BootstrapProgress, Readiness, ReadinessTracker};
use super::control::{ControlSettings, COOKIE_FILE};
use super::torrc::{write_torrc, TorrcConfig};
use super::workspace::{ShutdownHooks, Workspace};
use super::{LaunchError, TorError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Called for every bootstrap progress line
pub type ProgressCallback = Arc<dyn Fn(&BootstrapProgress) + Send + Sync>;

/// Everything needed to start one daemon
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub binary: PathBuf,
    pub control_host: String,
    pub control_port: u16,
    pub socks_port: u16,
    /// Use this directory instead of a fresh temporary one
    pub data_dir: Option<PathBuf>,
    pub control_password: Option<String>,
    pub bridges: Vec<String>,
    pub extra_torrc: Vec<String>,
}

impl LaunchConfig {
    pub fn torrc(&self) -> TorrcConfig {
        let mut conf = TorrcConfig::new(self.control_port, self.socks_port);
        conf.bridges = self.bridges.clone();
        conf.extra = self.extra_torrc.clone();
        conf
    }
}

/// A running, bootstrapped daemon
pub struct TorProcess {
    child: Child,
    control: ControlSettings,
    workspace: Arc<Workspace>,
    torrc: String,
}

impl TorProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Where and how to reach the control port
    pub fn control(&self) -> &ControlSettings {
        &self.control
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// The torrc the daemon was started with
    pub fn torrc(&self) -> &str {
        &self.torrc
    }

    /// Kill the daemon and wait for it to exit
    pub async fn kill(&mut self) -> Result<(), TorError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for TorProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorProcess")
            .field("pid", &self.child.id())
            .field("control", &format!("{}:{}", self.control.host, self.control.port))
            .field("workspace", &self.workspace.data_dir())
            .finish()
    }
}

/// Log progress at info level
pub fn log_progress(progress: &BootstrapProgress) {
    info!("Tor bootstrap {}", progress);
}

pub struct ProcessLauncher {
    config: LaunchConfig,
    on_progress: ProgressCallback,
}

impl ProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            on_progress: Arc::new(log_progress),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = callback;
        self
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Start the daemon and wait for it to finish bootstrapping
    ///
    /// Workspace cleanup is registered with `hooks` before anything is
    /// spawned, so it runs at shutdown whether or not the launch succeeds.
    pub async fn launch(&self, hooks: &ShutdownHooks) -> Result<TorProcess, TorError> {
        if !cfg!(any(unix, windows)) {
            return Err(LaunchError::UnsupportedPlatform.into());
        }

        let mut torrc_conf = self.config.torrc();
        let written = write_torrc(&mut torrc_conf, self.config.data_dir.as_deref())?;
        let workspace = Arc::new(Workspace::new(written));
        hooks.register_cleanup(&workspace);

        let binary = resolve_binary(&self.config.binary)
            .ok_or_else(|| LaunchError::BinaryMissing(self.config.binary.clone()))?;

        let data_dir = workspace.data_dir().to_path_buf();
        info!(
            "Starting {:?} with data directory {:?}",
            binary, data_dir
        );

        let mut child = Command::new(&binary)
            .arg("-f")
            .arg(workspace.torrc())
            .env_clear()
            .env("HOME", &data_dir)
            .current_dir(&data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => LaunchError::BinaryMissing(self.config.binary.clone()),
                _ => LaunchError::Spawn(e),
            })?;

        drop(child.stdin.take());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TorError::Bootstrap("tor stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut tracker = ReadinessTracker::new();
        if let Err(e) = self.watch_bootstrap(&mut lines, &mut tracker).await {
            tracker.fail(e.to_string());
            let _ = child.kill().await;
            return Err(e);
        }

        if let Readiness::Failed(reason) = tracker.state() {
            let status = child.wait().await.ok();
            let reason = match status {
                Some(status) => format!("{} ({})", reason, status),
                None => reason.clone(),
            };
            return Err(TorError::Bootstrap(reason));
        }

        // Keep the pipe drained so the daemon never blocks on stdout
        tokio::spawn(forward_output(lines));

        info!("Tor bootstrapped (pid {:?})", child.id());
        let control = ControlSettings {
            host: self.config.control_host.clone(),
            port: self.config.control_port,
            password: self.config.control_password.clone(),
            cookie_path: Some(data_dir.join(COOKIE_FILE)),
        };

        Ok(TorProcess {
            child,
            control,
            workspace,
            torrc: torrc_conf.render(),
        })
    }

    /// Read stdout until the daemon is ready or stdout closes
    async fn watch_bootstrap(
        &self,
        lines: &mut Lines<BufReader<ChildStdout>>,
        tracker: &mut ReadinessTracker,
    ) -> Result<(), TorError> {
        while !tracker.state().is_terminal() {
            match lines.next_line().await? {
                Some(line) => {
                    debug!("tor: {}", line);
                    if line.contains("[err]") {
                        warn!("tor: {}", line);
                    }
                    if let Some(progress) = BootstrapProgress::from_log_line(&line) {
                        (self.on_progress)(&progress);
                        tracker.observe(&progress);
                    }
                },
                None => {
                    tracker.fail(format!(
                        "tor exited at {}% bootstrap",
                        tracker.last_percent()
                    ));
                },
            }
        }
        Ok(())
    }
}

/// Find the daemon binary, searching `PATH` for bare names
///
/// The child runs with a cleared environment, so the lookup has to use
/// ours.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

async fn forward_output(mut lines: Lines<BufReader<ChildStdout>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("tor: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(binary: &str) -> LaunchConfig {
        LaunchConfig {
            binary: PathBuf::from(binary),
            control_host: "127.0.0.1".to_string(),
            control_port: 9052,
            socks_port: 9050,
            data_dir: None,
            control_password: None,
            bridges: vec!["1.2.3.4:443".to_string()],
            extra_torrc: vec![],
        }
    }

    #[test]
    fn test_torrc_from_config() {
        let conf = config("tor").torrc();
        assert_eq!(conf.control_port, 9052);
        assert_eq!(conf.socks_port, 9050);
        assert_eq!(conf.bridges, vec!["1.2.3.4:443".to_string()]);
    }

    #[test]
    fn test_resolve_binary() {
        assert!(resolve_binary(Path::new("/nonexistent/bin/tor")).is_none());
        assert!(resolve_binary(Path::new("no-such-binary-onionprobe")).is_none());
        #[cfg(unix)]
        assert_eq!(resolve_binary(Path::new("/bin/sh")), Some(PathBuf::from("/bin/sh")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let hooks = ShutdownHooks::new();
        let launcher = ProcessLauncher::new(config("/nonexistent/bin/tor"));

        let err = launcher.launch(&hooks).await.unwrap_err();
        assert!(matches!(err, TorError::Launch(LaunchError::BinaryMissing(_))));
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks.run(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_bootstrap_error() {
        let hooks = ShutdownHooks::new();
        // `true` ignores its arguments and exits at once
        let launcher = ProcessLauncher::new(config("/bin/true"));

        let err = launcher.launch(&hooks).await.unwrap_err();
        assert!(matches!(err, TorError::Bootstrap(_)));
        assert_eq!(hooks.run(), 1);
    }
}
