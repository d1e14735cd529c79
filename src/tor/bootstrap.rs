//! Bootstrap progress tracking
//!
//! Tor reports progress on stdout as
//! `... [notice] Bootstrapped 85% (ap_handshake_done): Handshake finished`
//! and through `STATUS_CLIENT` events carrying `BOOTSTRAP PROGRESS=..`.

use super::protocol::parse_keywords;
use std::fmt;

/// One bootstrap progress report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapProgress {
    pub percent: u8,
    pub tag: String,
    pub summary: String,
}

impl BootstrapProgress {
    pub fn is_done(&self) -> bool {
        self.percent >= 100
    }

    /// Parse a daemon log line
    ///
    /// Older daemons omit the `(tag)` part; the tag is then empty.
    pub fn from_log_line(line: &str) -> Option<Self> {
        let (_, rest) = line.split_once("Bootstrapped ")?;
        let (percent, rest) = rest.split_once('%')?;
        let percent: u8 = percent.trim().parse().ok()?;

        let rest = rest.trim_start();
        let (tag, summary) = match rest.strip_prefix('(') {
            Some(tagged) => {
                let (tag, after) = tagged.split_once(')')?;
                (tag.to_string(), after)
            },
            None => (String::new(), rest),
        };
        let summary = summary.trim_start_matches(':').trim().to_string();

        Some(Self {
            percent: percent.min(100),
            tag,
            summary,
        })
    }

    /// Parse the body of a `STATUS_CLIENT` event or `status/bootstrap-phase`
    pub fn from_status(line: &str) -> Option<Self> {
        if !line.contains("BOOTSTRAP") {
            return None;
        }

        let mut percent = None;
        let mut tag = String::new();
        let mut summary = String::new();
        for (key, value) in parse_keywords(line) {
            match key.as_str() {
                "PROGRESS" => percent = value.parse::<u8>().ok(),
                "TAG" => tag = value,
                "SUMMARY" => summary = value,
                _ => {},
            }
        }

        Some(Self {
            percent: percent?.min(100),
            tag,
            summary,
        })
    }
}

impl fmt::Display for BootstrapProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent)?;
        if !self.tag.is_empty() {
            write!(f, " ({})", self.tag)?;
        }
        write!(f, ": {}", self.summary)
    }
}

/// Launch readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Starting,
    Ready,
    Failed(String),
}

impl Readiness {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Readiness::Starting)
    }
}

/// Moves from `Starting` to `Ready` or `Failed`, then stays put
#[derive(Debug)]
pub struct ReadinessTracker {
    state: Readiness,
    last_percent: u8,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self {
            state: Readiness::Starting,
            last_percent: 0,
        }
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Readiness {
        &self.state
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Record progress; returns true when this report made the daemon ready
    pub fn observe(&mut self, progress: &BootstrapProgress) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.last_percent = self.last_percent.max(progress.percent);
        if progress.is_done() {
            self.state = Readiness::Ready;
            return true;
        }
        false
    }

    /// Mark the launch failed; returns false if already terminal
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = Readiness::Failed(reason.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_line() {
        let line = "Oct 15 12:00:00.000 [notice] Bootstrapped 85% (ap_handshake_done): Handshake finished with a relay to build circuits";
        let progress = BootstrapProgress::from_log_line(line).unwrap();
        assert_eq!(progress.percent, 85);
        assert_eq!(progress.tag, "ap_handshake_done");
        assert_eq!(progress.summary, "Handshake finished with a relay to build circuits");
        assert!(!progress.is_done());
    }

    #[test]
    fn test_parse_untagged_log_line() {
        let line = "[notice] Bootstrapped 100%: Done";
        let progress = BootstrapProgress::from_log_line(line).unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.tag, "");
        assert_eq!(progress.summary, "Done");
        assert!(progress.is_done());
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        assert!(BootstrapProgress::from_log_line("[notice] Opening Socks listener on 127.0.0.1:9050").is_none());
        assert!(BootstrapProgress::from_log_line("Bootstrapped lots%").is_none());
    }

    #[test]
    fn test_parse_status_event() {
        let line = r#"STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY="Done""#;
        let progress = BootstrapProgress::from_status(line).unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.tag, "done");
        assert_eq!(progress.to_string(), "100% (done): Done");

        assert!(BootstrapProgress::from_status("STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED").is_none());
    }

    #[test]
    fn test_readiness_is_terminal() {
        let mut tracker = ReadinessTracker::new();
        let half = BootstrapProgress::from_log_line("Bootstrapped 50% (loading_descriptors): Loading").unwrap();
        let done = BootstrapProgress::from_log_line("Bootstrapped 100% (done): Done").unwrap();

        assert!(!tracker.observe(&half));
        assert_eq!(tracker.state(), &Readiness::Starting);
        assert!(tracker.observe(&done));
        assert_eq!(tracker.state(), &Readiness::Ready);

        assert!(!tracker.fail("exited"));
        assert!(!tracker.observe(&done));
        assert_eq!(tracker.state(), &Readiness::Ready);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut tracker = ReadinessTracker::new();
        assert!(tracker.fail("exited"));
        let done = BootstrapProgress::from_log_line("Bootstrapped 100% (done): Done").unwrap();
        assert!(!tracker.observe(&done));
        assert_eq!(tracker.state(), &Readiness::Failed("exited".to_string()));
    }
}
