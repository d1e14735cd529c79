//! Relay directory and the pre-vetted relay pool
//!
//! Router status entries come from `GETINFO ns/all`, which uses the
//! consensus router format:
//!
//! ```text
//! r <nickname> <identity-b64> <digest-b64> <date> <time> <ip> <orport> <dirport>
//! s <flags...>
//! ```

use super::circuit::RelayId;
use super::control::TorController;
use super::TorError;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::seq::SliceRandom;
use std::sync::Mutex;
use tracing::{debug, info};

/// Hops in a default circuit
pub const DEFAULT_PATH_LEN: usize = 3;

/// One router entry from a network status document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStatus {
    pub nickname: String,
    pub id: RelayId,
    pub flags: Vec<String>,
}

impl RouterStatus {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_guard(&self) -> bool {
        self.has_flag("Guard")
    }
}

/// Parse router entries from network status text
///
/// Entries without a decodable identity are skipped.
pub fn parse_network_status(text: &str) -> Vec<RouterStatus> {
    let mut routers = Vec::new();
    let mut current: Option<RouterStatus> = None;

    for line in text.lines() {
        let line = line.trim();

        if line.starts_with("r ") {
            if let Some(done) = current.take() {
                routers.push(done);
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                // identity is base64-encoded 20-byte SHA-1 of RSA key
                let mut id_b64 = parts[2].to_string();
                while id_b64.len() % 4 != 0 {
                    id_b64.push('=');
                }
                match STANDARD.decode(&id_b64) {
                    Ok(id_bytes) => {
                        current = Some(RouterStatus {
                            nickname: parts[1].to_string(),
                            id: RelayId::new(&hex::encode_upper(&id_bytes)),
                            flags: Vec::new(),
                        });
                    },
                    Err(e) => debug!("Skipping router {} with bad identity: {}", parts[1], e),
                }
            }
        } else if line.starts_with("s ") {
            if let Some(router) = current.as_mut() {
                router.flags = line.split_whitespace().skip(1).map(String::from).collect();
            }
        }
    }

    if let Some(done) = current {
        routers.push(done);
    }

    routers
}

/// Relays known to the probe
///
/// The pool is consumed three at a time for default paths; guards and
/// routers are the fallback when it runs low.
#[derive(Debug, Default)]
pub struct RelayDirectory {
    pool: Mutex<Vec<RelayId>>,
    entry_guards: Vec<RelayId>,
    routers: Vec<RelayId>,
}

impl RelayDirectory {
    /// Build from router status entries
    pub fn new(statuses: &[RouterStatus]) -> Self {
        let entry_guards = statuses
            .iter()
            .filter(|r| r.is_guard())
            .map(|r| r.id.clone())
            .collect();
        let routers = statuses.iter().map(|r| r.id.clone()).collect();

        Self {
            pool: Mutex::new(Vec::new()),
            entry_guards,
            routers,
        }
    }

    /// Build from explicit guard and router lists
    pub fn from_parts(entry_guards: Vec<RelayId>, routers: Vec<RelayId>) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            entry_guards,
            routers,
        }
    }

    /// Fetch the router list from a running daemon
    pub async fn fetch(controller: &TorController) -> Result<Self, TorError> {
        info!("Fetching router status from Tor control port...");
        let raw = controller.get_info("ns/all").await?;
        let statuses = parse_network_status(&raw);
        let directory = Self::new(&statuses);
        info!(
            "Relay directory: {} routers, {} entry guards",
            directory.routers.len(),
            directory.entry_guards.len()
        );
        Ok(directory)
    }

    /// Add relays to the pre-vetted pool
    pub fn extend_pool<I: IntoIterator<Item = RelayId>>(&self, relays: I) {
        self.lock_pool().extend(relays);
    }

    pub fn relays_remaining(&self) -> usize {
        self.lock_pool().len()
    }

    pub fn entry_guards(&self) -> &[RelayId] {
        &self.entry_guards
    }

    pub fn routers(&self) -> &[RelayId] {
        &self.routers
    }

    /// Pop first, middle and last hop from the pool
    ///
    /// Leaves the pool untouched when fewer than three relays remain.
    pub fn take_pooled_path(&self) -> Option<Vec<RelayId>> {
        let mut pool = self.lock_pool();
        if pool.len() < DEFAULT_PATH_LEN {
            return None;
        }
        let first = pool.pop()?;
        let middle = pool.pop()?;
        let last = pool.pop()?;
        Some(vec![first, middle, last])
    }

    /// One random entry guard followed by two random routers
    pub fn random_path(&self) -> Option<Vec<RelayId>> {
        let mut rng = rand::thread_rng();
        let first = self.entry_guards.choose(&mut rng)?.clone();

        let candidates: Vec<&RelayId> = self.routers.iter().filter(|r| **r != first).collect();
        let rest: Vec<RelayId> = candidates
            .choose_multiple(&mut rng, DEFAULT_PATH_LEN - 1)
            .map(|r| (*r).clone())
            .collect();
        if rest.len() < DEFAULT_PATH_LEN - 1 {
            return None;
        }

        let mut path = Vec::with_capacity(DEFAULT_PATH_LEN);
        path.push(first);
        path.extend(rest);
        Some(path)
    }

    /// Path built around `relay` as the first hop
    pub fn path_through(&self, relay: &RelayId) -> Option<Vec<RelayId>> {
        let mut rng = rand::thread_rng();
        let candidates: Vec<&RelayId> = self.routers.iter().filter(|r| *r != relay).collect();
        let rest: Vec<RelayId> = candidates
            .choose_multiple(&mut rng, DEFAULT_PATH_LEN - 1)
            .map(|r| (*r).clone())
            .collect();
        if rest.len() < DEFAULT_PATH_LEN - 1 {
            return None;
        }

        let mut path = vec![relay.clone()];
        path.extend(rest);
        Some(path)
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Vec<RelayId>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
