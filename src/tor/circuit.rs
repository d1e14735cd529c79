//! Circuits, relays and circuit lifecycle events
//!
//! Parses the `CIRC` asynchronous event:
//!
//! ```text
//! 650 CIRC <id> <status> [<path>] [BUILD_FLAGS=...] [PURPOSE=...] [REASON=...]
//! ```

use std::fmt;

/// Circuit identifier assigned by Tor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u32);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CircuitId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CircuitId)
    }
}

/// Relay identity: uppercase hex RSA fingerprint
///
/// Accepts the forms Tor prints in paths (`$FP`, `$FP~nick`, `$FP=nick`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(String);

impl RelayId {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim().trim_start_matches('$');
        let fingerprint = raw.split(['~', '=']).next().unwrap_or(raw);
        Self(fingerprint.to_ascii_uppercase())
    }

    pub fn fingerprint(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a full 40-char hex fingerprint
    pub fn is_fingerprint(&self) -> bool {
        self.0.len() == 40 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<&str> for RelayId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Circuit purpose
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitPurpose {
    General,
    Other(String),
}

impl CircuitPurpose {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("GENERAL") {
            CircuitPurpose::General
        } else {
            CircuitPurpose::Other(raw.to_string())
        }
    }
}

/// Circuit status as reported in `CIRC` events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitStatus {
    Launched,
    Extended,
    Built,
    Failed,
    Closed,
    Other(String),
}

impl CircuitStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "LAUNCHED" => CircuitStatus::Launched,
            "EXTENDED" => CircuitStatus::Extended,
            "BUILT" => CircuitStatus::Built,
            "FAILED" => CircuitStatus::Failed,
            "CLOSED" => CircuitStatus::Closed,
            other => CircuitStatus::Other(other.to_string()),
        }
    }
}

/// A multi-hop path through relays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    pub id: CircuitId,
    pub status: CircuitStatus,
    pub path: Vec<RelayId>,
    pub purpose: CircuitPurpose,
    pub reason: Option<String>,
}

impl Circuit {
    pub fn new(id: CircuitId, path: Vec<RelayId>) -> Self {
        Self {
            id,
            status: CircuitStatus::Launched,
            path,
            purpose: CircuitPurpose::General,
            reason: None,
        }
    }

    pub fn is_general(&self) -> bool {
        self.purpose == CircuitPurpose::General
    }

    /// Whether `relay` is a hop of this circuit
    pub fn contains(&self, relay: &RelayId) -> bool {
        self.path.contains(relay)
    }

    /// Path rendered the way Tor logs it
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("->")
    }

    /// Parse the body of a `CIRC` event (without the `650 ` prefix)
    pub fn parse_event(body: &str) -> Option<Self> {
        let mut parts = body.split_whitespace();
        if parts.next()? != "CIRC" {
            return None;
        }
        let id = parts.next()?.parse().ok()?;
        let status = CircuitStatus::parse(parts.next()?);

        let mut circuit = Circuit {
            id,
            status,
            path: Vec::new(),
            purpose: CircuitPurpose::General,
            reason: None,
        };

        for token in parts {
            match token.split_once('=') {
                Some(("PURPOSE", value)) => circuit.purpose = CircuitPurpose::parse(value),
                Some(("REASON", value)) => circuit.reason = Some(value.to_string()),
                Some(_) if !token.starts_with('$') => {},
                _ => {
                    if circuit.path.is_empty() {
                        circuit.path = token.split(',').map(RelayId::new).collect();
                    }
                },
            }
        }

        Some(circuit)
    }
}

/// Lifecycle event delivered to circuit listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitEvent {
    /// A hop was added; `relay` is the newest hop
    Extend { circuit: Circuit, relay: RelayId },
    Built(Circuit),
    Failed { circuit: Circuit, reason: String },
    /// Launched, closed and anything else
    Other(Circuit),
}

impl CircuitEvent {
    /// Classify a `CIRC` event body
    pub fn parse(body: &str) -> Option<Self> {
        let circuit = Circuit::parse_event(body)?;
        let event = match circuit.status {
            CircuitStatus::Extended => match circuit.path.last().cloned() {
                Some(relay) => CircuitEvent::Extend { circuit, relay },
                None => CircuitEvent::Other(circuit),
            },
            CircuitStatus::Built => CircuitEvent::Built(circuit),
            CircuitStatus::Failed => {
                let reason = circuit.reason.clone().unwrap_or_else(|| "NONE".to_string());
                CircuitEvent::Failed { circuit, reason }
            },
            _ => CircuitEvent::Other(circuit),
        };
        Some(event)
    }

    pub fn circuit(&self) -> &Circuit {
        match self {
            CircuitEvent::Extend { circuit, .. } => circuit,
            CircuitEvent::Built(circuit) => circuit,
            CircuitEvent::Failed { circuit, .. } => circuit,
            CircuitEvent::Other(circuit) => circuit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const FP_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

    #[test]
    fn test_relay_id_normalizes_path_forms() {
        let plain = RelayId::new(&FP_A.to_lowercase());
        let tilde = RelayId::new(&format!("${}~relay1", FP_A));
        let equals = RelayId::new(&format!("${}=relay1", FP_A));

        assert_eq!(plain, tilde);
        assert_eq!(tilde, equals);
        assert!(plain.is_fingerprint());
        assert_eq!(plain.to_string(), format!("${}", FP_A));
    }

    #[test]
    fn test_parse_built_event() {
        let body = format!(
            "CIRC 12 BUILT ${}~a,${}~b BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL TIME_CREATED=2012-01-01T00:00:00.000000",
            FP_A, FP_B
        );
        let event = CircuitEvent::parse(&body).unwrap();

        match event {
            CircuitEvent::Built(circuit) => {
                assert_eq!(circuit.id, CircuitId(12));
                assert_eq!(circuit.path, vec![RelayId::new(FP_A), RelayId::new(FP_B)]);
                assert!(circuit.is_general());
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failed_event_carries_reason() {
        let body = format!("CIRC 7 FAILED ${}~a PURPOSE=GENERAL REASON=TIMEOUT", FP_A);
        match CircuitEvent::parse(&body).unwrap() {
            CircuitEvent::Failed { circuit, reason } => {
                assert_eq!(circuit.id, CircuitId(7));
                assert_eq!(reason, "TIMEOUT");
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_extend_reports_last_hop() {
        let body = format!("CIRC 3 EXTENDED ${}~a,${}~b PURPOSE=GENERAL", FP_A, FP_B);
        match CircuitEvent::parse(&body).unwrap() {
            CircuitEvent::Extend { relay, .. } => assert_eq!(relay, RelayId::new(FP_B)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_launched_without_path() {
        let event = CircuitEvent::parse("CIRC 4 LAUNCHED BUILD_FLAGS=NEED_CAPACITY PURPOSE=HS_CLIENT_INTRO").unwrap();
        let circuit = event.circuit();
        assert!(circuit.path.is_empty());
        assert!(!circuit.is_general());
        assert!(matches!(event, CircuitEvent::Other(_)));
    }

    #[test]
    fn test_parse_rejects_other_events() {
        assert!(CircuitEvent::parse("STREAM 1 NEW 0 example.org:80").is_none());
        assert!(CircuitEvent::parse("CIRC notanumber BUILT").is_none());
    }
}
