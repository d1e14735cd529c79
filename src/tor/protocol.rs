//! Control protocol framing
//!
//! Splits the line stream from the control port into complete replies
//! and asynchronous events. Every line starts with a three digit status
//! code followed by a separator:
//!
//! - `250-text` mid reply line
//! - `250+keyword=` start of a data block, terminated by a lone `.`
//! - `250 OK` final line
//!
//! Codes in the 6xx range are asynchronous events.

use super::TorError;

/// A complete reply or event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Text of every line, status code stripped, data blocks inlined
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_event(&self) -> bool {
        (600..700).contains(&self.code)
    }

    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    /// Convert an error reply into `TorError::Control`
    pub fn into_result(self) -> Result<Reply, TorError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(TorError::Control(format!("{} {}", self.code, self.lines.join(" | "))))
        }
    }
}

/// Incremental reply parser
#[derive(Debug, Default)]
pub struct FrameReader {
    code: Option<u16>,
    lines: Vec<String>,
    in_data_block: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without trailing CRLF)
    ///
    /// Returns a reply once its final line has been seen.
    pub fn push_line(&mut self, raw: &str) -> Result<Option<Reply>, TorError> {
        let line = raw.trim_end_matches(['\r', '\n']);

        if self.in_data_block {
            if line == "." {
                self.in_data_block = false;
            } else {
                // Leading dots are escaped by doubling
                let unescaped = line.strip_prefix('.').filter(|l| l.starts_with('.')).unwrap_or(line);
                self.lines.push(unescaped.to_string());
            }
            return Ok(None);
        }

        if line.len() < 4 {
            return Err(TorError::Control(format!("malformed control line: {:?}", line)));
        }

        let code: u16 = line[..3]
            .parse()
            .map_err(|_| TorError::Control(format!("bad status code in {:?}", line)))?;
        let separator = line.as_bytes()[3];
        let text = &line[4..];

        match self.code {
            Some(current) if current != code => {
                return Err(TorError::Control(format!(
                    "status code changed mid-reply ({} then {})",
                    current, code
                )));
            },
            _ => self.code = Some(code),
        }

        self.lines.push(text.to_string());

        match separator {
            b'-' => Ok(None),
            b'+' => {
                self.in_data_block = true;
                Ok(None)
            },
            b' ' => {
                let reply = Reply {
                    code,
                    lines: std::mem::take(&mut self.lines),
                };
                self.code = None;
                Ok(Some(reply))
            },
            other => Err(TorError::Control(format!(
                "unknown separator {:?} in {:?}",
                other as char, line
            ))),
        }
    }
}

/// Parse `KEY=value` pairs, honouring double quotes, from a status line
pub fn parse_keywords(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = line.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key_start = rest[..eq].rfind(' ').map(|p| p + 1).unwrap_or(0);
        let key = rest[key_start..eq].to_string();
        let after = &rest[eq + 1..];

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.find(' ') {
                Some(end) => (after[..end].to_string(), &after[end..]),
                None => (after.to_string(), ""),
            }
        };

        pairs.push((key, value));
        rest = remaining.trim_start();
    }

    pairs
}
