//! LDIF entry descriptions.
//!
//! Supports the content-record subset used for seeding: `#` comments,
//! blank-line record separators, `attr: value` lines, folded continuation
//! lines (leading single space) and an optional `version:` header. Base64
//! (`attr:: ...`) and URL (`attr:< ...`) values are rejected.

use super::dn::Dn;
use super::entry::Entry;
use crate::core::error::{KdcError, KdcResult};

/// Parse LDIF text into entries, in file order.
pub fn parse(content: &str) -> KdcResult<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;

    for (line_no, line) in unfold(content) {
        if line.trim().is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| KdcError::Ldif {
            line: line_no,
            message: format!("expected 'attr: value', found {line:?}"),
        })?;
        if value.starts_with(':') || value.starts_with('<') {
            return Err(KdcError::Ldif {
                line: line_no,
                message: format!("encoded value for {name} is not supported"),
            });
        }
        let (name, value) = (name.trim(), value.trim());

        if current.is_none() {
            if name.eq_ignore_ascii_case("version") {
                continue;
            }
            if !name.eq_ignore_ascii_case("dn") {
                return Err(KdcError::Ldif {
                    line: line_no,
                    message: format!("record must start with dn, found {name}"),
                });
            }
            let dn = Dn::parse(value).map_err(|e| KdcError::Ldif {
                line: line_no,
                message: e.to_string(),
            })?;
            current = Some(Entry::new(dn));
            continue;
        }

        if name.eq_ignore_ascii_case("changetype") {
            if !value.eq_ignore_ascii_case("add") {
                return Err(KdcError::Ldif {
                    line: line_no,
                    message: format!("changetype {value} is not supported"),
                });
            }
        } else if let Some(entry) = current.as_mut() {
            entry.add(name, value);
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    Ok(entries)
}

/// Join folded lines, drop comments, keep 1-based line numbers.
fn unfold(content: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if raw.starts_with('#') {
            continue;
        }
        match (raw.strip_prefix(' '), lines.last_mut()) {
            (Some(rest), Some((_, prev))) if !prev.is_empty() => prev.push_str(rest),
            _ => lines.push((idx + 1, raw.to_string())),
        }
    }
    lines
}
