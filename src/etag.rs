//! ETag derivation and conditional-request matching.
//!
//! A node's ETag is a pure function of its store version and updated timestamp:
//! `"<version>-<updated>"`. Comparison is exact string equality; the literal
//! wildcard `*` matches anything.

use crate::error::{Error, Result};
use crate::types::Timestamp;

/// Render the ETag for a `(version, updated)` pair, including surrounding quotes.
pub fn render(version: u64, updated: Timestamp) -> String {
    format!("\"{}-{}\"", version, updated)
}

/// Evaluate an `If-Match` condition against the current ETag.
///
/// A missing header imposes no condition. `*` matches any existing resource.
/// Anything else must equal the current ETag exactly or the precondition fails.
pub fn check_if_match(if_match: Option<&str>, current: &str) -> Result<()> {
    match if_match {
        None => Ok(()),
        Some("*") => Ok(()),
        Some(tag) if tag == current => Ok(()),
        Some(_) => Err(Error::EtagMismatch),
    }
}

/// Evaluate an `If-None-Match` condition; true means "not modified".
pub fn is_not_modified(if_none_match: Option<&str>, current: &str) -> bool {
    matches!(if_none_match, Some(tag) if tag == current)
}
