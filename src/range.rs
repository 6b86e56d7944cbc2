//! Byte-range request parsing.
//!
//! Single-range only. An absent or syntactically invalid header means "no
//! range" (full content); a range entirely outside the payload is
//! unsatisfiable; more than one range spec is unsupported.

use std::fmt;

/// One satisfiable byte range within a payload of known total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset, inclusive.
    pub start: u64,
    /// Last byte offset, inclusive.
    pub end: u64,
    /// Total payload length the range was resolved against.
    pub total: u64,
}

impl ByteRange {
    /// Number of bytes the range covers.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.start, self.end, self.total)
    }
}

/// Result of resolving a Range header against a payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested (absent or unparseable header): serve full content.
    Full,
    /// One satisfiable range.
    Single(ByteRange),
    /// Syntactically valid but outside the payload.
    Unsatisfiable,
    /// More than one range spec; multipart responses are unsupported.
    Multipart,
}

/// Resolve a `Range` header value against the payload length.
pub fn resolve(header: Option<&str>, total: u64) -> RangeOutcome {
    let Some(raw) = header else {
        return RangeOutcome::Full;
    };
    let Some(list) = raw.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };

    let specs: Vec<&str> = list.split(',').map(str::trim).collect();
    if specs.iter().any(|s| s.is_empty()) {
        return RangeOutcome::Full;
    }
    if specs.len() > 1 {
        return RangeOutcome::Multipart;
    }

    match parse_spec(specs[0], total) {
        Spec::Invalid => RangeOutcome::Full,
        Spec::Empty => RangeOutcome::Unsatisfiable,
        Spec::Range(start, end) => RangeOutcome::Single(ByteRange { start, end, total }),
    }
}

enum Spec {
    Range(u64, u64),
    /// Valid syntax, nothing satisfiable.
    Empty,
    Invalid,
}

fn parse_spec(spec: &str, total: u64) -> Spec {
    let Some((first, last)) = spec.split_once('-') else {
        return Spec::Invalid;
    };
    match (first.is_empty(), last.is_empty()) {
        // "-suffix": final N bytes.
        (true, false) => match last.parse::<u64>() {
            Ok(0) => Spec::Empty,
            Ok(_) if total == 0 => Spec::Empty,
            Ok(n) => {
                let len = n.min(total);
                Spec::Range(total - len, total - 1)
            }
            Err(_) => Spec::Invalid,
        },
        // "start-": from offset to end.
        (false, true) => match first.parse::<u64>() {
            Ok(start) if start < total => Spec::Range(start, total - 1),
            Ok(_) => Spec::Empty,
            Err(_) => Spec::Invalid,
        },
        // "start-end".
        (false, false) => match (first.parse::<u64>(), last.parse::<u64>()) {
            (Ok(start), Ok(end)) if start > end => Spec::Invalid,
            (Ok(start), Ok(_)) if start >= total => Spec::Empty,
            (Ok(start), Ok(end)) => Spec::Range(start, end.min(total.saturating_sub(1))),
            _ => Spec::Invalid,
        },
        (true, true) => Spec::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_malformed_header_means_full_content() {
        assert_eq!(resolve(None, 10), RangeOutcome::Full);
        assert_eq!(resolve(Some("lines=0-1"), 10), RangeOutcome::Full);
        assert_eq!(resolve(Some("bytes=abc"), 10), RangeOutcome::Full);
        assert_eq!(resolve(Some("bytes=5-2"), 10), RangeOutcome::Full);
    }

    #[test]
    fn first_byte_of_ten() {
        let RangeOutcome::Single(r) = resolve(Some("bytes=0-0"), 10) else {
            panic!("expected single range");
        };
        assert_eq!(r.content_length(), 1);
        assert_eq!(r.content_range(), "bytes 0-0/10");
    }

    #[test]
    fn end_is_clamped_to_payload() {
        let RangeOutcome::Single(r) = resolve(Some("bytes=5-100"), 10) else {
            panic!("expected single range");
        };
        assert_eq!((r.start, r.end), (5, 9));
    }

    #[test]
    fn out_of_bounds_is_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=100-200"), 10), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve(Some("bytes=10-"), 10), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn suffix_range_takes_final_bytes() {
        let RangeOutcome::Single(r) = resolve(Some("bytes=-3"), 10) else {
            panic!("expected single range");
        };
        assert_eq!((r.start, r.end), (7, 9));
        // Longer than the payload: the whole payload.
        let RangeOutcome::Single(r) = resolve(Some("bytes=-30"), 10) else {
            panic!("expected single range");
        };
        assert_eq!((r.start, r.end), (0, 9));
    }

    #[test]
    fn multiple_ranges_are_unsupported() {
        assert_eq!(resolve(Some("bytes=0-1,3-4"), 10), RangeOutcome::Multipart);
    }
}
