//! `Range` header parsing and resolution against a known length.

/// Parsed single-range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeSpec {
    /// `bytes=start-end`, inclusive end.
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-len`, the final `len` bytes.
    Suffix { len: u64 },
}

/// Inclusive byte span that lies inside the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) start: u64,
    pub(crate) end: u64,
}

impl ByteRange {
    pub(crate) const fn len(self) -> u64 {
        self.end - self.start + 1
    }

    pub(crate) fn content_range(self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

/// Parse a `Range` header value. Multi-range and non-byte units are rejected.
pub(crate) fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let rest = value.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }
    let (start, end) = rest.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let len = end.parse().ok()?;
        return (len > 0).then_some(RangeSpec::Suffix { len });
    }
    let start = start.parse().ok()?;
    if end.is_empty() {
        return Some(RangeSpec::From { start });
    }
    let end = end.parse().ok()?;
    (end >= start).then_some(RangeSpec::Bounded { start, end })
}

impl RangeSpec {
    /// Clamp against `total`. `None` means the request is not satisfiable.
    pub(crate) fn resolve(self, total: u64) -> Option<ByteRange> {
        if total == 0 {
            return None;
        }
        let last = total - 1;
        match self {
            Self::Bounded { start, end } if end <= last => Some(ByteRange { start, end }),
            Self::Bounded { .. } => None,
            Self::From { start } if start <= last => Some(ByteRange { start, end: last }),
            Self::From { .. } => None,
            Self::Suffix { len } => Some(ByteRange {
                start: total.saturating_sub(len),
                end: last,
            }),
        }
    }
}

/// Resolve an optional header. An absent or unparsable header is ignored and
/// treated as `bytes=0-`; a multi-range request is never satisfiable.
pub(crate) fn resolve_request(header: Option<&str>, total: u64) -> Option<ByteRange> {
    let whole = RangeSpec::From { start: 0 };
    let spec = match header {
        Some(value) if is_multi_range(value) => return None,
        Some(value) => parse_range_header(value).unwrap_or(whole),
        None => whole,
    };
    spec.resolve(total)
}

fn is_multi_range(value: &str) -> bool {
    value
        .trim()
        .strip_prefix("bytes=")
        .is_some_and(|rest| rest.contains(','))
}
