use std::fmt;

/// Marker for a range bound the client left out.
pub const UNSPECIFIED: i64 = -1;

/// An inclusive byte interval from a `Range` expression.
///
/// An [`UNSPECIFIED`] start means "from the beginning of the file", an
/// unspecified end means "to the end of the file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Both bounds were given.
    pub fn is_bounded(&self) -> bool {
        self.start != UNSPECIFIED && self.end != UNSPECIFIED
    }

    /// Number of bytes covered, when both bounds are known.
    pub fn len(&self) -> Option<i64> {
        self.is_bounded().then(|| self.end - self.start + 1)
    }

    /// `Range` header value asking a remote server for this interval, or
    /// `None` when the interval is the whole file.
    pub fn to_header_value(&self) -> Option<String> {
        match (self.start, self.end) {
            (UNSPECIFIED, UNSPECIFIED) => None,
            (UNSPECIFIED, end) => Some(format!("bytes=0-{end}")),
            (start, UNSPECIFIED) => Some(format!("bytes={start}-")),
            (start, end) => Some(format!("bytes={start}-{end}")),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Result of parsing a `Range` expression against a maximum chunk size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePlan {
    /// Ranges as the client wrote them (end clamped to the file size).
    pub raw: Vec<ByteRange>,

    /// Bounded ranges split so that none exceeds the maximum chunk size,
    /// in ascending request order.
    pub chunks: Vec<ByteRange>,

    /// Total bytes covered by `chunks`.
    pub length: i64,
}

impl RangePlan {
    /// Ranges to request from a remote peer, in order: each bounded raw
    /// range expands to its chunks, open-ended ranges are passed through.
    pub fn fetch_order(&self) -> Vec<ByteRange> {
        let mut chunks = self.chunks.iter().copied().peekable();
        let mut order = Vec::with_capacity(self.chunks.len() + self.raw.len());
        for raw in &self.raw {
            if !raw.is_bounded() {
                order.push(*raw);
                continue;
            }
            while let Some(chunk) = chunks.next_if(|c| c.start >= raw.start && c.end <= raw.end) {
                order.push(chunk);
                if chunk.end == raw.end {
                    break;
                }
            }
        }
        order
    }
}
