use crate::data::{ByteRange, RangePlan, UNSPECIFIED};

/// A `Range` expression the server cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RangeError {
    /// HTTP status to answer with.
    pub status: u16,
    pub message: String,
}

/// Parse a `Range` expression like `bytes=0-19, 25-30` into raw ranges and
/// backend-sized chunks.
///
/// * Ranges with a missing bound are kept in `raw` only; the backend reads
///   "to end of file" natively.
/// * With a known `file_size`, ends are clamped to the last byte and a start
///   beyond it fails with 400.
/// * Bounded ranges longer than `max_chunk` are split into consecutive
///   chunks of at most `max_chunk` bytes.
/// * Tokens that are not `start-end` (extra dashes, non-digits, end before
///   start) are skipped rather than failing the whole expression.
///
/// # Examples
///
/// ```
/// use davrelay_tpc::{ByteRange, parse_byte_ranges};
///
/// let plan = parse_byte_ranges("bytes=0-7", 3, None).unwrap();
/// assert_eq!(plan.chunks, [ByteRange::new(0, 2), ByteRange::new(3, 5), ByteRange::new(6, 7)]);
/// assert_eq!(plan.length, 8);
/// ```
pub fn parse_byte_ranges(
    expr: &str,
    max_chunk: i64,
    file_size: Option<i64>,
) -> Result<RangePlan, RangeError> {
    let mut plan = RangePlan::default();

    let tokens = expr
        .split([' ', ',', '\n', '\t', '='])
        .filter(|token| !token.is_empty());

    for token in tokens {
        let Some(mut range) = parse_token(token) else {
            continue;
        };

        if !range.is_bounded() {
            plan.raw.push(range);
            continue;
        }

        if let Some(size) = file_size {
            let last = size - 1;
            if range.end > last {
                range.end = last;
            }
            if range.start > last {
                return Err(RangeError {
                    status: 400,
                    message: format!(
                        "Invalid range {}-{}. The beginning of the range is > than the file size = {}",
                        range.start, range.end, size
                    ),
                });
            }
        }

        plan.raw.push(range);
        for chunk in split_range(range, max_chunk) {
            plan.length += chunk.end - chunk.start + 1;
            plan.chunks.push(chunk);
        }
    }

    Ok(plan)
}

/// `start-end` with either side optionally empty.
fn parse_token(token: &str) -> Option<ByteRange> {
    let mut fields = token.split('-');
    let start = parse_bound(fields.next()?)?;
    let end = parse_bound(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }
    if start != UNSPECIFIED && end != UNSPECIFIED && end < start {
        return None;
    }
    Some(ByteRange::new(start, end))
}

fn parse_bound(field: &str) -> Option<i64> {
    if field.is_empty() {
        return Some(UNSPECIFIED);
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Split a bounded range into consecutive pieces of at most `max_chunk`
/// bytes. A non-positive `max_chunk` leaves the range whole.
fn split_range(range: ByteRange, max_chunk: i64) -> impl Iterator<Item = ByteRange> {
    let step = if max_chunk > 0 { max_chunk } else { i64::MAX };
    let mut next = Some(range.start);
    std::iter::from_fn(move || {
        let start = next?;
        let end = range.end.min(start.saturating_add(step - 1));
        next = (end < range.end).then_some(end + 1);
        Some(ByteRange::new(start, end))
    })
}
