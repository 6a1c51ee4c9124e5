use crate::data::ByteRange;
use crate::error::{Result, TpcError};

/// The part of a file one stream of a multi-stream pull is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Segment index (0-based)
    pub index: u32,
    /// Starting byte offset
    pub start: u64,
    /// Ending byte offset (exclusive)
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Inclusive range for a `Range` request header.
    pub fn to_byte_range(&self) -> ByteRange {
        ByteRange::new(self.start as i64, self.end as i64 - 1)
    }
}

/// Split `file_size` bytes evenly across `num_segments` streams.
///
/// The first `file_size % num_segments` segments get one extra byte, so
/// segments differ in length by at most one and cover the file without
/// gaps. More segments than bytes yields empty trailing segments.
pub fn calculate_segments(file_size: u64, num_segments: u32) -> Result<Vec<Segment>> {
    if num_segments == 0 {
        return Err(TpcError::InvalidState(
            "number of segments must be greater than 0".into(),
        ));
    }

    if file_size == 0 {
        return Ok(vec![Segment { index: 0, start: 0, end: 0 }]);
    }

    let count = num_segments as u64;
    let segment_size = file_size / count;
    let remainder = file_size % count;

    let mut segments = Vec::with_capacity(num_segments as usize);
    let mut offset = 0;
    for i in 0..count {
        let size = if i < remainder { segment_size + 1 } else { segment_size };
        segments.push(Segment {
            index: i as u32,
            start: offset,
            end: offset + size,
        });
        offset += size;
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_segments_rejected() {
        assert!(calculate_segments(10, 0).is_err());
    }

    #[test]
    fn test_even_split() {
        let segments = calculate_segments(100, 4).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.len() == 25));
        assert_eq!(segments[3].end, 100);
    }

    #[test]
    fn test_remainder_goes_to_first_segments() {
        let segments = calculate_segments(10, 3).unwrap();
        let lengths: Vec<_> = segments.iter().map(Segment::len).collect();
        assert_eq!(lengths, [4, 3, 3]);
        assert_eq!(segments[1].to_byte_range(), ByteRange::new(4, 6));
    }

    #[test]
    fn test_contiguous_cover() {
        let segments = calculate_segments(1_000_003, 7).unwrap();
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(segments.first().unwrap().start, 0);
        assert_eq!(segments.last().unwrap().end, 1_000_003);
    }

    #[test]
    fn test_more_segments_than_bytes() {
        let segments = calculate_segments(2, 4).unwrap();
        assert_eq!(segments.iter().filter(|s| s.is_empty()).count(), 2);
    }

    #[test]
    fn test_empty_file() {
        let segments = calculate_segments(0, 4).unwrap();
        assert_eq!(segments, [Segment { index: 0, start: 0, end: 0 }]);
    }
}
