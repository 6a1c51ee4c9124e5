use std::collections::BTreeMap;

/// Highest weight a `Want-Repr-Digest` preference may carry.
const MAX_WEIGHT: u8 = 10;

/// One `name=weight` entry of a `Want-Repr-Digest` header.
///
/// The weight is informational; selection never reorders on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestPreference {
    pub name: String,
    pub weight: u8,
}

/// Parse a `Repr-Digest` value such as `adler32=:AAAAAA==:, sha-256=:...:`.
///
/// Returns digest name → base64 value. Entries missing the `=`, either colon,
/// or a value are skipped, as are entries whose opening colon does not
/// directly follow the `=`.
pub fn parse_repr_digest(header: &str) -> BTreeMap<String, String> {
    let mut digests = BTreeMap::new();
    for pair in header.split(',') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let Some(inner) = value
            .strip_prefix(':')
            .and_then(|rest| rest.rfind(':').map(|end| &rest[..end]))
        else {
            continue;
        };
        let inner = inner.trim();
        if inner.is_empty() {
            continue;
        }
        digests.insert(name.to_string(), inner.to_string());
    }
    digests
}

/// Parse a `Want-Repr-Digest` value such as `sha-256=10, adler32=3`.
///
/// Weights are clamped to `0..=10`; entries whose weight is not an integer
/// are dropped. Order of appearance is kept.
pub fn parse_want_repr_digest(header: &str) -> Vec<DigestPreference> {
    header
        .split(',')
        .filter_map(|pair| {
            let (name, weight) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let weight: i64 = weight.trim().parse().ok()?;
            Some(DigestPreference {
                name: name.to_string(),
                weight: weight.clamp(0, MAX_WEIGHT as i64) as u8,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_digest_single() {
        let digests = parse_repr_digest("adler32=:AAAAAA==:");
        assert_eq!(digests.len(), 1);
        assert_eq!(digests["adler32"], "AAAAAA==");
    }

    #[test]
    fn test_repr_digest_multiple_with_spaces() {
        let digests = parse_repr_digest("adler32=:AAAAAA==:, sha-256=: abc= :");
        assert_eq!(digests["adler32"], "AAAAAA==");
        assert_eq!(digests["sha-256"], "abc=");
    }

    #[test]
    fn test_repr_digest_malformed_dropped() {
        assert!(parse_repr_digest("adler32=:AAAAAA==").is_empty());
        assert!(parse_repr_digest("adler32=::").is_empty());
        assert!(parse_repr_digest("adler32=AAAAAA==:").is_empty());
        assert!(parse_repr_digest("adler32:AAAAAA==:").is_empty());
        assert!(parse_repr_digest("adler32=").is_empty());
        assert!(parse_repr_digest("").is_empty());
    }

    #[test]
    fn test_repr_digest_colon_must_follow_equals() {
        assert!(parse_repr_digest("adler32= :AAAAAA==:").is_empty());
        let digests = parse_repr_digest("adler32= :AAAAAA==:, crc32=:AAAAAA==:  ");
        assert_eq!(digests.len(), 1);
        assert_eq!(digests["crc32"], "AAAAAA==");
    }

    #[test]
    fn test_repr_digest_keeps_good_entries_next_to_bad_ones() {
        let digests = parse_repr_digest("md5=:broken, adler32=:AAAAAA==:");
        assert_eq!(digests.len(), 1);
        assert!(digests.contains_key("adler32"));
    }

    #[test]
    fn test_want_repr_digest_clamps() {
        let prefs = parse_want_repr_digest("sha-256=12, adler32=3, md5=-1");
        assert_eq!(
            prefs,
            vec![
                DigestPreference { name: "sha-256".into(), weight: 10 },
                DigestPreference { name: "adler32".into(), weight: 3 },
                DigestPreference { name: "md5".into(), weight: 0 },
            ]
        );
    }

    #[test]
    fn test_want_repr_digest_drops_non_integers() {
        let prefs = parse_want_repr_digest("sha-256=high, adler32=5, crc32");
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].name, "adler32");
    }
}
