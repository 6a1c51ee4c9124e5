use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use tracing::debug;

use crate::error::{DigestError, Result};

/// Checksums the storage layer can compute that also have an HTTP digest name.
///
/// `(storage name, http name, base64 padding)`
const HTTP_DIGESTS: &[(&str, &str, bool)] = &[
    ("md5", "md5", true),
    ("adler32", "adler32", false),
    ("sha1", "sha", true),
    ("sha256", "sha-256", true),
    ("sha512", "sha-512", true),
    ("cksum", "UNIXcksum", false),
    ("crc32", "crc32", false),
    ("crc32c", "crc32c", true),
];

/// A checksum known both to storage and to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestDescriptor {
    storage_name: String,
    http_name: String,
    needs_base64_padding: bool,
}

impl DigestDescriptor {
    fn lookup(name: &str) -> Option<Self> {
        let wanted = normalize(name);
        HTTP_DIGESTS
            .iter()
            .find(|(storage, http, _)| normalize(storage) == wanted || normalize(http) == wanted)
            .map(|&(storage, http, padding)| Self {
                storage_name: storage.to_string(),
                http_name: http.to_string(),
                needs_base64_padding: padding,
            })
    }

    /// Name used by the storage backend (`sha256`).
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    /// Name used in HTTP digest headers (`sha-256`).
    pub fn http_name(&self) -> &str {
        &self.http_name
    }

    pub fn needs_base64_padding(&self) -> bool {
        self.needs_base64_padding
    }

    /// Whether `name` refers to this checksum under either naming scheme.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        name == normalize(&self.storage_name) || name == normalize(&self.http_name)
    }

    /// Encode raw checksum bytes as an HTTP digest value.
    pub fn http_value(&self, raw: &[u8]) -> String {
        if self.needs_base64_padding {
            STANDARD.encode(raw)
        } else {
            STANDARD_NO_PAD.encode(raw)
        }
    }

    /// Convert an HTTP digest value (base64, padded or not) into the
    /// lowercase hex form the storage layer expects.
    pub fn storage_value(&self, http_value: &str) -> Result<String> {
        let trimmed = http_value.trim().trim_end_matches('=');
        let raw = STANDARD_NO_PAD.decode(trimmed)?;
        Ok(hex::encode(raw))
    }
}

/// Canonical form used for name comparison: lowercase, `sha-NNN` → `shaNNN`.
fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_prefix("sha-") {
        Some(bits) => format!("sha{bits}"),
        None => lower,
    }
}

/// Priority-ordered set of configured checksums.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestCatalog {
    entries: Vec<DigestDescriptor>,
    non_iana: Vec<String>,
}

impl DigestCatalog {
    /// Parse a configuration string of `index:name` pairs, e.g.
    /// `"0:adler32,1:sha256"`.
    ///
    /// Entries are ordered by index; a repeated index replaces the earlier
    /// entry. Names without an HTTP digest equivalent are kept in
    /// [`non_iana`](Self::non_iana) and are never selected.
    pub fn configure(spec: &str) -> Result<Self> {
        let mut by_index = BTreeMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (index, name) = entry
                .split_once(':')
                .ok_or_else(|| DigestError::InvalidEntry(entry.to_string()))?;
            let index: u32 = index
                .trim()
                .parse()
                .map_err(|_| DigestError::InvalidIndex(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(DigestError::InvalidEntry(entry.to_string()));
            }
            by_index.insert(index, name.to_string());
        }

        let mut catalog = Self::default();
        for name in by_index.into_values() {
            match DigestDescriptor::lookup(&name) {
                Some(descriptor) => catalog.entries.push(descriptor),
                None => {
                    debug!(checksum = %name, "configured checksum has no HTTP digest name");
                    catalog.non_iana.push(name);
                }
            }
        }
        Ok(catalog)
    }

    /// Selectable entries, highest priority first.
    pub fn entries(&self) -> &[DigestDescriptor] {
        &self.entries
    }

    /// Configured checksums that cannot appear in HTTP digest headers.
    pub fn non_iana(&self) -> &[String] {
        &self.non_iana
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.non_iana.is_empty()
    }

    /// Find the entry for a single digest name.
    pub fn find(&self, name: &str) -> Option<&DigestDescriptor> {
        self.entries.iter().find(|d| d.matches(name))
    }

    /// Choose the checksum to use for a comma-separated list of requested
    /// digest names.
    ///
    /// The first requested name that is configured wins; `;q=` weights are
    /// dropped and do not reorder anything. Without a match the first
    /// configured entry is used. `None` when nothing HTTP-compatible is
    /// configured.
    pub fn select(&self, requested: &str) -> Option<&DigestDescriptor> {
        requested
            .split(',')
            .map(|candidate| candidate.split(';').next().unwrap_or_default().trim())
            .filter(|candidate| !candidate.is_empty())
            .find_map(|candidate| self.find(candidate))
            .or_else(|| self.entries.first())
    }
}
