use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the third-party-copy handler.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
///
/// # Examples
///
/// ```
/// use davrelay_tpc::TpcConfig;
///
/// let config = TpcConfig::from_toml_str("marker_period = 2\nchecksums = \"0:adler32\"").unwrap();
/// assert_eq!(config.marker_period().as_secs(), 2);
/// assert_eq!(config.stall_timeout().as_secs(), 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TpcConfig {
    /// Seconds between two performance markers.
    pub marker_period: u64,

    /// Seconds allowed before the first byte moves.
    pub first_timeout: u64,

    /// Seconds allowed without progress once bytes have moved.
    pub stall_timeout: u64,

    /// Seconds allowed for the remote size probe of a pull.
    pub connect_timeout: u64,

    /// Buffer unit for single-stream transfers, in bytes.
    pub block_size: usize,

    /// Buffer unit for multi-stream pulls, in bytes.
    pub small_block_size: usize,

    /// Blocks in flight per stream between network and storage.
    pub pipelining_multiplier: usize,

    /// Upper bound of `X-Number-Of-Streams`.
    pub max_streams: u32,

    /// Largest byte range handed to the storage backend in one request.
    pub max_chunk_size: i64,

    /// Use `https` in redirect `Location` headers.
    pub dest_https: bool,

    /// Erasure-coded storage cannot truncate on open.
    pub erasure_coded: bool,

    /// Checksum catalog as `index:name` pairs, e.g. `"0:adler32,1:sha256"`.
    pub checksums: String,

    /// PEM bundle used to verify remote peers.
    pub ca_file: Option<PathBuf>,

    /// Directory of PEM certificates used to verify remote peers.
    pub ca_dir: Option<PathBuf>,
}

impl Default for TpcConfig {
    fn default() -> Self {
        Self {
            marker_period: 5,
            first_timeout: 120,
            stall_timeout: 60,
            connect_timeout: 60,
            block_size: 16 * 1024 * 1024,
            small_block_size: 1024 * 1024,
            pipelining_multiplier: 2,
            max_streams: 100,
            max_chunk_size: 512 * 1024,
            dest_https: false,
            erasure_coded: false,
            checksums: String::new(),
            ca_file: None,
            ca_dir: None,
        }
    }
}

impl TpcConfig {
    pub fn from_toml_str(document: &str) -> crate::error::Result<Self> {
        Ok(toml::from_str(document)?)
    }

    pub fn marker_period(&self) -> Duration {
        Duration::from_secs(self.marker_period.max(1))
    }

    pub fn first_timeout(&self) -> Duration {
        Duration::from_secs(self.first_timeout)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Buffer unit for a transfer with `streams` parallel streams.
    ///
    /// Many streams get the small unit so total memory stays bounded.
    pub fn block_size_for(&self, streams: u32) -> usize {
        if streams > 1 {
            self.small_block_size.max(1)
        } else {
            self.block_size.max(1)
        }
    }

    /// Number of blocks buffered per stream.
    pub fn pipeline_depth(&self) -> usize {
        self.pipelining_multiplier.max(1)
    }
}
