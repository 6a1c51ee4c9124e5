//! HTTP third-party copy: pull into or push out of local storage on a
//! client's behalf.
//!
//! A client sends `COPY` with a `Source` header (pull: this server fetches
//! the remote URL into the local resource) or a `Destination` header (push:
//! this server uploads the local resource). The response is a chunked `201`
//! carrying periodic perf markers and one final `success:` or `failure:`
//! line.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable configuration and types
//! - [`core`] - Pure transformations
//! - [`effects`] - I/O operations with trait abstraction
//!
//! # Key Features
//!
//! - **Multi-stream pulls**: `X-Number-Of-Streams` splits the source into
//!   segments fetched concurrently into one local file
//! - **Bounded buffering**: each stream holds at most a few blocks between
//!   network and storage
//! - **Progress timeouts**: a transfer that stops moving bytes is aborted
//!   and reported, never left hanging
//! - **Digest negotiation**: `Repr-Digest` / `Want-Repr-Digest` are mapped
//!   onto the configured storage checksums

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use self::core::{
    MarkerClock, MarkerTick, Outcome, PerfMarker, RangeError, Segment, calculate_segments, parse_byte_ranges,
};
pub use self::data::{
    ByteRange, CopyRequest, Direction, RangePlan, SecurityContext, TpcConfig, TransferLogRecord, TransferMonitor,
    UNSPECIFIED,
};
pub use self::effects::{
    BoxStream, ChannelResponder, ClientChannel, ConnectionObserver, FsFile, FsStorage, LocalFile, OpenError,
    OpenMode, OpenOutcome, OpenRequest, PushBody, RemoteClient, RemoteHead, RemoteResponse, ResponseEvent,
    Storage, StreamProgress, TpcHandler, TransferIds, TransferState,
};

#[cfg(feature = "reqwest")]
pub use self::effects::ReqwestClient;

pub use self::error::{Result, TpcError};
