//! Immutable configuration and value types for third-party copies.
//!
//! Everything here is created at the start of one COPY request and dropped
//! when its response is complete; nothing is shared across requests.

pub mod config;
pub mod range;
pub mod record;
pub mod request;

pub use config::TpcConfig;
pub use range::{ByteRange, RangePlan, UNSPECIFIED};
pub use record::{TransferLogRecord, TransferMonitor};
pub use request::{CopyRequest, Direction, SecurityContext};
