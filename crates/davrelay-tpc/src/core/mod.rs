//! Pure transformations: no I/O, no clocks of their own.

pub mod marker;
pub mod message;
pub mod range;
pub mod segment;
pub mod url;

pub use marker::{MarkerClock, MarkerTick, PerfMarker};
pub use message::{Outcome, client_error, timeout_message};
pub use range::{RangeError, parse_byte_ranges};
pub use segment::{Segment, calculate_segments};
