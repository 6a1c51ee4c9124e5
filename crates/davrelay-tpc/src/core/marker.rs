use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// One progress report sent to the client while a transfer runs.
///
/// Renders as the fixed text record clients parse:
///
/// ```text
/// Perf Marker
/// Timestamp: 1700000000
/// Stripe Index: 0
/// Stripe Bytes Transferred: 1048576
/// Total Stripe Count: 1
/// RemoteConnections: tcp:192.0.2.1:443
/// End
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfMarker {
    /// Unix seconds.
    pub timestamp: i64,
    pub bytes: u64,
    /// `tcp:<ip>:<port>` descriptors of the open remote connections.
    pub connections: Vec<String>,
}

impl PerfMarker {
    pub fn new(bytes: u64, connections: Vec<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            bytes,
            connections,
        }
    }
}

impl fmt::Display for PerfMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Perf Marker")?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Stripe Index: 0")?;
        writeln!(f, "Stripe Bytes Transferred: {}", self.bytes)?;
        writeln!(f, "Total Stripe Count: 1")?;
        if !self.connections.is_empty() {
            writeln!(f, "RemoteConnections: {}", self.connections.join(","))?;
        }
        writeln!(f, "End")
    }
}

/// What the transfer loop should do when the marker clock fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerTick {
    /// The period has not elapsed yet.
    NotDue,
    /// Send a marker; the next one is due one period from now.
    Emit,
    /// No bytes moved within `timeout`; abort the transfer.
    Stalled { timeout: Duration },
}

/// Marker cadence and progress timeout for one transfer.
///
/// Pure bookkeeping: the caller supplies the current time and byte count,
/// so the clock works the same under a paused test runtime.
#[derive(Debug, Clone)]
pub struct MarkerClock {
    period: Duration,
    first_timeout: Duration,
    stall_timeout: Duration,
    next_due: Instant,
    last_advance: Instant,
    last_bytes: u64,
    moved: bool,
}

impl MarkerClock {
    /// The first marker is due immediately.
    pub fn new(now: Instant, period: Duration, first_timeout: Duration, stall_timeout: Duration) -> Self {
        Self {
            period,
            first_timeout,
            stall_timeout,
            next_due: now,
            last_advance: now,
            last_bytes: 0,
            moved: false,
        }
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Timeout currently in force: the first-byte timeout until anything
    /// moves, the stall timeout afterwards.
    pub fn timeout(&self) -> Duration {
        if self.moved { self.stall_timeout } else { self.first_timeout }
    }

    pub fn poll(&mut self, now: Instant, bytes: u64) -> MarkerTick {
        if now < self.next_due {
            return MarkerTick::NotDue;
        }

        if bytes > self.last_bytes {
            self.last_bytes = bytes;
            self.last_advance = now;
            self.moved = true;
        }

        let timeout = self.timeout();
        if now.duration_since(self.last_advance) > timeout {
            return MarkerTick::Stalled { timeout };
        }

        self.next_due = now + self.period;
        MarkerTick::Emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(now: Instant) -> MarkerClock {
        MarkerClock::new(now, Duration::from_secs(5), Duration::from_secs(120), Duration::from_secs(60))
    }

    #[test]
    fn test_marker_format() {
        let marker = PerfMarker {
            timestamp: 1_700_000_000,
            bytes: 42,
            connections: vec!["tcp:192.0.2.1:443".into(), "tcp:[2001:db8::1]:443".into()],
        };
        assert_eq!(
            marker.to_string(),
            "Perf Marker\nTimestamp: 1700000000\nStripe Index: 0\nStripe Bytes Transferred: 42\n\
             Total Stripe Count: 1\nRemoteConnections: tcp:192.0.2.1:443,tcp:[2001:db8::1]:443\nEnd\n"
        );
    }

    #[test]
    fn test_marker_without_connections() {
        let marker = PerfMarker { timestamp: 1, bytes: 0, connections: Vec::new() };
        assert!(!marker.to_string().contains("RemoteConnections"));
    }

    #[test]
    fn test_first_marker_is_immediate() {
        let start = Instant::now();
        let mut clock = clock(start);
        assert_eq!(clock.poll(start, 0), MarkerTick::Emit);
        assert_eq!(clock.poll(start + Duration::from_secs(4), 0), MarkerTick::NotDue);
        assert_eq!(clock.poll(start + Duration::from_secs(5), 0), MarkerTick::Emit);
    }

    #[test]
    fn test_first_timeout_before_any_byte() {
        let start = Instant::now();
        let mut clock = clock(start);
        assert_eq!(clock.poll(start + Duration::from_secs(120), 0), MarkerTick::Emit);
        assert_eq!(
            clock.poll(start + Duration::from_secs(125), 0),
            MarkerTick::Stalled { timeout: Duration::from_secs(120) }
        );
    }

    #[test]
    fn test_stall_timeout_after_progress() {
        let start = Instant::now();
        let mut clock = clock(start);
        assert_eq!(clock.poll(start + Duration::from_secs(10), 100), MarkerTick::Emit);
        assert_eq!(clock.timeout(), Duration::from_secs(60));
        assert_eq!(clock.poll(start + Duration::from_secs(70), 100), MarkerTick::Emit);
        assert_eq!(
            clock.poll(start + Duration::from_secs(75), 100),
            MarkerTick::Stalled { timeout: Duration::from_secs(60) }
        );
    }

    #[test]
    fn test_progress_resets_stall() {
        let start = Instant::now();
        let mut clock = clock(start);
        clock.poll(start + Duration::from_secs(10), 1);
        assert_eq!(clock.poll(start + Duration::from_secs(65), 2), MarkerTick::Emit);
        assert_eq!(clock.poll(start + Duration::from_secs(120), 2), MarkerTick::Emit);
    }

    #[test]
    fn test_cadence_bound() {
        let start = Instant::now();
        let mut clock = clock(start);
        let mut markers = 0;
        // one poll per simulated 100 ms over 33 s
        for step in 0..=330u64 {
            if clock.poll(start + Duration::from_millis(step * 100), step) == MarkerTick::Emit {
                markers += 1;
            }
        }
        assert!(markers <= 33 / 5 + 1);
        assert_eq!(markers, 7);
    }
}
