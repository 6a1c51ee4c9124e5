use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Level, debug, error, info, warn};

use super::request::{CopyRequest, Direction};

/// Receives every finished transfer record.
///
/// Injected into the handler at construction; implementations forward to a
/// monitoring stream, a database, or a test collector.
pub trait TransferMonitor: Send + Sync {
    fn report(&self, record: &TransferLogRecord);
}

/// Audit record of one transfer attempt.
///
/// Finalized exactly once: explicitly through [`finalize`](Self::finalize)
/// or implicitly when dropped, whichever comes first. Early returns from the
/// handler therefore still report.
pub struct TransferLogRecord {
    pub direction: Direction,
    pub client_id: String,
    pub user: Option<String>,
    /// Local resource path.
    pub local: String,
    /// Remote URL.
    pub remote: String,
    pub streams: u32,
    /// Status sent to the client; `Some(0)` after a successful transfer.
    pub status: Option<u16>,
    /// Last status returned by the remote peer.
    pub tpc_status: Option<u16>,
    pub bytes_transferred: Option<u64>,
    pub is_ipv6: bool,
    pub created: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    monitor: Option<Arc<dyn TransferMonitor>>,
    finalized: bool,
}

impl TransferLogRecord {
    pub fn new(
        req: &CopyRequest,
        direction: Direction,
        remote: impl Into<String>,
        monitor: Option<Arc<dyn TransferMonitor>>,
    ) -> Self {
        Self {
            direction,
            client_id: req.security.client_id.clone(),
            user: req.security.name.clone(),
            local: req.resource.clone(),
            remote: remote.into(),
            streams: 1,
            status: None,
            tpc_status: None,
            bytes_transferred: None,
            is_ipv6: false,
            created: Utc::now(),
            completed: None,
            monitor,
            finalized: false,
        }
    }

    /// Code reported to the monitor: 0 on success, the remote status when
    /// one was seen, 1 otherwise.
    pub fn end_code(&self) -> u16 {
        match (self.status, self.tpc_status) {
            (Some(0), _) => 0,
            (_, Some(remote)) if remote > 0 => remote,
            _ => 1,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Stamp the completion time and hand the record to the monitor.
    /// Later calls do nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.completed = Some(Utc::now());
        if let Some(monitor) = self.monitor.take() {
            monitor.report(self);
        }
    }

    /// Emit a transfer event with the record's identity and progress.
    pub fn log(&self, level: Level, event: &str, message: &str) {
        let kind = self.direction.log_prefix();
        let user = self.user.as_deref().unwrap_or("(anonymous)");
        macro_rules! emit {
            ($mac:ident) => {
                $mac!(
                    kind,
                    event,
                    local = %self.local,
                    remote = %self.remote,
                    user,
                    streams = self.streams,
                    bytes_transferred = ?self.bytes_transferred,
                    status = ?self.status,
                    tpc_status = ?self.tpc_status,
                    "{message}"
                )
            };
        }
        match level {
            Level::ERROR => emit!(error),
            Level::WARN => emit!(warn),
            Level::INFO => emit!(info),
            _ => emit!(debug),
        }
    }
}

impl Drop for TransferLogRecord {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for TransferLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferLogRecord")
            .field("direction", &self.direction)
            .field("client_id", &self.client_id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("streams", &self.streams)
            .field("status", &self.status)
            .field("tpc_status", &self.tpc_status)
            .field("bytes_transferred", &self.bytes_transferred)
            .field("finalized", &self.finalized)
            .finish()
    }
}
