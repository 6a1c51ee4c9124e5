//! The remote transfer loop.
//!
//! Every stream of a transfer is a future borrowing the shared
//! [`TransferState`] and the local file. [`drive`] polls them together with
//! the marker clock on a single task, so perf markers and the progress
//! timeout keep their cadence no matter how data moves.

use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::time::{Instant, sleep_until};
use tracing::{Level, debug};

use super::buffer::{PipeConfig, PipeError, pull_into, push_channel, push_from, read_error_body};
use super::client::ClientChannel;
use super::http::{ConnectionObserver, RemoteClient};
use super::state::TransferState;
use super::storage::LocalFile;
use crate::core::{MarkerClock, MarkerTick, PerfMarker, Segment, timeout_message};
use crate::data::{ByteRange, Direction, TpcConfig, TransferLogRecord, UNSPECIFIED};
use crate::error::{Result, TpcError};

/// How the transfer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    /// Every stream finished, or one failed and the rest were stopped.
    Finished,
    /// No bytes moved within the applicable timeout.
    TimedOut,
    /// A perf marker could not be delivered.
    ClientGone,
}

/// One remote transfer: where to, over which client, into which file.
pub struct Transfer<'a, C, F> {
    pub client: &'a C,
    pub file: &'a F,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    pub pipe: PipeConfig,
    pub state: &'a TransferState,
}

impl<C: RemoteClient, F: LocalFile> Transfer<'_, C, F> {
    /// GET `range` (the whole resource for `None`) into the file at
    /// `offset`. Failures are recorded in the state; returns the bytes
    /// written on success.
    async fn fetch(&self, stream: usize, range: Option<ByteRange>, offset: u64, whole_file: bool) -> Option<u64> {
        let progress = self.state.stream(stream);
        let mut headers = self.headers.to_vec();
        if let Some(value) = range.and_then(|r| r.to_header_value()) {
            headers.push(("Range".to_string(), value));
        }

        let response = match self.client.get(self.url, &headers, progress).await {
            Ok(response) => response,
            Err(e) => {
                self.state.set_transport_error(e.to_string());
                return None;
            }
        };
        self.state.set_status(response.status);

        if response.status >= 400 {
            let message = read_error_body(response.body).await;
            self.state.set_remote_message(message);
            progress.on_close();
            return None;
        }
        if range.is_some() && response.status != 206 && !whole_file {
            self.state.set_transport_error(format!(
                "remote answered a byte range request with status {}",
                response.status
            ));
            progress.on_close();
            return None;
        }

        let result = pull_into(response.body, self.file, offset, self.pipe, progress).await;
        progress.on_close();
        match result {
            Ok(written) => Some(written),
            Err(PipeError::Remote(message)) => {
                self.state.set_transport_error(message);
                None
            }
            Err(PipeError::Local(e)) => {
                self.state.set_local_error(e.to_string());
                None
            }
        }
    }

    fn check_length(&self, written: u64, expected: u64) {
        if written < expected {
            self.state.set_transport_error(format!(
                "remote closed the connection after {written} of {expected} bytes"
            ));
        }
    }

    /// One stream of a pull: the whole resource, or one segment of it.
    pub async fn pull_stream(&self, segment: Option<Segment>) {
        let Some(segment) = segment else {
            self.fetch(0, None, 0, true).await;
            return;
        };
        let whole = segment.start == 0 && self.state.content_length() == Some(segment.end);
        let range = segment.to_byte_range();
        if let Some(written) = self.fetch(segment.index as usize, Some(range), segment.start, whole).await {
            self.check_length(written, segment.len());
        }
    }

    /// Fetch `ranges` one after another, storing them back to back.
    pub async fn pull_ranges(&self, ranges: Vec<ByteRange>) {
        let content_length = self.state.content_length();
        let mut offset = 0;
        for range in ranges {
            let whole = range.start <= 0
                && (range.end == UNSPECIFIED
                    || content_length.is_some_and(|len| range.end >= 0 && range.end as u64 + 1 >= len));
            let Some(written) = self.fetch(0, Some(range), offset, whole).await else {
                return;
            };
            if let Some(expected) = range.len() {
                self.check_length(written, expected as u64);
            }
            if self.state.has_failed() {
                return;
            }
            offset += written;
        }
    }

    /// Upload `len` bytes of the local file.
    pub async fn push(&self, len: u64) {
        let progress = self.state.stream(0);
        let (tx, body) = push_channel(self.pipe, len, progress);
        let (produced, response) = tokio::join!(
            push_from(self.file, len, self.pipe, tx),
            self.client.put(self.url, self.headers, body, progress)
        );

        if let Err(e) = produced {
            self.state.set_local_error(e.to_string());
        }
        match response {
            Ok(response) => {
                self.state.set_status(response.status);
                if response.status >= 400 {
                    let message = read_error_body(response.body).await;
                    self.state.set_remote_message(message);
                }
            }
            Err(e) => self.state.set_transport_error(e.to_string()),
        }
        progress.on_close();
    }
}

/// Drive `streams` to completion while sending perf markers.
///
/// Each wake-up either harvests a finished stream or services the marker
/// clock. The loop stops when all streams are done, when any of them
/// failed, on the progress timeout, or when a marker cannot be sent.
/// Dropping the remaining stream futures cancels them.
pub async fn drive<Fut, Ch>(
    mut streams: FuturesUnordered<Fut>,
    state: &TransferState,
    config: &TpcConfig,
    record: &TransferLogRecord,
    out: &mut Ch,
) -> LoopEnd
where
    Fut: Future<Output = ()>,
    Ch: ClientChannel,
{
    enum Wake {
        StreamDone,
        Clock,
    }

    let mut clock = MarkerClock::new(
        Instant::now(),
        config.marker_period(),
        config.first_timeout(),
        config.stall_timeout(),
    );

    while !streams.is_empty() {
        let wake = tokio::select! {
            _ = streams.next() => Wake::StreamDone,
            _ = sleep_until(clock.next_due()) => Wake::Clock,
        };

        match wake {
            Wake::StreamDone => {
                if state.has_failed() {
                    break;
                }
            }
            Wake::Clock => match clock.poll(Instant::now(), state.bytes_transferred()) {
                MarkerTick::NotDue => {}
                MarkerTick::Stalled { timeout } => {
                    let message = timeout_message(record.direction, timeout.as_secs());
                    record.log(Level::ERROR, "TRANSFER_FAIL", &message);
                    state.set_local_error(message);
                    return LoopEnd::TimedOut;
                }
                MarkerTick::Emit => {
                    let marker = PerfMarker::new(state.bytes_transferred(), state.connections());
                    if let Err(e) = out.send_chunk(&marker.to_string()).await {
                        record.log(Level::WARN, "PERFMARKER_FAIL", &e.to_string());
                        return LoopEnd::ClientGone;
                    }
                    debug!(event = "PERF_MARKER", bytes = marker.bytes, connections = ?marker.connections);
                }
            },
        }
    }

    LoopEnd::Finished
}

/// Close the local file, classify the outcome and send the final chunk.
///
/// The file is closed before anything else is sent so a follow-up request
/// never sees a half-closed resource.
pub async fn finish<F, Ch>(
    end: LoopEnd,
    file: F,
    state: &TransferState,
    record: &mut TransferLogRecord,
    out: &mut Ch,
) -> Result<()>
where
    F: LocalFile,
    Ch: ClientChannel,
{
    if let Err(e) = file.close().await {
        state.set_local_error(format!("failed to close local file: {e}"));
    }

    record.bytes_transferred = Some(state.bytes_transferred());
    record.tpc_status = state.status();
    record.is_ipv6 = state.is_ipv6();

    if end == LoopEnd::ClientGone {
        record.status = Some(500);
        record.finalize();
        return Err(TpcError::client_gone());
    }

    let outcome = state.outcome();
    let message = outcome.final_message(&record.local, &record.remote);
    if outcome.is_success() {
        record.status = Some(0);
        record.log(Level::INFO, "TRANSFER_SUCCESS", &message);
    } else {
        record.status = Some(500);
        record.log(Level::ERROR, "TRANSFER_ERROR", &message);
    }

    let sent = match out.send_chunk(&message).await {
        Ok(()) => out.send_chunk("").await,
        Err(e) => Err(e),
    };
    record.finalize();
    sent.map_err(TpcError::Client)
}

/// Block sizing for a transfer with `streams` streams.
pub fn pipe_config(config: &TpcConfig, streams: u32) -> PipeConfig {
    PipeConfig {
        block_size: config.block_size_for(streams),
        depth: config.pipeline_depth(),
    }
}

/// Which requests a pull issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullPlan {
    /// One GET for the whole resource.
    Single,
    /// One ranged GET per segment, concurrently.
    Segmented(Vec<Segment>),
    /// The client's byte ranges, fetched in order over one stream.
    Ranged(Vec<ByteRange>),
}

impl PullPlan {
    pub fn streams(&self) -> u32 {
        match self {
            PullPlan::Segmented(segments) => segments.len() as u32,
            _ => 1,
        }
    }
}

/// Run a pull according to `plan`.
pub async fn run_pull<C, F, Ch>(
    transfer: &Transfer<'_, C, F>,
    plan: PullPlan,
    config: &TpcConfig,
    record: &TransferLogRecord,
    out: &mut Ch,
) -> LoopEnd
where
    C: RemoteClient,
    F: LocalFile,
    Ch: ClientChannel,
{
    match plan {
        PullPlan::Ranged(ranges) => {
            let streams = std::iter::once(transfer.pull_ranges(ranges)).collect();
            drive(streams, transfer.state, config, record, out).await
        }
        PullPlan::Single => {
            let streams = std::iter::once(transfer.pull_stream(None)).collect();
            drive(streams, transfer.state, config, record, out).await
        }
        PullPlan::Segmented(segments) => {
            let streams = segments
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| transfer.pull_stream(Some(s)))
                .collect();
            drive(streams, transfer.state, config, record, out).await
        }
    }
}

/// Run a push of `len` bytes.
pub async fn run_push<C, F, Ch>(
    transfer: &Transfer<'_, C, F>,
    len: u64,
    config: &TpcConfig,
    record: &TransferLogRecord,
    out: &mut Ch,
) -> LoopEnd
where
    C: RemoteClient,
    F: LocalFile,
    Ch: ClientChannel,
{
    let streams = std::iter::once(transfer.push(len)).collect();
    drive(streams, transfer.state, config, record, out).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_config_by_streams() {
        let config = TpcConfig::default();
        assert_eq!(pipe_config(&config, 1).block_size, 16 * 1024 * 1024);
        assert_eq!(pipe_config(&config, 4).block_size, 1024 * 1024);
        assert_eq!(pipe_config(&config, 4).depth, 2);
    }

    #[test]
    fn test_plan_streams() {
        assert_eq!(PullPlan::Single.streams(), 1);
        assert_eq!(PullPlan::Ranged(vec![ByteRange::new(0, 1)]).streams(), 1);
        let segments = crate::core::calculate_segments(10, 3).unwrap();
        assert_eq!(PullPlan::Segmented(segments).streams(), 3);
    }
}
