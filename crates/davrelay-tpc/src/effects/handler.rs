use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use davrelay_digest::{DigestCatalog, parse_repr_digest, parse_want_repr_digest};
use http::Method;
use tracing::{Instrument, Level, info_span, warn};

use super::client::ClientChannel;
use super::http::RemoteClient;
use super::state::TransferState;
use super::storage::{LocalFile, OpenMode, OpenOutcome, OpenRequest, Storage};
use super::transfer::{PullPlan, Transfer, finish, pipe_config, run_pull, run_push};
use crate::core::url::{authz_opaque, join_opaque, redirect_location, rewrite_davs, split_resource};
use crate::core::{calculate_segments, client_error, parse_byte_ranges};
use crate::data::{CopyRequest, Direction, TpcConfig, TransferLogRecord, TransferMonitor};
use crate::error::{Result, TpcError};

/// Process-wide transfer id counter.
///
/// Clones share the same counter, so one instance can be handed to every
/// handler of a server.
#[derive(Debug, Clone, Default)]
pub struct TransferIds(Arc<AtomicU64>);

impl TransferIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id; the first one is 1.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last id handed out.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handles `COPY` and `OPTIONS` requests for third-party copies.
///
/// One handler serves many concurrent requests; each call to
/// [`handle`](Self::handle) owns its transfer state, local file and
/// response channel.
pub struct TpcHandler<S, C> {
    config: TpcConfig,
    storage: S,
    client: C,
    catalog: DigestCatalog,
    ids: TransferIds,
    monitor: Option<Arc<dyn TransferMonitor>>,
}

impl<S, C> TpcHandler<S, C>
where
    S: Storage,
    C: RemoteClient,
{
    /// Fails only when the configured checksum list is malformed.
    pub fn new(config: TpcConfig, storage: S, client: C) -> Result<Self> {
        let catalog = DigestCatalog::configure(&config.checksums)?;
        Ok(Self {
            config,
            storage,
            client,
            catalog,
            ids: TransferIds::new(),
            monitor: None,
        })
    }

    /// Share an id counter with other handlers.
    pub fn with_ids(mut self, ids: TransferIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn TransferMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &TpcConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn catalog(&self) -> &DigestCatalog {
        &self.catalog
    }

    pub fn ids(&self) -> &TransferIds {
        &self.ids
    }

    /// Answer one request.
    ///
    /// Every client-visible outcome, errors included, goes through `out`.
    /// `Err` means `out` itself failed.
    pub async fn handle<Ch: ClientChannel>(&self, req: &CopyRequest, out: &mut Ch) -> Result<()> {
        if req.method == Method::OPTIONS {
            return self.options(out).await;
        }
        if !req.is_copy() {
            return reply(out, 405, "Method not supported by the third-party copy handler").await;
        }

        let id = self.ids.next_id();
        let span = info_span!("tpc", id, resource = %req.resource, client = %req.security.client_id);
        self.dispatch(req, out).instrument(span).await
    }

    async fn options<Ch: ClientChannel>(&self, out: &mut Ch) -> Result<()> {
        let headers = [
            ("DAV", "1"),
            ("DAV", "<http://apache.org/dav/propset/fs/1>"),
            ("Allow", "HEAD,GET,PUT,PROPFIND,DELETE,OPTIONS,COPY"),
        ]
        .map(|(name, value)| (name.to_string(), value.to_string()));
        out.send_simple(200, &headers, "").await.map_err(TpcError::Client)
    }

    async fn dispatch<Ch: ClientChannel>(&self, req: &CopyRequest, out: &mut Ch) -> Result<()> {
        if req.header_str("Credential").is_some_and(|c| c != "none") {
            warn!(event = "INVALID_REQUEST", "unsupported Credential header");
            return reply(out, 400, "COPY requestd an unsupported Credential type").await;
        }

        match (req.header_str("Source"), req.header_str("Destination")) {
            (Some(src), None) => self.pull(req, &rewrite_davs(src), out).await,
            (None, Some(dst)) => self.push(req, &rewrite_davs(dst), out).await,
            (Some(_), Some(_)) => {
                warn!(event = "INVALID_REQUEST", "both Source and Destination given");
                reply(out, 400, "COPY request specified both Source and Destination").await
            }
            (None, None) => {
                warn!(event = "INVALID_REQUEST", "neither Source nor Destination given");
                reply(out, 400, "No Source or Destination specified").await
            }
        }
    }

    async fn pull<Ch: ClientChannel>(&self, req: &CopyRequest, src: &str, out: &mut Ch) -> Result<()> {
        let mut record = TransferLogRecord::new(req, Direction::Pull, src, self.monitor.clone());

        let Some(streams) = parse_streams(req.header_str("X-Number-Of-Streams"), self.config.max_streams) else {
            let message = client_error("Invalid request for number of streams", &record.local, &record.remote, None);
            record.status = Some(400);
            record.log(Level::ERROR, "INVALID_REQUEST", &message);
            return reply(out, 400, &message).await;
        };
        record.streams = streams;
        record.log(Level::INFO, "PULL_START", "");

        let (path, resource_opaque) = split_resource(&req.resource);
        let mut opaque = join_opaque(resource_opaque, &authz_opaque(req.header_str("Authorization")));
        if let Some(cks) = req.header_str("Repr-Digest").and_then(|h| self.checksum_opaque(h)) {
            opaque = join_opaque(&opaque, &cks);
        }

        let mut remote_headers = req.transfer_headers();
        if let Some(header) = req.header_str("Want-Repr-Digest").and_then(|h| self.want_digest_header(h)) {
            remote_headers.push(header);
        }

        let content_length = match self.probe_size(req, src, &remote_headers, &mut record).await {
            Ok(length) => length,
            Err(message) => {
                record.status = Some(500);
                return reply(out, 500, &message).await;
            }
        };

        let ranges = match req.header_str("Range") {
            None => None,
            Some(expr) => {
                match parse_byte_ranges(expr, self.config.max_chunk_size, content_length.map(|l| l as i64)) {
                    Ok(plan) => Some(plan.fetch_order()).filter(|order| !order.is_empty()),
                    Err(e) => {
                        let message = client_error(&e.message, &record.local, &record.remote, None);
                        record.status = Some(e.status);
                        record.log(Level::ERROR, "INVALID_REQUEST", &message);
                        return reply(out, e.status, &message).await;
                    }
                }
            }
        };

        let plan = match (ranges, content_length) {
            (Some(ranges), _) => PullPlan::Ranged(ranges),
            (None, Some(length)) if streams > 1 && length > 0 => calculate_segments(length, streams)
                .map(PullPlan::Segmented)
                .unwrap_or(PullPlan::Single),
            _ => PullPlan::Single,
        };
        if let (PullPlan::Single | PullPlan::Segmented(_), Some(length)) = (&plan, content_length) {
            opaque = join_opaque(&opaque, &format!("oss.asize={length}"));
        }
        record.streams = plan.streams();

        let exclusive = req.header_str("Overwrite") == Some("F");
        let mode = OpenMode::Create {
            truncate: !exclusive && !self.config.erasure_coded,
            exclusive,
        };
        let Some(file) = self.open_local(req, path, &opaque, mode, &mut record, out).await? else {
            return Ok(());
        };

        let state = TransferState::new(record.streams as usize);
        state.set_content_length(content_length);
        let file = self.start_response(file, &mut record, out).await?;

        let transfer = Transfer {
            client: &self.client,
            file: &file,
            url: src,
            headers: &remote_headers,
            pipe: pipe_config(&self.config, record.streams),
            state: &state,
        };
        let end = run_pull(&transfer, plan, &self.config, &record, out).await;
        finish(end, file, &state, &mut record, out).await
    }

    async fn push<Ch: ClientChannel>(&self, req: &CopyRequest, dst: &str, out: &mut Ch) -> Result<()> {
        let mut record = TransferLogRecord::new(req, Direction::Push, dst, self.monitor.clone());
        record.log(Level::INFO, "PUSH_START", "");

        let (path, resource_opaque) = split_resource(&req.resource);
        let opaque = join_opaque(resource_opaque, &authz_opaque(req.header_str("Authorization")));
        let Some(file) = self.open_local(req, path, &opaque, OpenMode::Read, &mut record, out).await? else {
            return Ok(());
        };

        let size = match file.size().await {
            Ok(size) => size,
            Err(e) => {
                let message = client_error(
                    &format!("Failed to determine size of local resource: {e}"),
                    &record.local,
                    &record.remote,
                    None,
                );
                record.status = Some(500);
                record.log(Level::ERROR, "OPEN_FAIL", &message);
                if let Err(e) = file.close().await {
                    warn!(error = %e, "failed to close local resource");
                }
                return reply(out, 500, &message).await;
            }
        };

        let state = TransferState::new(1);
        state.set_content_length(Some(size));
        let remote_headers = req.transfer_headers();
        let file = self.start_response(file, &mut record, out).await?;

        let transfer = Transfer {
            client: &self.client,
            file: &file,
            url: dst,
            headers: &remote_headers,
            pipe: pipe_config(&self.config, 1),
            state: &state,
        };
        let end = run_push(&transfer, size, &self.config, &record, out).await;
        finish(end, file, &state, &mut record, out).await
    }

    /// Open the local resource, retrying while the backend stalls.
    ///
    /// `None` means the client already got its answer: a redirect or an
    /// open failure.
    async fn open_local<Ch: ClientChannel>(
        &self,
        req: &CopyRequest,
        path: &str,
        opaque: &str,
        mode: OpenMode,
        record: &mut TransferLogRecord,
        out: &mut Ch,
    ) -> Result<Option<S::File>> {
        loop {
            let request = OpenRequest {
                path,
                opaque,
                mode,
                security: &req.security,
            };
            let delay = match self.storage.open(request).await {
                OpenOutcome::Opened(file) => return Ok(Some(file)),
                OpenOutcome::Redirect { host, port, opaque } => {
                    self.redirect(req, path, &host, port, &opaque, record, out).await?;
                    return Ok(None);
                }
                OpenOutcome::Failed(e) => {
                    let status = e.status();
                    let text = e.message.as_deref().unwrap_or("Failed to open local resource");
                    let message = client_error(text, &record.local, &record.remote, None);
                    record.status = Some(status);
                    record.log(Level::ERROR, "OPEN_FAIL", &message);
                    reply(out, status, &message).await?;
                    return Ok(None);
                }
                OpenOutcome::Stall { seconds } => seconds,
                OpenOutcome::Started { seconds } => seconds / 2 + 5,
            };
            let delay = delay.max(1);
            record.log(Level::INFO, "STALL", &format!("local open stalled, retrying in {delay} seconds"));
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn redirect<Ch: ClientChannel>(
        &self,
        req: &CopyRequest,
        path: &str,
        host: &str,
        port: u16,
        opaque: &str,
        record: &mut TransferLogRecord,
        out: &mut Ch,
    ) -> Result<()> {
        if host.is_empty() || port == 0 {
            let message = "Internal error: redirect without hostname";
            record.status = Some(500);
            record.log(Level::ERROR, "REDIRECT_INTERNAL_ERROR", message);
            return reply(out, 500, message).await;
        }

        let resource = req.header_str("X-Http-FullResource").unwrap_or(path);
        let location = redirect_location(self.config.dest_https, host, port, resource, opaque);
        record.status = Some(307);
        record.log(Level::INFO, "REDIRECT", &location);
        out.send_simple(307, &[("Location".to_string(), location)], "")
            .await
            .map_err(TpcError::Client)
    }

    /// `HEAD` the source. `Err` carries the message for the client.
    async fn probe_size(
        &self,
        req: &CopyRequest,
        src: &str,
        headers: &[(String, String)],
        record: &mut TransferLogRecord,
    ) -> std::result::Result<Option<u64>, String> {
        match self.client.head(src, headers, self.config.connect_timeout()).await {
            Err(e) => {
                let message = client_error(
                    "Remote server failed request while fetching remote size",
                    &record.local,
                    &record.remote,
                    Some(&e.to_string()),
                );
                record.log(Level::ERROR, "SIZE_FAIL", &message);
                Err(message)
            }
            Ok(head) if head.status >= 400 => {
                record.tpc_status = Some(head.status);
                let message = client_error(
                    &format!(
                        "Remote side {} failed with status code {} while fetching remote size",
                        req.client_host, head.status
                    ),
                    &record.local,
                    &record.remote,
                    None,
                );
                record.log(Level::ERROR, "SIZE_FAIL", &message);
                Err(message)
            }
            Ok(head) => {
                record.tpc_status = Some(head.status);
                let size = head.content_length.map_or_else(|| "unknown".to_string(), |l| l.to_string());
                record.log(Level::INFO, "SIZE_SUCCESS", &format!("remote size {size}"));
                Ok(head.content_length)
            }
        }
    }

    /// `cks.type=<name>&cks.value=<hex>` for the highest-priority configured
    /// digest present in a `Repr-Digest` header.
    fn checksum_opaque(&self, header: &str) -> Option<String> {
        let digests = parse_repr_digest(header);
        self.catalog.entries().iter().find_map(|descriptor| {
            let (name, value) = digests.iter().find(|(name, _)| descriptor.matches(name))?;
            match descriptor.storage_value(value) {
                Ok(hex) => Some(format!("cks.type={}&cks.value={hex}", descriptor.storage_name())),
                Err(e) => {
                    warn!(digest = %name, error = %e, "ignoring undecodable Repr-Digest value");
                    None
                }
            }
        })
    }

    /// `Want-Repr-Digest` to send to the source, chosen from the client's
    /// preferences and the configured catalog.
    fn want_digest_header(&self, header: &str) -> Option<(String, String)> {
        let requested = parse_want_repr_digest(header)
            .into_iter()
            .map(|p| p.name)
            .collect::<Vec<_>>()
            .join(",");
        let descriptor = self.catalog.select(&requested)?;
        Some(("Want-Repr-Digest".to_string(), format!("{}=10", descriptor.http_name())))
    }

    /// Open the chunked `201` response that carries markers and the result.
    async fn start_response<F: LocalFile, Ch: ClientChannel>(
        &self,
        file: F,
        record: &mut TransferLogRecord,
        out: &mut Ch,
    ) -> Result<F> {
        let headers = [("Content-Type".to_string(), "text/plain".to_string())];
        match out.start_chunked(201, "Created", &headers).await {
            Ok(()) => {
                record.log(Level::INFO, "RESPONSE_START", "");
                Ok(file)
            }
            Err(e) => {
                record.status = Some(500);
                record.log(Level::ERROR, "RESPONSE_START", &e.to_string());
                if let Err(close) = file.close().await {
                    warn!(error = %close, "failed to close local resource");
                }
                Err(TpcError::Client(e))
            }
        }
    }
}

/// `X-Number-Of-Streams`: absent means 1, 0 is read as 1, anything not in
/// `0..=max` is rejected.
fn parse_streams(header: Option<&str>, max: u32) -> Option<u32> {
    let Some(value) = header else {
        return Some(1);
    };
    let streams: u32 = value.trim().parse().ok()?;
    (streams <= max).then_some(streams.max(1))
}

async fn reply<Ch: ClientChannel>(out: &mut Ch, status: u16, body: &str) -> Result<()> {
    out.send_simple(status, &[], body).await.map_err(TpcError::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_streams() {
        assert_eq!(parse_streams(None, 100), Some(1));
        assert_eq!(parse_streams(Some("0"), 100), Some(1));
        assert_eq!(parse_streams(Some("4"), 100), Some(4));
        assert_eq!(parse_streams(Some("100"), 100), Some(100));
        assert_eq!(parse_streams(Some("101"), 100), None);
        assert_eq!(parse_streams(Some("-1"), 100), None);
        assert_eq!(parse_streams(Some("many"), 100), None);
    }

    #[test]
    fn test_transfer_ids_are_shared() {
        let ids = TransferIds::new();
        let other = ids.clone();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(other.next_id(), 2);
        assert_eq!(ids.current(), 2);
    }

    #[test]
    fn test_transfer_ids_across_threads() {
        let ids = TransferIds::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(ids.current(), 1000);
    }
}
