use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Connection lifecycle hooks the HTTP client reports into.
///
/// Implemented by the per-stream progress of a transfer so that perf markers
/// can list the remote peers currently connected.
pub trait ConnectionObserver: Send + Sync {
    fn on_connect(&self, peer: SocketAddr);
    fn on_close(&self);
}

/// Answer to a `HEAD` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteHead {
    pub status: u16,
    pub content_length: Option<u64>,
}

/// Status and streaming body of a remote response.
pub struct RemoteResponse<E> {
    pub status: u16,
    pub body: BoxStream<'static, std::result::Result<Bytes, E>>,
}

impl<E> std::fmt::Debug for RemoteResponse<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResponse").field("status", &self.status).finish_non_exhaustive()
    }
}

/// HTTP capability used to reach the remote side of a third-party copy.
///
/// Implementations follow redirects and apply their own TLS configuration.
/// HTTP error statuses are not errors here: they are returned in the
/// response so the transfer can report them to the client.
///
/// # Implementations
///
/// - [`ReqwestClient`]: Production implementation using `reqwest`
/// - In-memory fakes for testing
pub trait RemoteClient: Send + Sync {
    /// Transport failure (DNS, connect, TLS, reset).
    type Error: std::error::Error + Send + Sync + 'static;

    /// `HEAD` the source of a pull to learn its size.
    fn head(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<RemoteHead, Self::Error>> + Send;

    /// `GET` a resource, or part of it when `headers` carry a `Range`.
    ///
    /// Calls `observer.on_connect` with the peer address once connected.
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        observer: &dyn ConnectionObserver,
    ) -> impl Future<Output = std::result::Result<RemoteResponse<Self::Error>, Self::Error>> + Send;

    /// `PUT` the streamed `body` to a push destination.
    fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: PushBody,
        observer: &dyn ConnectionObserver,
    ) -> impl Future<Output = std::result::Result<RemoteResponse<Self::Error>, Self::Error>> + Send;
}

/// Request body of a push, fed block by block from the local file.
///
/// The sending half is bounded, so reading the local file pauses while the
/// network is behind. Bytes are counted as the HTTP client pulls them out
/// of the body, not when they are queued.
#[derive(Debug)]
pub struct PushBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    len: u64,
    sent: Arc<AtomicU64>,
}

impl PushBody {
    /// A body of `len` bytes buffering at most `depth` blocks.
    pub fn channel(depth: usize, len: u64) -> (mpsc::Sender<io::Result<Bytes>>, Self) {
        Self::counted(depth, len, Arc::default())
    }

    /// Like [`channel`](Self::channel), adding every block handed to the
    /// client to `sent`.
    pub fn counted(depth: usize, len: u64, sent: Arc<AtomicU64>) -> (mpsc::Sender<io::Result<Bytes>>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (tx, Self { rx, len, sent })
    }

    /// Announced `Content-Length`.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes taken from the body so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Stream for PushBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(Ok(block))) = &item {
            this.sent.fetch_add(block.len() as u64, Ordering::Relaxed);
        }
        item
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::path::Path;

    use futures_util::StreamExt;
    use reqwest::header::CONTENT_LENGTH;
    use tracing::{debug, warn};

    use super::*;
    use crate::data::TpcConfig;
    use crate::error::{Result, TpcError};

    /// Production remote client using reqwest.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Build a client trusting the configured CA file and directory in
        /// addition to the system roots.
        pub fn new(config: &TpcConfig) -> Result<Self> {
            let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());

            if let Some(file) = &config.ca_file {
                builder = builder.add_root_certificate(load_certificate(file)?);
            }
            if let Some(dir) = &config.ca_dir {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if !is_certificate(&path) {
                        continue;
                    }
                    match load_certificate(&path) {
                        Ok(cert) => builder = builder.add_root_certificate(cert),
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable CA certificate"),
                    }
                }
            }

            let client = builder.build().map_err(|e| TpcError::Network(e.to_string()))?;
            Ok(Self { client })
        }

        /// Wrap an already configured reqwest client.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn is_certificate(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("pem" | "crt" | "0")
        )
    }

    fn load_certificate(path: &Path) -> Result<reqwest::Certificate> {
        let pem = std::fs::read(path)?;
        reqwest::Certificate::from_pem(&pem).map_err(|e| TpcError::Network(format!("{}: {e}", path.display())))
    }

    fn with_headers(mut request: reqwest::RequestBuilder, headers: &[(String, String)]) -> reqwest::RequestBuilder {
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request
    }

    fn into_remote(response: reqwest::Response, observer: &dyn ConnectionObserver) -> RemoteResponse<reqwest::Error> {
        if let Some(peer) = response.remote_addr() {
            observer.on_connect(peer);
        }
        let status = response.status().as_u16();
        debug!(status, url = %response.url(), "remote responded");
        RemoteResponse {
            status,
            body: Box::pin(response.bytes_stream().map(|chunk| chunk.map(Bytes::from))),
        }
    }

    impl RemoteClient for ReqwestClient {
        type Error = reqwest::Error;

        async fn head(
            &self,
            url: &str,
            headers: &[(String, String)],
            timeout: Duration,
        ) -> std::result::Result<RemoteHead, Self::Error> {
            let response = with_headers(self.client.head(url), headers)
                .timeout(timeout)
                .send()
                .await?;
            let content_length = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());

            Ok(RemoteHead {
                status: response.status().as_u16(),
                content_length,
            })
        }

        async fn get(
            &self,
            url: &str,
            headers: &[(String, String)],
            observer: &dyn ConnectionObserver,
        ) -> std::result::Result<RemoteResponse<Self::Error>, Self::Error> {
            let response = with_headers(self.client.get(url), headers).send().await?;
            Ok(into_remote(response, observer))
        }

        async fn put(
            &self,
            url: &str,
            headers: &[(String, String)],
            body: PushBody,
            observer: &dyn ConnectionObserver,
        ) -> std::result::Result<RemoteResponse<Self::Error>, Self::Error> {
            let response = with_headers(self.client.put(url), headers)
                .header(CONTENT_LENGTH, body.len())
                .body(reqwest::Body::wrap_stream(body))
                .send()
                .await?;
            Ok(into_remote(response, observer))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
