use std::future::Future;
use std::io;

use tokio::sync::mpsc;

/// Response stream back to the client that issued the COPY.
///
/// Owned by exactly one transfer; nothing else writes to it.
pub trait ClientChannel: Send {
    /// A complete, non-streamed response.
    fn send_simple(
        &mut self,
        status: u16,
        headers: &[(String, String)],
        body: &str,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Status line and headers of a chunked response.
    fn start_chunked(
        &mut self,
        status: u16,
        reason: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// One chunk of a chunked response; an empty chunk ends it.
    fn send_chunk(&mut self, chunk: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// What a [`ChannelResponder`] forwards to the HTTP front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Simple {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    Start {
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
    },
    Chunk(String),
}

/// [`ClientChannel`] forwarding every write over a bounded channel.
///
/// The receiving side belongs to the server connection; when it is dropped,
/// writes fail with `BrokenPipe`.
#[derive(Debug, Clone)]
pub struct ChannelResponder {
    tx: mpsc::Sender<ResponseEvent>,
}

impl ChannelResponder {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ResponseEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn forward(&self, event: ResponseEvent) -> io::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed"))
    }
}

impl ClientChannel for ChannelResponder {
    async fn send_simple(&mut self, status: u16, headers: &[(String, String)], body: &str) -> io::Result<()> {
        self.forward(ResponseEvent::Simple {
            status,
            headers: headers.to_vec(),
            body: body.to_string(),
        })
        .await
    }

    async fn start_chunked(&mut self, status: u16, reason: &str, headers: &[(String, String)]) -> io::Result<()> {
        self.forward(ResponseEvent::Start {
            status,
            reason: reason.to_string(),
            headers: headers.to_vec(),
        })
        .await
    }

    async fn send_chunk(&mut self, chunk: &str) -> io::Result<()> {
        self.forward(ResponseEvent::Chunk(chunk.to_string())).await
    }
}
