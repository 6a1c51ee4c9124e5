#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use davrelay_tpc::{
    BoxStream, ChannelResponder, ConnectionObserver, CopyRequest, LocalFile, OpenError, OpenMode, OpenOutcome,
    OpenRequest, PushBody, RemoteClient, RemoteHead, RemoteResponse, ResponseEvent, Storage, TpcConfig, TpcHandler,
};
use futures_util::{StreamExt, stream};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub String);

/// How the fake remote serves a GET body or reads a PUT body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Complete,
    /// Never moves a byte.
    Silent,
    /// Moves the first chunk, then goes silent.
    StallAfterFirst,
}

/// Scriptable in-memory remote peer.
pub struct FakeRemote {
    pub data: Bytes,
    pub head_status: u16,
    pub head_fails: bool,
    pub head_length: bool,
    pub get_status: u16,
    pub error_body: &'static str,
    pub body_mode: BodyMode,
    pub ignore_range: bool,
    pub put_status: u16,
    pub upload_mode: BodyMode,
    pub chunk: usize,
    pub peer: &'static str,
    pub gets: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub puts: Mutex<Vec<(String, Vec<(String, String)>, u64)>>,
    pub uploaded: Mutex<Vec<u8>>,
}

impl FakeRemote {
    pub fn serving(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            head_status: 200,
            head_fails: false,
            head_length: true,
            get_status: 200,
            error_body: "",
            body_mode: BodyMode::Complete,
            ignore_range: false,
            put_status: 201,
            upload_mode: BodyMode::Complete,
            chunk: 3,
            peer: "127.0.0.1:8443",
            gets: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn get_headers(&self) -> Vec<Vec<(String, String)>> {
        self.gets.lock().unwrap().iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn ranges(&self) -> Vec<String> {
        self.get_headers()
            .into_iter()
            .filter_map(|headers| headers.into_iter().find(|(k, _)| k == "Range").map(|(_, v)| v))
            .collect()
    }

    fn slice(&self, range: Option<&str>) -> (u16, Bytes) {
        let Some(spec) = range.and_then(|r| r.strip_prefix("bytes=")).filter(|_| !self.ignore_range) else {
            return (200, self.data.clone());
        };
        let (start, end) = spec.split_once('-').unwrap();
        let len = self.data.len();
        let start: usize = start.parse().unwrap();
        let end: usize = if end.is_empty() { len - 1 } else { end.parse::<usize>().unwrap().min(len - 1) };
        (206, self.data.slice(start..=end))
    }

    fn chunks(&self, data: Bytes) -> Vec<Result<Bytes, FakeError>> {
        data.chunks(self.chunk.max(1)).map(|c| Ok(Bytes::copy_from_slice(c))).collect()
    }
}

impl RemoteClient for FakeRemote {
    type Error = FakeError;

    async fn head(&self, _url: &str, _headers: &[(String, String)], _timeout: Duration) -> Result<RemoteHead, FakeError> {
        if self.head_fails {
            return Err(FakeError("could not resolve host".into()));
        }
        Ok(RemoteHead {
            status: self.head_status,
            content_length: self.head_length.then_some(self.data.len() as u64),
        })
    }

    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        observer: &dyn ConnectionObserver,
    ) -> Result<RemoteResponse<FakeError>, FakeError> {
        self.gets.lock().unwrap().push((url.to_string(), headers.to_vec()));
        observer.on_connect(self.peer.parse().unwrap());

        if self.get_status >= 400 {
            let body = Bytes::from_static(self.error_body.as_bytes());
            return Ok(RemoteResponse {
                status: self.get_status,
                body: Box::pin(stream::iter(vec![Ok(body)])),
            });
        }

        let range = headers.iter().find(|(k, _)| k == "Range").map(|(_, v)| v.as_str());
        let (status, data) = self.slice(range);
        let chunks = self.chunks(data);
        let body: BoxStream<'static, Result<Bytes, FakeError>> = match self.body_mode {
            BodyMode::Complete => Box::pin(stream::iter(chunks)),
            BodyMode::Silent => Box::pin(stream::pending()),
            BodyMode::StallAfterFirst => {
                Box::pin(stream::iter(chunks.into_iter().take(1)).chain(stream::pending()))
            }
        };
        Ok(RemoteResponse { status, body })
    }

    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        mut body: PushBody,
        observer: &dyn ConnectionObserver,
    ) -> Result<RemoteResponse<FakeError>, FakeError> {
        observer.on_connect(self.peer.parse().unwrap());
        self.puts.lock().unwrap().push((url.to_string(), headers.to_vec(), body.len()));
        if self.upload_mode == BodyMode::Silent {
            std::future::pending::<()>().await;
        }
        while let Some(block) = body.next().await {
            let block = block.map_err(|e| FakeError(e.to_string()))?;
            self.uploaded.lock().unwrap().extend_from_slice(&block);
            if self.upload_mode == BodyMode::StallAfterFirst {
                std::future::pending::<()>().await;
            }
        }
        Ok(RemoteResponse {
            status: self.put_status,
            body: Box::pin(stream::iter(vec![Ok(Bytes::from_static(self.error_body.as_bytes()))])),
        })
    }
}

/// Scripted open results handed out before the real open.
#[derive(Debug, Clone)]
pub enum Script {
    Stall(u64),
    Started(u64),
    Redirect { host: &'static str, port: u16, opaque: &'static str },
    Fail(io::ErrorKind, Option<&'static str>),
}

#[derive(Debug, Clone)]
pub struct OpenCall {
    pub path: String,
    pub opaque: String,
    pub mode: OpenMode,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemStorage {
    pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub script: Mutex<VecDeque<Script>>,
    pub opens: Mutex<Vec<OpenCall>>,
    pub closes: Arc<Mutex<u32>>,
}

impl MemStorage {
    pub fn with_file(path: &str, data: &[u8]) -> Self {
        let storage = Self::default();
        storage.files.lock().unwrap().insert(path.to_string(), data.to_vec());
        storage
    }

    pub fn script(self, steps: impl IntoIterator<Item = Script>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn last_open(&self) -> Option<OpenCall> {
        self.opens.lock().unwrap().last().cloned()
    }

    pub fn close_count(&self) -> u32 {
        *self.closes.lock().unwrap()
    }
}

pub struct MemFile {
    path: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    closes: Arc<Mutex<u32>>,
}

impl Storage for MemStorage {
    type File = MemFile;

    async fn open(&self, req: OpenRequest<'_>) -> OpenOutcome<MemFile> {
        self.opens.lock().unwrap().push(OpenCall {
            path: req.path.to_string(),
            opaque: req.opaque.to_string(),
            mode: req.mode,
        });

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Script::Stall(seconds)) => return OpenOutcome::Stall { seconds },
            Some(Script::Started(seconds)) => return OpenOutcome::Started { seconds },
            Some(Script::Redirect { host, port, opaque }) => {
                return OpenOutcome::Redirect {
                    host: host.to_string(),
                    port,
                    opaque: opaque.to_string(),
                };
            }
            Some(Script::Fail(kind, message)) => {
                return OpenOutcome::Failed(OpenError {
                    kind,
                    message: message.map(str::to_string),
                });
            }
            None => {}
        }

        let mut files = self.files.lock().unwrap();
        match req.mode {
            OpenMode::Read if !files.contains_key(req.path) => {
                return OpenOutcome::Failed(OpenError::new(io::ErrorKind::NotFound, "no such file"));
            }
            OpenMode::Create { exclusive: true, .. } if files.contains_key(req.path) => {
                return OpenOutcome::Failed(OpenError::new(io::ErrorKind::AlreadyExists, "file exists"));
            }
            OpenMode::Create { truncate, .. } => {
                let entry = files.entry(req.path.to_string()).or_default();
                if truncate {
                    entry.clear();
                }
            }
            OpenMode::Read => {}
        }

        OpenOutcome::Opened(MemFile {
            path: req.path.to_string(),
            files: self.files.clone(),
            closes: self.closes.clone(),
        })
    }
}

impl LocalFile for MemFile {
    async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let buf = files.entry(self.path.clone()).or_default();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(&data);
        Ok(())
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let files = self.files.lock().unwrap();
        let buf = files.get(&self.path).map(Vec::as_slice).unwrap_or_default();
        let start = (offset as usize).min(buf.len());
        let end = (start + len).min(buf.len());
        Ok(Bytes::copy_from_slice(&buf[start..end]))
    }

    async fn size(&self) -> io::Result<u64> {
        let files = self.files.lock().unwrap();
        Ok(files.get(&self.path).map_or(0, |b| b.len() as u64))
    }

    async fn close(self) -> io::Result<()> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Small blocks so short test payloads cross block boundaries.
pub fn test_config() -> TpcConfig {
    TpcConfig {
        block_size: 8,
        small_block_size: 4,
        ..TpcConfig::default()
    }
}

/// Run one request and collect everything sent to the client.
pub async fn run<S, C>(handler: &TpcHandler<S, C>, req: CopyRequest) -> (davrelay_tpc::Result<()>, Vec<ResponseEvent>)
where
    S: Storage,
    C: RemoteClient,
{
    let (mut responder, mut rx) = ChannelResponder::new(1024);
    let result = handler.handle(&req, &mut responder).await;
    drop(responder);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

pub fn chunks(events: &[ResponseEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ResponseEvent::Chunk(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn markers(events: &[ResponseEvent]) -> Vec<String> {
    chunks(events).into_iter().filter(|c| c.starts_with("Perf Marker\n")).collect()
}

/// The summary chunk; the last chunk is the empty terminator.
pub fn final_message(events: &[ResponseEvent]) -> String {
    let chunks = chunks(events);
    assert_eq!(chunks.last().map(String::as_str), Some(""), "response not terminated");
    chunks[chunks.len() - 2].clone()
}

pub fn simple(events: &[ResponseEvent]) -> (u16, Vec<(String, String)>, String) {
    match events {
        [ResponseEvent::Simple { status, headers, body }] => (*status, headers.clone(), body.clone()),
        other => panic!("expected a single simple response, got {other:?}"),
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
