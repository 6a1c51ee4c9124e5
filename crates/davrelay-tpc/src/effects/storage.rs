use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::data::SecurityContext;

/// How the local resource is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Write target of a pull. Missing parent directories are created.
    Create {
        /// Discard existing content.
        truncate: bool,
        /// Fail when the resource already exists.
        exclusive: bool,
    },
    /// Source of a push.
    Read,
}

/// Everything the storage backend sees of an open.
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub path: &'a str,
    /// `&`-separated `name=value` pairs (`authz=`, `oss.asize=`, `cks.type=`).
    pub opaque: &'a str,
    pub mode: OpenMode,
    pub security: &'a SecurityContext,
}

/// Why an open failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenError {
    pub kind: io::ErrorKind,
    pub message: Option<String>,
}

impl OpenError {
    pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: Some(message.into()) }
    }

    /// Status reported to the client.
    pub fn status(&self) -> u16 {
        match self.kind {
            io::ErrorKind::PermissionDenied => 401,
            io::ErrorKind::AlreadyExists => 412,
            _ => 400,
        }
    }
}

impl From<io::Error> for OpenError {
    fn from(e: io::Error) -> Self {
        Self { kind: e.kind(), message: Some(e.to_string()) }
    }
}

/// Result of opening a local resource.
#[derive(Debug)]
pub enum OpenOutcome<F> {
    Opened(F),
    /// The data lives on another server; the client must go there.
    Redirect { host: String, port: u16, opaque: String },
    /// Not ready; retry after `seconds`.
    Stall { seconds: u64 },
    /// Staging has started; retry after a shorter delay derived from `seconds`.
    Started { seconds: u64 },
    Failed(OpenError),
}

/// Storage backend capability.
pub trait Storage: Send + Sync {
    type File: LocalFile;

    fn open(&self, req: OpenRequest<'_>) -> impl Future<Output = OpenOutcome<Self::File>> + Send;
}

/// An open local resource.
///
/// Positional I/O through `&self` lets the streams of a multi-stream pull
/// share one handle.
pub trait LocalFile: Send + Sync {
    fn write_at(&self, offset: u64, data: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Read up to `len` bytes at `offset`; shorter only at end of file.
    fn read_at(&self, offset: u64, len: usize) -> impl Future<Output = io::Result<Bytes>> + Send;

    fn size(&self) -> impl Future<Output = io::Result<u64>> + Send;

    /// Flush and release the handle.
    fn close(self) -> impl Future<Output = io::Result<()>> + Send
    where
        Self: Sized;
}

/// Storage on the local filesystem below a root directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a resource path below the root, refusing `..`.
    fn resolve(&self, path: &str) -> Result<PathBuf, OpenError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(OpenError::new(io::ErrorKind::PermissionDenied, format!("path escapes storage root: {path}")));
        }
        Ok(self.root.join(relative))
    }

    async fn open_path(&self, req: OpenRequest<'_>) -> Result<FsFile, OpenError> {
        let path = self.resolve(req.path)?;
        let mut options = OpenOptions::new();
        match req.mode {
            OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Create { truncate, exclusive } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                options.write(true).read(true);
                if exclusive {
                    options.create_new(true);
                } else {
                    options.create(true).truncate(truncate);
                }
            }
        }
        let file = options.open(&path).await?;
        Ok(FsFile { file: Mutex::new(file) })
    }
}

impl Storage for FsStorage {
    type File = FsFile;

    async fn open(&self, req: OpenRequest<'_>) -> OpenOutcome<FsFile> {
        debug!(path = req.path, opaque = req.opaque, mode = ?req.mode, client = %req.security.client_id, "opening local resource");
        match self.open_path(req).await {
            Ok(file) => OpenOutcome::Opened(file),
            Err(e) => OpenOutcome::Failed(e),
        }
    }
}

/// A file opened by [`FsStorage`].
#[derive(Debug)]
pub struct FsFile {
    file: Mutex<File>,
}

impl LocalFile for FsFile {
    async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len);
        (&mut *file).take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn size(&self) -> io::Result<u64> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }

    async fn close(self) -> io::Result<()> {
        let mut file = self.file.into_inner();
        file.flush().await?;
        file.sync_all().await
    }
}
