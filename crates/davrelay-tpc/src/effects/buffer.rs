//! Bounded pipes between the remote HTTP body and the local file.
//!
//! A pull stream re-chunks the network body into fixed blocks and hands
//! each block to the writer through a channel holding at most
//! `depth` blocks; when storage falls behind the network read pauses.
//! A push runs the other way, reading local blocks into a [`PushBody`].

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::http::{BoxStream, PushBody};
use super::state::StreamProgress;
use super::storage::LocalFile;

/// Longest remote error body kept for the client message.
pub const MAX_ERROR_BODY: usize = 1024;

/// Why a pipe stopped early.
#[derive(Debug)]
pub enum PipeError {
    /// The remote body failed mid-stream.
    Remote(String),
    /// Writing to local storage failed.
    Local(io::Error),
}

/// Block sizing for one stream.
#[derive(Debug, Clone, Copy)]
pub struct PipeConfig {
    pub block_size: usize,
    pub depth: usize,
}

/// Copy a remote body into `file` starting at `offset`.
///
/// Returns the number of bytes written. Progress counts bytes once they are
/// on local storage.
pub async fn pull_into<F, E>(
    body: BoxStream<'static, Result<Bytes, E>>,
    file: &F,
    offset: u64,
    pipe: PipeConfig,
    progress: &StreamProgress,
) -> Result<u64, PipeError>
where
    F: LocalFile,
    E: std::fmt::Display,
{
    let (tx, rx) = mpsc::channel::<Bytes>(pipe.depth.max(1));
    let (read, written) = tokio::join!(
        read_blocks(body, pipe.block_size.max(1), tx),
        write_blocks(file, offset, rx, progress)
    );
    read.and(written)
}

async fn read_blocks<E: std::fmt::Display>(
    mut body: BoxStream<'static, Result<Bytes, E>>,
    block_size: usize,
    tx: mpsc::Sender<Bytes>,
) -> Result<(), PipeError> {
    let mut block = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(|e| PipeError::Remote(e.to_string()))?;
        while !chunk.is_empty() {
            let take = (block_size - block.len()).min(chunk.len());
            block.extend_from_slice(&chunk.split_to(take));
            if block.len() == block_size && tx.send(block.split().freeze()).await.is_err() {
                // writer stopped and reports why
                return Ok(());
            }
        }
    }
    if !block.is_empty() {
        let _ = tx.send(block.freeze()).await;
    }
    Ok(())
}

async fn write_blocks<F: LocalFile>(
    file: &F,
    offset: u64,
    mut rx: mpsc::Receiver<Bytes>,
    progress: &StreamProgress,
) -> Result<u64, PipeError> {
    let mut written = 0u64;
    while let Some(block) = rx.recv().await {
        let len = block.len() as u64;
        file.write_at(offset + written, block).await.map_err(PipeError::Local)?;
        written += len;
        progress.add(len);
    }
    Ok(written)
}

/// Read `len` bytes of `file` into the push body channel.
///
/// A local read error is also sent down the channel so the upload fails
/// rather than completing short. The remote side hanging up ends the
/// producer quietly. Progress is counted by the [`PushBody`] as the HTTP
/// client consumes it.
pub async fn push_from<F: LocalFile>(
    file: &F,
    len: u64,
    pipe: PipeConfig,
    tx: mpsc::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    let block_size = pipe.block_size.max(1) as u64;
    let mut offset = 0;
    while offset < len {
        let want = (len - offset).min(block_size) as usize;
        let block = match file.read_at(offset, want).await {
            Ok(block) if block.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("local file ended after {offset} of {len} bytes"),
            )),
            other => other,
        };
        let block = match block {
            Ok(block) => block,
            Err(e) => {
                let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                return Err(e);
            }
        };
        let size = block.len() as u64;
        if tx.send(Ok(block)).await.is_err() {
            return Ok(());
        }
        offset += size;
    }
    Ok(())
}

/// New push body plus its feeding half, sized for `pipe` and counting into
/// `progress`.
pub fn push_channel(
    pipe: PipeConfig,
    len: u64,
    progress: &StreamProgress,
) -> (mpsc::Sender<io::Result<Bytes>>, PushBody) {
    PushBody::counted(pipe.depth, len, progress.byte_counter())
}

/// Collect at most [`MAX_ERROR_BODY`] bytes of an error response.
pub async fn read_error_body<E>(mut body: BoxStream<'static, Result<Bytes, E>>) -> String {
    let mut kept = Vec::new();
    while kept.len() < MAX_ERROR_BODY {
        match body.next().await {
            Some(Ok(chunk)) => {
                let room = MAX_ERROR_BODY - kept.len();
                kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            _ => break,
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}
