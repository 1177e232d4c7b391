//! Serving a segment set as one contiguous download.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use super::playlist::MediaIndex;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedFile {
    path: PathBuf,
    len: u64,
}

/// The files behind a download, with the exact byte count already known.
#[derive(Debug, Clone)]
pub struct ConcatPlan {
    files: Vec<PlannedFile>,
    total_len: u64,
}

impl ConcatPlan {
    /// Stat the init segment and every listed segment under `dir`.
    ///
    /// Any missing file fails the plan: the content length is declared
    /// before the first byte is sent, so nothing may be skipped.
    pub async fn build(dir: &Path, index: &MediaIndex) -> Result<Self> {
        let names = index
            .init
            .iter()
            .map(String::as_str)
            .chain(index.segments.iter().map(|s| s.uri.as_str()));

        let mut files = Vec::new();
        let mut total_len = 0u64;
        for name in names {
            let path = dir.join(name);
            let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::not_found("Segment", path.display()),
                _ => Error::Io(e),
            })?;
            total_len += meta.len();
            files.push(PlannedFile {
                path,
                len: meta.len(),
            });
        }

        Ok(Self { files, total_len })
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Stream the files back to back, each capped at its planned length.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(self.files)
            .then(|file| async move {
                let handle = tokio::fs::File::open(&file.path).await?;
                Ok::<_, io::Error>(ReaderStream::new(handle.take(file.len)))
            })
            .flat_map(|opened| match opened {
                Ok(reader) => reader.left_stream(),
                Err(e) => stream::once(async move { Err(e) }).right_stream(),
            })
    }
}
