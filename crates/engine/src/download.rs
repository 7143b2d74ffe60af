//! Streaming download of a full-resolution photo to disk

use crate::config::EngineConfig;
use crate::error::{FetchError, TaskError};
use crate::event::{TaskEvent, TaskId};
use crate::http::{ChunkStream, Fetcher};
use crate::scheduler::Emitter;
use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Extensions accepted from the `fm` format hint
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif", "gif", "tiff"];
const DEFAULT_EXTENSION: &str = "jpg";

/// Where to fetch from and which directory to write into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub destination_dir: PathBuf,
}

impl DownloadRequest {
    pub fn new(source_url: impl Into<String>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination_dir: destination_dir.into(),
        }
    }
}

/// Derives a file name from the last URL path segment
///
/// Falls back to a random UUID when the URL has no usable name, and appends
/// an image extension when the name has none.
pub fn file_name_for(source_url: &str) -> String {
    let url = Url::parse(source_url).ok();

    let name = url
        .as_ref()
        .and_then(|u| u.path_segments())
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .and_then(|segment| urlencoding::decode(segment).ok())
        .map(|decoded| decoded.trim().to_string())
        .filter(|name| is_safe_name(name))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if Path::new(&name).extension().is_some() {
        return name;
    }

    // unsplash serves extensionless paths and names the format in `fm`
    let extension = url
        .as_ref()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "fm"))
        .map(|(_, v)| v.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{name}.{extension}")
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Byte accounting for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    downloaded: u64,
    total: Option<u64>,
}

impl Transfer {
    /// Starts a transfer of `total` bytes, if known
    pub fn new(total: Option<u64>) -> Self {
        Self {
            downloaded: 0,
            total,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.downloaded += bytes as u64;
    }

    /// Returns the number of bytes downloaded so far
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Returns the total size in bytes, if known
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Whole percent complete, or `None` when the total is unknown or zero
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(total) if total > 0 => {
                let percent = (self.downloaded as u128 * 100) / total as u128;
                Some(percent.min(100) as u8)
            }
            _ => None,
        }
    }
}

/// Paths currently being written, keyed to the task writing them
pub(crate) type InFlight = DashMap<PathBuf, TaskId>;

/// Exclusive claim on a destination path, released on drop
struct PathClaim {
    in_flight: Arc<InFlight>,
    path: PathBuf,
}

impl PathClaim {
    fn acquire(in_flight: &Arc<InFlight>, path: &Path, id: TaskId) -> Option<Self> {
        match in_flight.entry(path.to_path_buf()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(id);
                Some(Self {
                    in_flight: Arc::clone(in_flight),
                    path: path.to_path_buf(),
                })
            }
        }
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.path);
    }
}

pub(crate) struct DownloadTask {
    request: DownloadRequest,
    fetcher: Arc<dyn Fetcher>,
    config: Arc<EngineConfig>,
    in_flight: Arc<InFlight>,
}

impl DownloadTask {
    pub(crate) fn new(
        request: DownloadRequest,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<EngineConfig>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            request,
            fetcher,
            config,
            in_flight,
        }
    }

    /// Runs the download and emits exactly one terminal event
    pub(crate) async fn run(self, emitter: Emitter) -> Result<PathBuf, TaskError> {
        let handle = emitter.handle();
        let result = self.download(&emitter).await;

        match &result {
            Ok(path) => {
                info!(task = %handle, path = %path.display(), "download completed");
                emitter.emit(TaskEvent::DownloadCompleted {
                    handle,
                    path: path.clone(),
                });
            }
            Err(e) => {
                warn!(task = %handle, url = %self.request.source_url, error = %e, "download failed");
                emitter.emit(TaskEvent::DownloadFailed {
                    handle,
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    async fn download(&self, emitter: &Emitter) -> Result<PathBuf, TaskError> {
        // claims are keyed on the resolved path so every spelling of a directory collides
        let dir = &self.request.destination_dir;
        let path = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| TaskError::filesystem(dir, e))?
            .join(file_name_for(&self.request.source_url));
        let _claim = PathClaim::acquire(&self.in_flight, &path, emitter.handle().id())
            .ok_or_else(|| TaskError::AlreadyDownloading(path.clone()))?;

        let ChunkStream { total, mut chunks } =
            self.fetcher.fetch_stream(&self.request.source_url).await?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| TaskError::filesystem(&path, e))?;

        debug!(task = %emitter.handle(), path = %path.display(), ?total, "streaming to file");

        let mut transfer = Transfer::new(total);
        let streamed = self
            .stream_to_file(&mut chunks, &mut file, &path, &mut transfer, emitter)
            .await;

        // whatever arrived stays on disk, even when the stream broke
        let flushed = file
            .flush()
            .await
            .map_err(|e| TaskError::filesystem(&path, e));
        streamed.and(flushed)?;

        Ok(path)
    }

    /// Writes the body in fixed-size chunks regardless of how the network framed it
    async fn stream_to_file(
        &self,
        chunks: &mut BoxStream<'static, Result<Bytes, FetchError>>,
        file: &mut File,
        path: &Path,
        transfer: &mut Transfer,
        emitter: &Emitter,
    ) -> Result<(), TaskError> {
        let chunk_size = self.config.chunk_size;
        let read_timeout = self.config.read_timeout();
        let mut buffer = BytesMut::with_capacity(chunk_size);

        loop {
            let next = match tokio::time::timeout(read_timeout, chunks.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(FetchError::Timeout(read_timeout))),
            };

            match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while buffer.len() >= chunk_size {
                        let chunk = buffer.split_to(chunk_size);
                        write_chunk(file, path, &chunk, transfer, emitter).await?;
                    }
                }
                Some(Err(e)) => {
                    if !buffer.is_empty() {
                        write_chunk(file, path, &buffer, transfer, emitter).await?;
                    }
                    return Err(e.into());
                }
                None => break,
            }
        }

        if !buffer.is_empty() {
            write_chunk(file, path, &buffer, transfer, emitter).await?;
        }

        Ok(())
    }
}

async fn write_chunk(
    file: &mut File,
    path: &Path,
    chunk: &[u8],
    transfer: &mut Transfer,
    emitter: &Emitter,
) -> Result<(), TaskError> {
    file.write_all(chunk)
        .await
        .map_err(|e| TaskError::filesystem(path, e))?;

    transfer.record(chunk.len());
    emitter.emit(TaskEvent::DownloadProgress {
        handle: emitter.handle(),
        percent: transfer.percent(),
        downloaded: transfer.downloaded(),
    });

    Ok(())
}
