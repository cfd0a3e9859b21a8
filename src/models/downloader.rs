use super::types::{DownloadEvent, DownloadJob};
use crate::error::DownloadError;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bytes written to disk between two cancellation checks.
pub const CHUNK_SIZE: usize = 8 * 1024;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared between a download task and the
/// code that wants to stop it.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Receiving end of one running download.
pub struct DownloadHandle {
    job: DownloadJob,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    cancel: CancelFlag,
}

impl DownloadHandle {
    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event from the worker, `None` once the terminal event was consumed.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        let event = self.events.recv().await;
        if let Some(event) = &event {
            self.job.apply(event);
        }
        event
    }

    /// Wait for the terminal event, discarding progress.
    pub async fn finish(mut self) -> Result<PathBuf, DownloadError> {
        while let Some(event) = self.next_event().await {
            match event {
                DownloadEvent::Progress(_) => {}
                DownloadEvent::Done(path) => return Ok(path),
                DownloadEvent::Failed(e) => return Err(e),
            }
        }
        Err(DownloadError::Network {
            url: self.job.url.clone(),
            message: "download task ended without a result".to_string(),
        })
    }
}

#[derive(Clone)]
pub struct ModelDownloader {
    client: Client,
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Spawn the job on a background task and return immediately.
    ///
    /// The job's destination only appears once every byte has been written
    /// (and the checksum matched, when one is given). Any failure, including
    /// cancellation, leaves nothing behind at the destination.
    pub fn start(&self, job: DownloadJob, checksum: Option<String>, cancel: CancelFlag) -> DownloadHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = job.url.clone();
        let destination = job.destination.clone();
        let description = job.description.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let part_path = part_path_for(&destination);
            info!("Downloading {} from {}", description, url);

            let result = fetch(
                &client,
                &url,
                &destination,
                &part_path,
                checksum.as_deref(),
                &task_cancel,
                &tx,
            )
            .await;

            let event = match result {
                Ok(()) => {
                    info!("Downloaded {} to {:?}", description, destination);
                    DownloadEvent::Done(destination)
                }
                Err(e) => {
                    remove_if_present(&part_path).await;
                    remove_if_present(&destination).await;
                    warn!("Download of {} failed: {}", description, e);
                    DownloadEvent::Failed(e)
                }
            };
            let _ = tx.send(event);
        });

        DownloadHandle {
            job,
            events,
            cancel,
        }
    }
}

async fn fetch(
    client: &Client,
    url: &str,
    destination: &Path,
    part_path: &Path,
    checksum: Option<&str>,
    cancel: &CancelFlag,
    tx: &mpsc::UnboundedSender<DownloadEvent>,
) -> Result<(), DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    // Ensure parent directory exists
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let request = client.get(url).send();
    tokio::pin!(request);
    let response = loop {
        match tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut request).await {
            Ok(result) => break result.map_err(|e| network_error(url, e))?,
            Err(_) if cancel.is_cancelled() => return Err(DownloadError::Cancelled),
            Err(_) => continue,
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let total_size = response.content_length().filter(|n| *n > 0);
    let mut file = File::create(part_path)
        .await
        .map_err(|e| io_error(part_path, e))?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut last_progress = None;

    if total_size.is_some() {
        last_progress = Some(0);
        let _ = tx.send(DownloadEvent::Progress(0));
    }

    let mut stream = response.bytes_stream();
    loop {
        // A stalled connection must still notice cancellation.
        let next = match tokio::time::timeout(CANCEL_POLL_INTERVAL, stream.next()).await {
            Ok(next) => next,
            Err(_) if cancel.is_cancelled() => return Err(DownloadError::Cancelled),
            Err(_) => continue,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| network_error(url, e))?;

        for piece in chunk.chunks(CHUNK_SIZE) {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            file.write_all(piece)
                .await
                .map_err(|e| io_error(part_path, e))?;
            hasher.update(piece);
            downloaded += piece.len() as u64;

            if let Some(total) = total_size {
                let progress = percent(downloaded, total);
                if last_progress != Some(progress) {
                    last_progress = Some(progress);
                    let _ = tx.send(DownloadEvent::Progress(progress));
                }
            }
        }
    }

    file.flush().await.map_err(|e| io_error(part_path, e))?;
    drop(file);

    if downloaded == 0 {
        return Err(DownloadError::EmptyBody {
            url: url.to_string(),
        });
    }

    if let Some(expected) = checksum.filter(|c| !c.is_empty()) {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DownloadError::Checksum {
                path: destination.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    // Rename .part to final file
    tokio::fs::rename(part_path, destination)
        .await
        .map_err(|e| io_error(destination, e))?;

    Ok(())
}

/// `floor(done / total * 100)`, capped at 100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as u128 * 100 / total as u128).min(100)) as u8
}

fn part_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {:?}: {}", path, e),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn network_error(url: &str, e: reqwest::Error) -> DownloadError {
    DownloadError::Network {
        url: url.to_string(),
        message: e.to_string(),
    }
}
