//! Background capture of board data streams.
//!
//! Each capture binds its own UDP port and runs as a spawned Tokio task that
//! writes every datagram it receives to an output file until it is closed.
//! The output encoding is chosen from the file name:
//!
//! - `*.fits*` with a known frame shape: pixels through the injected
//!   [`ImageSinkFactory`]
//! - `*.txt*`: one `%08x` line per word
//! - anything else: the raw bytes as received, prefixed with the frame shape
//!   (`cols`, `rows`, network order) when it is known

use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use odile_core::error::{Error, Result};
use odile_core::image::{ImageSink, ImageSinkFactory};
use odile_core::wire::decode_words;
use odile_core::MAX_DATAGRAM;
use odile_transport::UdpEndpoint;

/// Longest a worker blocks in one receive; bounds cancellation latency.
pub const RECEIVE_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Output encodings
// ---------------------------------------------------------------------------

enum CaptureOutput {
    Image {
        sink: Box<dyn ImageSink>,
        next_pixel: u64,
        pixels: u64,
    },
    Text(BufWriter<File>),
    Binary(BufWriter<File>),
    /// An image was requested but no image capability is available.
    Discard,
}

impl CaptureOutput {
    async fn open(
        path: &Path,
        rows: u32,
        cols: u32,
        images: Option<&Arc<dyn ImageSinkFactory>>,
    ) -> Result<Self> {
        let name = path.to_string_lossy();
        let shaped = rows > 0 && cols > 0;

        if name.contains(".fits") && shaped {
            let Some(factory) = images else {
                tracing::warn!(path = %path.display(), "No image capability, capture data will be discarded");
                return Ok(CaptureOutput::Discard);
            };
            let sink = factory.create(path, cols as usize, rows as usize).await?;
            return Ok(CaptureOutput::Image {
                sink,
                next_pixel: 0,
                pixels: u64::from(rows) * u64::from(cols),
            });
        }

        let mut file = BufWriter::new(File::create(path).await?);
        if name.contains(".txt") {
            return Ok(CaptureOutput::Text(file));
        }
        if shaped {
            file.write_all(&cols.to_be_bytes()).await?;
            file.write_all(&rows.to_be_bytes()).await?;
        }
        Ok(CaptureOutput::Binary(file))
    }

    async fn write(&mut self, datagram: &[u8]) -> Result<()> {
        match self {
            CaptureOutput::Image {
                sink,
                next_pixel,
                pixels,
            } => {
                if *next_pixel >= *pixels {
                    return Ok(());
                }
                let room = (*pixels - *next_pixel) as usize;
                let values: Vec<i32> = decode_words(datagram)
                    .into_iter()
                    .take(room)
                    .map(|w| w as i32)
                    .collect();
                sink.write_pixels(*next_pixel, &values).await?;
                *next_pixel += values.len() as u64;
            }
            CaptureOutput::Text(file) => {
                let mut text = String::with_capacity(datagram.len() / 4 * 9);
                for word in decode_words(datagram) {
                    let _ = writeln!(text, "{word:08x}");
                }
                file.write_all(text.as_bytes()).await?;
            }
            CaptureOutput::Binary(file) => file.write_all(datagram).await?,
            CaptureOutput::Discard => {}
        }
        Ok(())
    }

    async fn finish(self) -> Result<()> {
        match self {
            CaptureOutput::Image { sink, .. } => sink.close().await,
            CaptureOutput::Text(mut file) | CaptureOutput::Binary(mut file) => {
                file.flush().await?;
                Ok(())
            }
            CaptureOutput::Discard => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn capture_loop(
    id: usize,
    endpoint: UdpEndpoint,
    mut output: CaptureOutput,
    words: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut result = Ok(());

    loop {
        let received = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(id, "Capture cancelled");
                break;
            }

            received = endpoint.recv(&mut buf, Some(RECEIVE_INTERVAL)) => received,
        };

        match received {
            Ok(n) => {
                words.fetch_add((n / 4) as u64, Ordering::Relaxed);
                tracing::trace!(id, bytes = n, "Capture datagram");
                if let Err(e) = output.write(&buf[..n]).await {
                    result = Err(e);
                    break;
                }
            }
            Err(Error::Timeout) => continue,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    let result = match result {
        Ok(()) => output.finish().await,
        Err(e) => {
            let _ = output.finish().await;
            Err(e)
        }
    };
    if let Err(e) = result {
        tracing::error!(id, error = %e, "Capture failed");
    }
    finished.store(true, Ordering::Release);
    debug!(id, words = words.load(Ordering::Relaxed), "Capture finished");
}

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

struct CaptureTask {
    port: u16,
    path: PathBuf,
    local_addr: SocketAddr,
    words: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CaptureTask {
    fn is_running(&self) -> bool {
        self.handle.is_some() && !self.finished.load(Ordering::Acquire)
    }
}

/// Table of capture tasks, indexed by the id [`launch`](Self::launch)
/// returns.
///
/// Dropping the manager cancels every running task.
pub struct CaptureManager {
    tasks: Vec<CaptureTask>,
    images: Option<Arc<dyn ImageSinkFactory>>,
}

impl CaptureManager {
    pub fn new(images: Option<Arc<dyn ImageSinkFactory>>) -> Self {
        CaptureManager {
            tasks: Vec::new(),
            images,
        }
    }

    /// Bind `address:port`, open `output` and start capturing into it.
    ///
    /// `rows`/`cols` of 0 mean the frame shape is unknown. Port 0 binds an
    /// ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn launch(
        &mut self,
        output: impl AsRef<Path>,
        address: IpAddr,
        port: u16,
        rows: u32,
        cols: u32,
    ) -> Result<usize> {
        let path = output.as_ref().to_path_buf();
        let endpoint = UdpEndpoint::bind(SocketAddr::new(address, port)).await?;
        let local_addr = endpoint.local_addr();
        let out = CaptureOutput::open(&path, rows, cols, self.images.as_ref()).await?;

        let id = self.tasks.len();
        let words = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(capture_loop(
            id,
            endpoint,
            out,
            words.clone(),
            finished.clone(),
            cancel.clone(),
        ));

        tracing::info!(id, %local_addr, path = %path.display(), rows, cols, "Capture launched");
        self.tasks.push(CaptureTask {
            port,
            path,
            local_addr,
            words,
            finished,
            cancel,
            handle: Some(handle),
        });
        Ok(id)
    }

    /// Stop task `id`, wait for its output to be flushed and return the
    /// number of words it received.
    pub async fn close(&mut self, id: usize) -> Result<u64> {
        let task = self
            .tasks
            .get_mut(id)
            .filter(|t| t.is_running())
            .ok_or(Error::InvalidTask(id))?;

        task.cancel.cancel();
        if let Some(handle) = task.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(id, error = %e, "Capture task panicked");
            }
        }
        let words = task.words.load(Ordering::Relaxed);
        debug!(id, port = task.port, path = %task.path.display(), words, "Capture closed");
        Ok(words)
    }

    /// Close every running task. Returns the number closed.
    pub async fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for id in 0..self.tasks.len() {
            if self.close(id).await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    /// Whether task `id` exists and is still capturing.
    pub fn is_valid(&self, id: usize) -> bool {
        self.tasks.get(id).is_some_and(CaptureTask::is_running)
    }

    /// Words received so far by task `id`, running or not.
    pub fn words_read(&self, id: usize) -> Option<u64> {
        self.tasks.get(id).map(|t| t.words.load(Ordering::Relaxed))
    }

    /// Address task `id` is bound to.
    pub fn local_addr(&self, id: usize) -> Option<SocketAddr> {
        self.tasks.get(id).map(|t| t.local_addr)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.cancel.cancel();
        }
    }
}
