// Seams between the engine and the outside world

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{DownloadId, DownloadItem, QueueEvent};

/// Captured result of one finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches external executables.
///
/// A non-zero exit is not an error at this level: it comes back in
/// [`ProcessOutput::exit_code`] together with stderr and the caller decides.
/// Cancellation kills the child and yields [`DownloadError::Cancelled`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, buffering stdout and stderr.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError>;

    /// Run to completion, handing each stdout line to `on_line` as it arrives.
    /// The full stdout is still accumulated in the returned output.
    async fn run_streaming(
        &self,
        program: &Path,
        args: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError>;
}

/// A web search engine that can be asked for candidate video ids
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Name of the source (for logging)
    fn name(&self) -> &'static str;

    async fn find_video_ids(&self, query: &str) -> Result<Vec<String>, DownloadError>;
}

/// Broadcasts queue state changes to whoever is listening
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn added(&self, item: &DownloadItem) {
        self.emit(QueueEvent::Added(item.clone()));
    }

    pub fn updated(&self, item: &DownloadItem) {
        self.emit(QueueEvent::Updated(item.clone()));
    }

    pub fn removed(&self, id: DownloadId) {
        self.emit(QueueEvent::Removed(id));
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}
