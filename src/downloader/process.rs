// Process runner backed by tokio::process

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::traits::{CommandRunner, ProcessOutput};

/// Runs real executables.
///
/// `timeout` bounds the buffered [`CommandRunner::run`] mode only; streaming
/// downloads can legitimately take as long as the transfer does.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn spawn(program: &Path, args: &[String]) -> Result<Child, DownloadError> {
        TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DownloadError::ToolNotFound(program.display().to_string())
                } else {
                    DownloadError::Spawn {
                        program: program.display().to_string(),
                        message: e.to_string(),
                    }
                }
            })
    }
}

fn read_all<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Failed to drain pipe");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(handle: JoinHandle<String>) -> String {
    handle.await.unwrap_or_default()
}

/// Best-effort kill; the child may already be gone.
async fn terminate(child: &mut Child, program: &Path) {
    if let Err(e) = child.kill().await {
        tracing::debug!(program = %program.display(), error = %e, "Kill after cancellation failed");
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tracing::debug!(program = %program.display(), args = ?args, "Running");
        let mut child = Self::spawn(program, args)?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Io("failed to capture stdout".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Io("failed to capture stderr".to_string()))?;
        let stdout_task = read_all(stdout_pipe);
        let stderr_task = read_all(stderr_pipe);

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                terminate(&mut child, program).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(DownloadError::Cancelled);
            }
            () = deadline => {
                terminate(&mut child, program).await;
                stdout_task.abort();
                stderr_task.abort();
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                return Err(DownloadError::Timeout(secs));
            }
            status = child.wait() => status?,
        };

        Ok(ProcessOutput {
            stdout: collect(stdout_task).await,
            stderr: collect(stderr_task).await,
            exit_code: status.code(),
        })
    }

    async fn run_streaming(
        &self,
        program: &Path,
        args: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tracing::debug!(program = %program.display(), args = ?args, "Running (streaming)");
        let mut child = Self::spawn(program, args)?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Io("failed to capture stdout".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Io("failed to capture stderr".to_string()))?;
        let stderr_task = read_all(stderr_pipe);

        let mut reader = BufReader::new(stdout_pipe);
        let mut buf = Vec::new();
        let mut stdout = String::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    terminate(&mut child, program).await;
                    stderr_task.abort();
                    return Err(DownloadError::Cancelled);
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\r', '\n']);
            tracing::trace!(line, "stdout");
            stdout.push_str(line);
            stdout.push('\n');
            on_line(line);
        }

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                terminate(&mut child, program).await;
                stderr_task.abort();
                return Err(DownloadError::Cancelled);
            }
            status = child.wait() => status?,
        };

        Ok(ProcessOutput {
            stdout,
            stderr: collect(stderr_task).await,
            exit_code: status.code(),
        })
    }
}
