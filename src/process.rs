// ABOUTME: Supervised child process execution with live output mirroring
// ABOUTME: Scoped signal handling kills the child on interrupt/terminate/quit

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MigratorError, Result};
use crate::signals::ScopedSignals;

/// A child dying from a terminal Ctrl-C can exit before our own listener
/// observes the signal; wait this long before calling it a failure.
const SIGNAL_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Mirror child output to our own stdout/stderr while capturing it.
    pub mirror: bool,
}

impl RunOptions {
    pub fn mirrored() -> Self {
        Self {
            mirror: true,
            ..Self::default()
        }
    }

    pub fn quiet() -> Self {
        Self::default()
    }
}

/// A finished child process and everything it printed.
#[derive(Debug)]
pub struct ProcessExecution {
    pub command_line: String,
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessExecution {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(ProcessExecution),
    /// Termination was requested; the child has been killed.
    Cancelled,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancellationToken,
}

impl ProcessRunner {
    /// `cancel` is the run-wide token; cancelling it kills any child in flight.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub async fn run<I, S>(&self, program: &str, args: I, options: &RunOptions) -> Result<RunOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_line = std::iter::once(program.to_string())
            .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");

        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let mut command = Command::new(program);
        command
            .args(&args)
            .envs(options.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }

        // Listen before spawning so a signal sent by the child itself is ours.
        let mut signals = ScopedSignals::install()?;

        debug!("Spawning: {}", command_line);
        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MigratorError::DependencyMissing(program.to_string()),
            _ => MigratorError::Io(e),
        })?;

        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(pump(out, options.mirror.then(tokio::io::stdout)))
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(pump(err, options.mirror.then(tokio::io::stderr)))
        });

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            name = signals.recv() => {
                warn!("Received {}, stopping '{}'", name, program);
                None
            }
            _ = self.cancel.cancelled() => {
                warn!("Run cancelled, stopping '{}'", program);
                None
            }
        };

        let status = match status {
            Some(status) if status.success() => status,
            Some(status) => {
                let killed = tokio::select! {
                    _ = signals.recv() => true,
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(SIGNAL_GRACE) => false,
                };
                if killed {
                    return Ok(RunOutcome::Cancelled);
                }
                return Err(MigratorError::ProcessFailed {
                    command: program.to_string(),
                    exit_code: status.code(),
                });
            }
            None => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill '{}': {}", program, e);
                }
                return Ok(RunOutcome::Cancelled);
            }
        };
        drop(signals);

        let (stdout, stderr) = futures::future::try_join(collect(stdout), collect(stderr)).await?;
        let elapsed = start.elapsed();
        info!(
            "'{}' finished in {:.1} min",
            program,
            elapsed.as_secs_f64() / 60.0
        );

        Ok(RunOutcome::Completed(ProcessExecution {
            command_line,
            status,
            stdout,
            stderr,
            elapsed,
        }))
    }
}

async fn pump<R, W>(mut reader: R, mut mirror: Option<W>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(captured);
        }
        if let Some(out) = mirror.as_mut() {
            out.write_all(&buf[..n]).await?;
            out.flush().await?;
        }
        captured.extend_from_slice(&buf[..n]);
    }
}

async fn collect(handle: Option<tokio::task::JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => Ok(handle.await.map_err(io::Error::other)??),
        None => Ok(Vec::new()),
    }
}
