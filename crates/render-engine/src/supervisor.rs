//! Encoder process supervision.
//!
//! Runs one encoder process, streams its progress records to a callback,
//! keeps a bounded prefix of its diagnostics, and stops it on cancellation
//! or when the watchdog deadline passes. The process is always reaped
//! before [`Supervisor::run`] returns.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use buttercut_common::config::RenderSettings;
use buttercut_common::error::{ButtercutError, ButtercutResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressTracker;

/// How long to wait for the diagnostics reader after the process is gone.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderInvocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Exit status 0 and the final progress record was seen.
    Completed,
    /// Non-zero exit, or killed by a signal we did not send.
    Failed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// Exit status 0 without the final progress record.
    Incomplete { diagnostic: String },
    /// Stopped because the cancellation token fired.
    Cancelled,
    /// Stopped by the watchdog.
    TimedOut { limit: Duration },
}

/// Supervision parameters.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Minimum progress increase between two callbacks, in percentage points.
    pub progress_step: f64,
    /// Watchdog limit. `None` lets the process run indefinitely.
    pub max_runtime: Option<Duration>,
    /// Bytes of stderr retained for diagnostics.
    pub diagnostic_capture_bytes: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&RenderSettings::default())
    }
}

impl From<&RenderSettings> for SupervisorOptions {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            progress_step: settings.progress_step,
            max_runtime: settings.max_render_secs.map(Duration::from_secs),
            diagnostic_capture_bytes: settings.diagnostic_capture_bytes,
        }
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self { options }
    }

    /// Run `invocation` to completion.
    ///
    /// `total_duration_secs` normalizes progress (`<= 0` means unknown and
    /// every report is zero until the end record). `on_progress` receives
    /// strictly increasing percentages in `[0, 100]`.
    ///
    /// Only a failure to start the process or to attach its pipes is
    /// returned as `Err`. Every other ending is a [`RenderOutcome`].
    pub async fn run<F>(
        &self,
        invocation: &EncoderInvocation,
        total_duration_secs: f64,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> ButtercutResult<RenderOutcome>
    where
        F: FnMut(f64) + Send,
    {
        tracing::debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            "Starting encoder"
        );

        let started = Instant::now();
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ButtercutError::spawn(format!("{}: {e}", invocation.program.display()))
            })?;

        tracing::info!(
            pid = child.id(),
            args_len = invocation.args.len(),
            total_duration_secs,
            "Encoder process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ButtercutError::spawn("Failed to capture encoder stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ButtercutError::spawn("Failed to capture encoder stderr"))?;

        // Drain stderr concurrently so the encoder never blocks on a full pipe.
        let capture_bytes = self.options.diagnostic_capture_bytes;
        let stderr_task = tokio::spawn(read_bounded(stderr, capture_bytes));

        let watchdog = deadline(self.options.max_runtime);
        tokio::pin!(watchdog);

        let mut tracker = ProgressTracker::new(total_duration_secs, self.options.progress_step);
        let mut lines = BufReader::new(stdout).lines();

        let mut interrupt = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
                _ = &mut watchdog => break Some(Interrupt::TimedOut),
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(percent) = tracker.observe(&line) {
                            on_progress(percent);
                        }
                        if cancel.is_cancelled() {
                            break Some(Interrupt::Cancelled);
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed reading encoder progress");
                        break None;
                    }
                },
            }
        };

        let mut status: Option<ExitStatus> = None;
        if interrupt.is_none() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => interrupt = Some(Interrupt::Cancelled),
                _ = &mut watchdog => interrupt = Some(Interrupt::TimedOut),
                waited = child.wait() => {
                    status = Some(waited.map_err(|e| {
                        ButtercutError::render(format!("Failed to wait on encoder: {e}"))
                    })?);
                }
            }
        }

        if let Some(reason) = &interrupt {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill encoder process");
            }
            let reason = match reason {
                Interrupt::Cancelled => "cancelled",
                Interrupt::TimedOut => "timed_out",
            };
            tracing::info!(
                reason,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Encoder process stopped"
            );
        }

        let diagnostic = match tokio::time::timeout(STDERR_DRAIN_GRACE, stderr_task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => format!("<failed to join stderr reader: {e}>"),
            Err(_) => {
                tracing::debug!("Encoder stderr still open after exit");
                String::new()
            }
        };

        let outcome = match (interrupt, status) {
            (Some(Interrupt::Cancelled), _) => RenderOutcome::Cancelled,
            (Some(Interrupt::TimedOut), _) => RenderOutcome::TimedOut {
                limit: self.options.max_runtime.unwrap_or_default(),
            },
            (None, Some(status)) if status.success() && tracker.saw_end() => {
                RenderOutcome::Completed
            }
            (None, Some(status)) if status.success() => RenderOutcome::Incomplete { diagnostic },
            (None, status) => RenderOutcome::Failed {
                exit_code: status.and_then(|s| s.code()),
                diagnostic,
            },
        };

        tracing::info!(
            outcome = ?outcome,
            out_time_secs = tracker.out_time_secs(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Encoder finished"
        );
        Ok(outcome)
    }
}

/// Resolves once `limit` has elapsed, or never when there is no limit.
async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Read `reader` to the end, keeping at most `limit` bytes.
async fn read_bounded<R>(mut reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading encoder stderr");
                break;
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}
