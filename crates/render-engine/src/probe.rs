//! Source media probing.
//!
//! Probing never fails a render: a missing tool, an unreadable file, or
//! malformed output all degrade to "unknown" values, which only affect
//! progress normalization and overlay pixel placement.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::compiler::Canvas;

/// Duration and geometry of a source video.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VideoInfo {
    /// Container duration in seconds, `0.0` when unknown.
    pub duration_seconds: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoInfo {
    /// Probed geometry, or `fallback` when either dimension is unknown.
    pub fn canvas_or(&self, fallback: Canvas) -> Canvas {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Canvas::new(width, height),
            _ => fallback,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe `input` with `ffprobe`.
pub async fn probe_video(ffprobe: &Path, input: &Path) -> VideoInfo {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "format=duration:stream=width,height",
            "-of",
            "json",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(
                ffprobe = %ffprobe.display(),
                error = %e,
                "ffprobe unavailable, continuing without source metadata"
            );
            return VideoInfo::default();
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(
            input = %input.display(),
            status = %output.status,
            stderr = %stderr.trim(),
            "ffprobe failed, continuing without source metadata"
        );
        return VideoInfo::default();
    }

    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!(
        input = %input.display(),
        duration_seconds = info.duration_seconds,
        width = ?info.width,
        height = ?info.height,
        "Source probed"
    );
    info
}

/// Parse `ffprobe -of json` output. Missing or invalid fields come back as
/// unknown rather than as an error.
pub fn parse_probe_output(raw: &str) -> VideoInfo {
    let document: ProbeDocument = match serde_json::from_str(raw) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(error = %e, "Unparsable ffprobe output");
            return VideoInfo::default();
        }
    };

    let duration_seconds = document
        .format
        .and_then(|format| format.duration)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .unwrap_or(0.0);

    let stream = document.streams.into_iter().next();
    let positive = |value: Option<u32>| value.filter(|v| *v > 0);
    let (width, height) = match stream {
        Some(stream) => (positive(stream.width), positive(stream.height)),
        None => (None, None),
    };

    VideoInfo {
        duration_seconds,
        width,
        height,
    }
}

/// Whether `program` can be executed and answers `-version`.
pub async fn tool_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
