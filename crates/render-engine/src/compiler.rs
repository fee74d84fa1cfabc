//! Overlay-to-filter-graph compilation.
//!
//! Turns a validated overlay list into the `-filter_complex` graph and the
//! full encoder argument vector. Compilation is pure: the same overlays and
//! canvas always produce the same command.
//!
//! Stages are emitted in two passes. Text overlays come first in submitted
//! order, then image/video overlays in submitted order, each consuming the
//! next extra input (`1:v`, `2:v`, ...). Every stage reads the previous
//! stage's output, so later overlays are drawn on top of earlier ones.

use std::fmt;
use std::path::{Path, PathBuf};

use buttercut_common::config::RenderSettings;
use buttercut_job_model::overlay::{OverlaySpec, Position, TimeWindow};
use serde::Serialize;

/// Label of the primary video stream.
pub const BASE_VIDEO_LABEL: &str = "0:v";

/// Pixel dimensions of the base video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Convert a relative position to integer pixel coordinates.
    pub fn to_pixels(&self, position: Position) -> (i64, i64) {
        (
            (position.x_percent * self.width as f64).round() as i64,
            (position.y_percent * self.height as f64).round() as i64,
        )
    }
}

/// One filter operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Draw a caption. `text` is already escaped for the filter grammar.
    DrawText {
        text: String,
        x: i64,
        y: i64,
        font_size: u32,
        window: TimeWindow,
    },
    /// Resize to `iw*factor` wide, keeping the aspect ratio.
    Scale { factor: f64 },
    /// Composite the second input over the first.
    Overlay { x: i64, y: i64, window: TimeWindow },
}

impl FilterOp {
    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::DrawText { .. } => "drawtext",
            FilterOp::Scale { .. } => "scale",
            FilterOp::Overlay { .. } => "overlay",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::DrawText {
                text,
                x,
                y,
                font_size,
                window,
            } => write!(
                f,
                "drawtext=text='{text}':expansion=none:x={x}:y={y}:fontsize={font_size}\
                 :box=1:boxcolor=black@0.5:boxborderw=5:enable='{}'",
                enable_predicate(window)
            ),
            FilterOp::Scale { factor } => write!(f, "scale=iw*{factor}:-1"),
            FilterOp::Overlay { x, y, window } => write!(
                f,
                "overlay=x={x}:y={y}:enable='{}'",
                enable_predicate(window)
            ),
        }
    }
}

/// A filter operation with its input and output labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStage {
    pub inputs: Vec<String>,
    pub op: FilterOp,
    pub output: String,
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{input}]")?;
        }
        write!(f, "{}[{}]", self.op, self.output)
    }
}

/// A compiled render: filter stages plus the extra inputs they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCommand {
    pub stages: Vec<FilterStage>,

    /// Overlay sources in extra-input order (`1:v` first).
    pub extra_inputs: Vec<PathBuf>,

    /// Label of the final composed video stream.
    pub video_output: String,
}

impl CompiledCommand {
    /// The `-filter_complex` value, `None` when there is nothing to draw.
    pub fn filter_complex(&self) -> Option<String> {
        if self.stages.is_empty() {
            return None;
        }
        Some(
            self.stages
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// Value for `-map` selecting the composed video.
    pub fn video_map(&self) -> String {
        if self.stages.is_empty() {
            self.video_output.clone()
        } else {
            format!("[{}]", self.video_output)
        }
    }

    /// Full encoder argument vector (without the program name).
    ///
    /// Machine-readable progress goes to stdout. Audio is copied when the
    /// source has any.
    pub fn encoder_args(&self, input: &Path, output: &Path, encode: &EncodeSettings) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-nostats",
            "-progress",
            "pipe:1",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(input.to_string_lossy().into_owned());

        for extra in &self.extra_inputs {
            args.push("-i".to_string());
            args.push(extra.to_string_lossy().into_owned());
        }

        if let Some(graph) = self.filter_complex() {
            args.push("-filter_complex".to_string());
            args.push(graph);
        }

        args.extend([
            "-map".to_string(),
            self.video_map(),
            "-map".to_string(),
            "0:a?".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            encode.crf.to_string(),
            "-preset".to_string(),
            encode.preset.clone(),
            "-c:a".to_string(),
            "copy".to_string(),
        ]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Video quality parameters for the re-encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub crf: u32,
    pub preset: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::from(&RenderSettings::default())
    }
}

impl From<&RenderSettings> for EncodeSettings {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            crf: settings.crf,
            preset: settings.preset.clone(),
        }
    }
}

/// Compiles overlays into filter stages.
#[derive(Debug, Clone, Copy)]
pub struct GraphCompiler {
    font_size: u32,
}

impl Default for GraphCompiler {
    fn default() -> Self {
        Self::new(RenderSettings::default().font_size)
    }
}

impl GraphCompiler {
    pub fn new(font_size: u32) -> Self {
        Self { font_size }
    }

    pub fn compile(&self, overlays: &[OverlaySpec], canvas: Canvas) -> CompiledCommand {
        let mut stages = Vec::new();
        let mut extra_inputs = Vec::new();
        let mut current = BASE_VIDEO_LABEL.to_string();
        let mut label_counter = 0usize;

        for overlay in overlays {
            let OverlaySpec::Text(text) = overlay else {
                continue;
            };
            let (x, y) = canvas.to_pixels(text.position);
            let output = format!("v{label_counter}");
            label_counter += 1;
            stages.push(FilterStage {
                inputs: vec![current],
                op: FilterOp::DrawText {
                    text: escape_filter_text(&text.content),
                    x,
                    y,
                    font_size: self.font_size,
                    window: text.window,
                },
                output: output.clone(),
            });
            current = output;
        }

        for media in overlays.iter().filter_map(OverlaySpec::media) {
            extra_inputs.push(media.source.clone());
            let mut source = format!("{}:v", extra_inputs.len());

            if let Some(factor) = media.scale {
                let scaled = format!("s{label_counter}");
                stages.push(FilterStage {
                    inputs: vec![source],
                    op: FilterOp::Scale { factor },
                    output: scaled.clone(),
                });
                source = scaled;
            }

            let (x, y) = canvas.to_pixels(media.position);
            let output = format!("v{label_counter}");
            label_counter += 1;
            stages.push(FilterStage {
                inputs: vec![current, source],
                op: FilterOp::Overlay {
                    x,
                    y,
                    window: media.window,
                },
                output: output.clone(),
            });
            current = output;
        }

        tracing::debug!(
            stages = stages.len(),
            extra_inputs = extra_inputs.len(),
            canvas_width = canvas.width,
            canvas_height = canvas.height,
            "Filter graph compiled"
        );

        CompiledCommand {
            stages,
            extra_inputs,
            video_output: current,
        }
    }
}

/// Compile with the default font size.
pub fn compile(overlays: &[OverlaySpec], canvas: Canvas) -> CompiledCommand {
    GraphCompiler::default().compile(overlays, canvas)
}

/// Escape text for a single-quoted filter option value.
///
/// The value is unquoted once by the graph parser and once more by the
/// option parser. `\` and `:` are escaped for the second pass. A quote
/// cannot appear inside quotes, so it closes the quote, emits an escaped
/// `\'` that survives both passes, and reopens.
pub fn escape_filter_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => escaped.push_str(r"'\\\''"),
            '\\' | ':' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

fn enable_predicate(window: &TimeWindow) -> String {
    format!("between(t,{},{})", window.start_time, window.end_time)
}
