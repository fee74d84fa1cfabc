//! Overlay declarations and their validation.
//!
//! Clients submit overlays as untyped JSON records. They are parsed once,
//! at the boundary, into the closed [`OverlaySpec`] variant set; nothing
//! downstream inspects raw fields.
//!
//! Positions are relative to the canvas (`0.0` = left/top edge, `1.0` =
//! right/bottom edge) and times are seconds on the source timeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position used when `x_percent`/`y_percent` are omitted (canvas center).
pub const DEFAULT_POSITION: f64 = 0.5;

/// Visible duration used when `end_time` is omitted.
pub const DEFAULT_DURATION_SECS: f64 = 5.0;

/// A validated overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverlaySpec {
    Text(TextOverlay),
    Image(MediaOverlay),
    Video(MediaOverlay),
}

/// A caption drawn onto the base video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub content: String,
    pub position: Position,
    pub window: TimeWindow,
}

/// An image stamp or video insert composited from an extra input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaOverlay {
    pub source: PathBuf,
    pub position: Position,
    pub window: TimeWindow,

    /// Width multiplier applied to the source before compositing.
    pub scale: Option<f64>,
}

/// Relative placement on the canvas, both axes in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x_percent: f64,
    pub y_percent: f64,
}

/// Visibility window in seconds, `start_time < end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: f64,
    pub end_time: f64,
}

/// Overlay variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    Text,
    Image,
    Video,
}

impl OverlayKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(OverlayKind::Text),
            "image" => Some(OverlayKind::Image),
            "video" => Some(OverlayKind::Video),
            _ => None,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            x_percent: DEFAULT_POSITION,
            y_percent: DEFAULT_POSITION,
        }
    }
}

impl OverlaySpec {
    pub fn kind(&self) -> OverlayKind {
        match self {
            OverlaySpec::Text(_) => OverlayKind::Text,
            OverlaySpec::Image(_) => OverlayKind::Image,
            OverlaySpec::Video(_) => OverlayKind::Video,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            OverlaySpec::Text(text) => text.position,
            OverlaySpec::Image(media) | OverlaySpec::Video(media) => media.position,
        }
    }

    pub fn window(&self) -> TimeWindow {
        match self {
            OverlaySpec::Text(text) => text.window,
            OverlaySpec::Image(media) | OverlaySpec::Video(media) => media.window,
        }
    }

    /// The extra input this overlay consumes, if any.
    pub fn media(&self) -> Option<&MediaOverlay> {
        match self {
            OverlaySpec::Text(_) => None,
            OverlaySpec::Image(media) | OverlaySpec::Video(media) => Some(media),
        }
    }

    /// Parse one raw overlay record. `index` is its position in the
    /// submitted list and is carried into any error.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, ValidationError> {
        let map = value
            .as_object()
            .ok_or(ValidationError::NotAnObject { index })?;
        let fields = Fields { index, map };

        let kind_raw = fields
            .string(&["type"])?
            .ok_or(ValidationError::MissingField {
                index,
                field: "type",
            })?;
        let kind = OverlayKind::parse(kind_raw.trim()).ok_or_else(|| {
            ValidationError::UnknownType {
                index,
                kind: kind_raw.to_string(),
            }
        })?;

        let position = Position {
            x_percent: fields.unit_interval("x_percent")?,
            y_percent: fields.unit_interval("y_percent")?,
        };
        let window = fields.window()?;

        match kind {
            OverlayKind::Text => {
                let content = fields.non_empty_string("content", &["content", "text"])?;
                Ok(OverlaySpec::Text(TextOverlay {
                    content: content.to_string(),
                    position,
                    window,
                }))
            }
            OverlayKind::Image | OverlayKind::Video => {
                let source = fields.non_empty_string("source", &["source"])?;
                let scale = fields.number(&["scale"])?;
                if let Some(scale) = scale {
                    if !(scale.is_finite() && scale > 0.0) {
                        return Err(ValidationError::invalid(
                            index,
                            "scale",
                            format!("must be greater than 0, got {scale}"),
                        ));
                    }
                }
                let media = MediaOverlay {
                    source: PathBuf::from(source),
                    position,
                    window,
                    scale,
                };
                Ok(if kind == OverlayKind::Image {
                    OverlaySpec::Image(media)
                } else {
                    OverlaySpec::Video(media)
                })
            }
        }
    }
}

/// Parse a submitted overlay payload into typed specs, preserving order.
///
/// Structural validation only: source files are not touched. See
/// [`validate_overlays`] for the full check.
pub fn parse_overlays(payload: &Value) -> Result<Vec<OverlaySpec>, ValidationError> {
    let entries = match payload {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(ValidationError::NotAnArray {
                found: json_type_name(other),
            })
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| OverlaySpec::from_value(index, entry))
        .collect()
}

/// Parse the payload and verify every image/video source is readable.
///
/// Relative sources are resolved against `base_dir`.
pub fn validate_overlays(
    payload: &Value,
    base_dir: &Path,
) -> Result<Vec<OverlaySpec>, ValidationError> {
    let mut overlays = parse_overlays(payload)?;
    for (index, overlay) in overlays.iter_mut().enumerate() {
        let media = match overlay {
            OverlaySpec::Text(_) => continue,
            OverlaySpec::Image(media) | OverlaySpec::Video(media) => media,
        };
        if media.source.is_relative() {
            media.source = base_dir.join(&media.source);
        }
        check_readable(index, &media.source)?;
    }
    Ok(overlays)
}

fn check_readable(index: usize, path: &Path) -> Result<(), ValidationError> {
    let unreadable = |reason: String| ValidationError::UnreadableSource {
        index,
        path: path.to_path_buf(),
        reason,
    };
    let metadata = std::fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".to_string()));
    }
    std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    Ok(())
}

/// Errors raised while validating overlay declarations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("overlays payload must be a JSON array, got {found}")]
    NotAnArray { found: &'static str },

    #[error("overlay #{index}: expected an object")]
    NotAnObject { index: usize },

    #[error("overlay #{index}: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("overlay #{index}: field `{field}` {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("overlay #{index}: unknown type `{kind}` (expected text, image, or video)")]
    UnknownType { index: usize, kind: String },

    #[error("overlay #{index}: source {} is not readable: {reason}", path.display())]
    UnreadableSource {
        index: usize,
        path: PathBuf,
        reason: String,
    },
}

impl ValidationError {
    fn invalid(index: usize, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            index,
            field,
            reason: reason.into(),
        }
    }

    /// Index of the offending entry, when the error concerns one entry.
    pub fn index(&self) -> Option<usize> {
        match self {
            ValidationError::NotAnArray { .. } => None,
            ValidationError::NotAnObject { index }
            | ValidationError::MissingField { index, .. }
            | ValidationError::InvalidField { index, .. }
            | ValidationError::UnknownType { index, .. }
            | ValidationError::UnreadableSource { index, .. } => Some(*index),
        }
    }
}

/// Typed accessors over one raw overlay record.
struct Fields<'a> {
    index: usize,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// First present, non-null value among `names` (canonical name first,
    /// then aliases).
    fn lookup(&self, names: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        names.iter().find_map(|name| match self.map.get(*name) {
            None | Some(Value::Null) => None,
            Some(value) => Some((*name, value)),
        })
    }

    fn string(&self, names: &[&'static str]) -> Result<Option<&'a str>, ValidationError> {
        match self.lookup(names) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.as_str())),
            Some((name, other)) => Err(ValidationError::invalid(
                self.index,
                name,
                format!("must be a string, got {}", json_type_name(other)),
            )),
        }
    }

    fn non_empty_string(
        &self,
        field: &'static str,
        names: &[&'static str],
    ) -> Result<&'a str, ValidationError> {
        let value = self
            .string(names)?
            .ok_or(ValidationError::MissingField {
                index: self.index,
                field,
            })?;
        if value.trim().is_empty() {
            return Err(ValidationError::invalid(self.index, field, "must not be empty"));
        }
        Ok(value)
    }

    fn number(&self, names: &[&'static str]) -> Result<Option<f64>, ValidationError> {
        match self.lookup(names) {
            None => Ok(None),
            Some((name, Value::Number(n))) => n.as_f64().map(Some).ok_or_else(|| {
                ValidationError::invalid(self.index, name, "is not representable as a float")
            }),
            Some((name, other)) => Err(ValidationError::invalid(
                self.index,
                name,
                format!("must be a number, got {}", json_type_name(other)),
            )),
        }
    }

    fn unit_interval(&self, field: &'static str) -> Result<f64, ValidationError> {
        let Some(value) = self.number(&[field])? else {
            return Ok(DEFAULT_POSITION);
        };
        if !(0.0..=1.0).contains(&value) {
            return Err(ValidationError::invalid(
                self.index,
                field,
                format!("must lie in [0, 1], got {value}"),
            ));
        }
        Ok(value)
    }

    fn window(&self) -> Result<TimeWindow, ValidationError> {
        let start_time = self.number(&["start_time", "start"])?.unwrap_or(0.0);
        if !(start_time.is_finite() && start_time >= 0.0) {
            return Err(ValidationError::invalid(
                self.index,
                "start_time",
                format!("must be >= 0, got {start_time}"),
            ));
        }

        let end_time = match self.number(&["end_time", "end"])? {
            Some(end) => end,
            None => start_time + DEFAULT_DURATION_SECS,
        };
        if !(end_time.is_finite() && end_time > start_time) {
            return Err(ValidationError::invalid(
                self.index,
                "end_time",
                format!("must be greater than start_time ({start_time}), got {end_time}"),
            ));
        }

        Ok(TimeWindow {
            start_time,
            end_time,
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
