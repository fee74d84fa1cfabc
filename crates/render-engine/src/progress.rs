//! Encoder progress parsing.
//!
//! ffmpeg's `-progress pipe:1` stream is a sequence of `key=value` lines
//! grouped into blocks, each block closed by `progress=continue` or, for the
//! last one, `progress=end`.

/// What a single progress line told us.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressRecord {
    /// Encoded output position, in seconds.
    OutTime(f64),
    /// Block terminator, more blocks follow.
    Continue,
    /// Final block terminator.
    End,
}

/// Parse one line of the progress stream. Unknown keys and unparsable
/// values yield `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressRecord> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();
    match key.trim() {
        "out_time" => parse_timecode(value).map(ProgressRecord::OutTime),
        // Both carry microseconds; older builds misname the second.
        "out_time_us" | "out_time_ms" => value
            .parse::<f64>()
            .ok()
            .filter(|us| us.is_finite())
            .map(|us| ProgressRecord::OutTime(us / 1_000_000.0)),
        "progress" if value == "end" => Some(ProgressRecord::End),
        "progress" => Some(ProgressRecord::Continue),
        _ => None,
    }
}

/// Parse an `[-]HH:MM:SS[.frac]` timecode into seconds.
pub fn parse_timecode(value: &str) -> Option<f64> {
    let (negative, body) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let mut parts = body.split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?;
    let total = whole as f64 + seconds;
    Some(if negative { -total } else { total })
}

/// Map elapsed output time onto `[0, 100]`. An unknown total yields zero.
pub fn percent_complete(elapsed_secs: f64, total_secs: f64) -> f64 {
    if total_secs.is_nan() || total_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0.0;
    }
    (elapsed_secs / total_secs).clamp(0.0, 1.0) * 100.0
}

/// Follows a progress stream and decides which percentages are worth
/// reporting.
///
/// A value is emitted only when it exceeds the last emitted one by at least
/// `step` points, which bounds store writes to about `100 / step` per job.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_secs: f64,
    step: f64,
    last_emitted: f64,
    out_time_secs: f64,
    ended: bool,
}

impl ProgressTracker {
    pub fn new(total_secs: f64, step: f64) -> Self {
        Self {
            total_secs,
            step: if step.is_finite() { step.max(0.0) } else { 0.0 },
            last_emitted: 0.0,
            out_time_secs: 0.0,
            ended: false,
        }
    }

    /// Feed one stdout line. Returns a percentage to report, if any.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        let candidate = match parse_progress_line(line)? {
            ProgressRecord::OutTime(secs) => {
                self.out_time_secs = secs;
                percent_complete(secs, self.total_secs)
            }
            ProgressRecord::Continue => return None,
            ProgressRecord::End => {
                self.ended = true;
                100.0
            }
        };
        self.gate(candidate)
    }

    /// Whether the final block terminator has been seen.
    pub fn saw_end(&self) -> bool {
        self.ended
    }

    /// Last parsed output position in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_secs
    }

    pub fn last_emitted(&self) -> f64 {
        self.last_emitted
    }

    fn gate(&mut self, candidate: f64) -> Option<f64> {
        if candidate <= self.last_emitted || candidate < self.last_emitted + self.step {
            return None;
        }
        self.last_emitted = candidate;
        Some(candidate)
    }
}
