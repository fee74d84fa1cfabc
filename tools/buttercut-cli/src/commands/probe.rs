//! Probe a source video.

use std::path::PathBuf;

use buttercut_common::config::AppConfig;
use buttercut_render_engine::probe::probe_video;

use super::require_file;

pub async fn run(config: &AppConfig, video: PathBuf) -> anyhow::Result<()> {
    let video = require_file(&video)?;
    let info = probe_video(&config.render.ffprobe_bin, &video).await;
    println!("{}", serde_json::to_string_pretty(&info)?);
    if info.duration_seconds <= 0.0 {
        println!("Duration unknown: progress will stay at 0% until the render ends.");
    }
    Ok(())
}
