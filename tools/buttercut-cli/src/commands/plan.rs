//! Validate overlays and print the encoder command a render would run.

use std::path::PathBuf;

use buttercut_common::config::AppConfig;
use buttercut_job_model::overlay::validate_overlays;
use buttercut_render_engine::compiler::{Canvas, EncodeSettings, GraphCompiler};
use buttercut_render_engine::probe::probe_video;

use super::{read_overlays, require_file};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    overlays: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let video = require_file(&video)?;
    let payload = read_overlays(overlays.as_deref())?;
    let base_dir = std::env::current_dir()?;
    let overlays = validate_overlays(&payload, &base_dir)
        .map_err(|e| anyhow::anyhow!("Invalid overlays: {e}"))?;

    let settings = &config.render;
    let info = probe_video(&settings.ffprobe_bin, &video).await;
    let canvas = info.canvas_or(Canvas::new(
        settings.default_canvas_width,
        settings.default_canvas_height,
    ));
    let compiled = GraphCompiler::new(settings.font_size).compile(&overlays, canvas);

    println!("Source: {}", video.display());
    println!(
        "  Canvas: {}x{}  Duration: {:.2}s",
        canvas.width, canvas.height, info.duration_seconds
    );
    println!("  Overlays: {}", overlays.len());
    println!("  Filter stages: {}", compiled.stages.len());
    for stage in &compiled.stages {
        println!("    {stage}");
    }
    println!();

    let args = compiled.encoder_args(&video, &output, &EncodeSettings::from(settings));
    let mut command = vec![shell_quote(&settings.ffmpeg_bin.to_string_lossy())];
    command.extend(args.iter().map(|arg| shell_quote(arg)));
    println!("{}", command.join(" "));
    Ok(())
}

/// Quote `arg` for a POSIX shell when it contains anything but safe
/// characters.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
