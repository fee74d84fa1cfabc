//! Check encoder tools and storage.

use buttercut_common::config::{config_file_path, AppConfig};
use buttercut_render_engine::probe::tool_available;

pub async fn run(config: &AppConfig, write_config: bool) -> anyhow::Result<()> {
    println!("Buttercut System Check");
    println!("{}", "=".repeat(50));

    let settings = &config.render;
    let mut ready = true;
    for (label, program) in [
        ("Encoder", &settings.ffmpeg_bin),
        ("Probe", &settings.ffprobe_bin),
    ] {
        if tool_available(program).await {
            println!("[OK] {label}: {}", program.display());
        } else {
            println!("[MISSING] {label}: {} (install ffmpeg or set it in the config)", program.display());
            ready = false;
        }
    }

    match std::fs::create_dir_all(config.jobs_dir()) {
        Ok(()) => println!("[OK] Storage: {}", config.storage_dir.display()),
        Err(e) => {
            println!("[FAIL] Storage: {} ({e})", config.storage_dir.display());
            ready = false;
        }
    }

    if write_config {
        config.save()?;
        println!("[OK] Config written: {}", config_file_path().display());
    } else {
        println!("     Config file: {}", config_file_path().display());
    }
    match settings.max_render_secs {
        Some(limit) => println!("     Render time limit: {limit}s"),
        None => println!("     Render time limit: none"),
    }

    println!();
    if ready {
        println!("All required tools are available. Buttercut is ready.");
    } else {
        println!("Some requirements are missing. See above for fixes.");
    }

    Ok(())
}
