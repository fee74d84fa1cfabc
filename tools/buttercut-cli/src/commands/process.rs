//! Render a queued job.

use std::io::Write;
use std::time::Duration;

use buttercut_common::config::AppConfig;
use buttercut_job_model::job::JobStatus;
use tokio_util::sync::CancellationToken;

use super::open_worker;

/// How often the progress line is refreshed from the store.
const PROGRESS_POLL: Duration = Duration::from_millis(500);

pub async fn run(config: &AppConfig, job_id: &str) -> anyhow::Result<()> {
    let worker = open_worker(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling render...");
            on_interrupt.cancel();
        }
    });

    let reporter = {
        let store = worker.store().clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROGRESS_POLL).await;
                if let Ok(Some(job)) = store.get(&job_id) {
                    if job.status != JobStatus::Processing {
                        break;
                    }
                    print!("\r  Progress: {:.1}%  ", job.progress);
                    std::io::stdout().flush().ok();
                }
            }
        })
    };

    let result = worker.process_job(job_id, cancel).await;
    reporter.abort();

    let job = result.map_err(|e| anyhow::anyhow!("Render not started: {e}"))?;
    let message = job.message.as_deref().unwrap_or_default();
    match job.status {
        JobStatus::Done => {
            let output = job
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("\nRender complete: {output}");
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("\nRender cancelled.");
            Ok(())
        }
        status => Err(anyhow::anyhow!("Render {status}: {message}")),
    }
}
