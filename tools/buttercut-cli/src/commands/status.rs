//! Show a job's status.

use buttercut_common::config::AppConfig;

use super::{load_job, open_store};

pub fn run(config: &AppConfig, job_id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let job = load_job(store.as_ref(), job_id)?;
    println!("{}", serde_json::to_string_pretty(&job.status_view())?);
    Ok(())
}
