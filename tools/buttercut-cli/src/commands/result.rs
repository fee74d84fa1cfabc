//! Print the rendered artifact of a finished job.

use buttercut_common::config::AppConfig;
use buttercut_job_model::job::JobStatus;

use super::{load_job, open_store};

pub fn run(config: &AppConfig, job_id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let job = load_job(store.as_ref(), job_id)?;

    match job.servable_output() {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None if job.status == JobStatus::Done => Err(anyhow::anyhow!(
            "Output for job {job_id} is missing from storage"
        )),
        None => Err(anyhow::anyhow!(
            "Job {job_id} is {}, no output available",
            job.status
        )),
    }
}
