//! End-to-end job lifecycle tests against stub encoder scripts.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buttercut_common::config::RenderSettings;
use buttercut_common::error::ButtercutError;
use buttercut_job_model::error::JobError;
use buttercut_job_model::job::{JobStatus, RenderJob};
use buttercut_job_model::store::{JobStore, MemoryJobStore};
use buttercut_render_engine::worker::RenderWorker;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const PROBE_JSON: &str =
    r#"{"streams":[{"width":640,"height":360}],"format":{"duration":"10.000000"}}"#;

/// Scratch storage directory removed on drop.
struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    fn new(label: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "buttercut_it_{label}_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn file(&self, name: &str) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, b"fake media").unwrap();
        path
    }

    fn settings(&self, encoder_body: &str) -> RenderSettings {
        RenderSettings {
            ffmpeg_bin: self.script("ffmpeg-stub", encoder_body),
            ffprobe_bin: self.script("ffprobe-stub", &format!("echo '{PROBE_JSON}'")),
            ..RenderSettings::default()
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

/// Store that remembers every write in order.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryJobStore,
    writes: Mutex<Vec<(JobStatus, f64)>>,
    panic_on_progress: bool,
}

impl RecordingStore {
    fn writes(&self) -> Vec<(JobStatus, f64)> {
        self.writes.lock().unwrap().clone()
    }
}

impl JobStore for RecordingStore {
    fn get(&self, id: &str) -> Result<Option<RenderJob>, JobError> {
        self.inner.get(id)
    }

    fn upsert(&self, job: &RenderJob) -> Result<(), JobError> {
        if self.panic_on_progress && job.status == JobStatus::Processing && job.progress > 0.0 {
            panic!("progress write exploded");
        }
        self.writes.lock().unwrap().push((job.status, job.progress));
        self.inner.upsert(job)
    }
}

fn setup(
    sandbox: &Sandbox,
    settings: RenderSettings,
    overlays: Value,
) -> (RenderWorker, Arc<RecordingStore>, RenderJob) {
    setup_with_store(sandbox, settings, overlays, RecordingStore::default())
}

fn setup_with_store(
    sandbox: &Sandbox,
    settings: RenderSettings,
    overlays: Value,
    store: RecordingStore,
) -> (RenderWorker, Arc<RecordingStore>, RenderJob) {
    let store = Arc::new(store);
    let worker = RenderWorker::new(store.clone(), settings, &sandbox.root);
    let job = RenderJob::new_queued(sandbox.file("input.mp4"), overlays);
    store.upsert(&job).unwrap();
    (worker, store, job)
}

fn assert_single_terminal_write_last(writes: &[(JobStatus, f64)]) {
    let terminal: Vec<usize> = writes
        .iter()
        .enumerate()
        .filter(|(_, (status, _))| status.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![writes.len() - 1], "writes: {writes:?}");
}

fn staging_leftovers(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".partial."))
        .count()
}

#[tokio::test]
async fn test_successful_render_publishes_output() {
    let sandbox = Sandbox::new("success");
    sandbox.file("logo.png");
    let args_file = sandbox.root.join("args.txt");
    let settings = sandbox.settings(&format!(
        r#"printf '%s\n' "$@" > "{}"
for last; do :; done
echo out_time=00:00:02.500000
echo progress=continue
echo out_time=00:00:05.000000
echo progress=continue
printf 'rendered' > "$last"
echo out_time=00:00:10.000000
echo progress=end"#,
        args_file.display()
    ));
    let overlays = json!([
        { "type": "image", "source": "logo.png", "scale": 0.5, "start_time": 0, "end_time": 3 },
        { "type": "text", "text": "hello", "start": 1, "end": 4 }
    ]);
    let (worker, store, job) = setup(&sandbox, settings, overlays);

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    let expected_output = sandbox.root.join(format!("{}_output.mp4", job.id));
    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(finished.progress, 100.0);
    assert_eq!(finished.output_path.as_deref(), Some(expected_output.as_path()));
    assert_eq!(finished.servable_output(), Some(expected_output.as_path()));
    assert_eq!(std::fs::read_to_string(&expected_output).unwrap(), "rendered");
    assert_eq!(staging_leftovers(&sandbox.root), 0);
    assert_eq!(store.get(&job.id).unwrap().unwrap(), finished);

    let writes = store.writes();
    assert_eq!(writes[0], (JobStatus::Queued, 0.0));
    assert_eq!(writes[1], (JobStatus::Processing, 0.0));
    let progress: Vec<f64> = writes
        .iter()
        .filter(|(status, _)| *status == JobStatus::Processing)
        .map(|(_, pct)| *pct)
        .collect();
    assert_eq!(progress, vec![0.0, 25.0, 50.0, 100.0]);
    assert_single_terminal_write_last(&writes);

    let args: Vec<String> = std::fs::read_to_string(&args_file)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
    let graph = &args[graph_at + 1];
    assert!(graph.starts_with("[0:v]drawtext=text='hello'"));
    assert!(graph.contains(":x=320:y=180:"));
    assert!(graph.contains("[1:v]scale=iw*0.5:-1[s1]"));
    assert!(graph.contains("enable='between(t,1,4)'"));
    assert!(args.contains(&sandbox.root.join("logo.png").display().to_string()));
    assert!(args.last().unwrap().ends_with("_output.partial.mp4"));
}

#[tokio::test]
async fn test_encoder_failure_records_diagnostic() {
    let sandbox = Sandbox::new("encoder_error");
    let settings = sandbox.settings("echo \"No such filter: 'bogus'\" >&2\nexit 1");
    let (worker, store, job) = setup(&sandbox, settings, json!([]));

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.output_path.is_none());
    assert!(finished
        .message
        .as_deref()
        .unwrap()
        .contains("No such filter"));
    assert_single_terminal_write_last(&store.writes());
}

#[tokio::test]
async fn test_diagnostic_message_is_bounded() {
    let sandbox = Sandbox::new("long_error");
    let settings = RenderSettings {
        diagnostic_chars: 40,
        ..sandbox.settings("i=0\nwhile [ $i -lt 100 ]; do echo \"error $i\" >&2; i=$((i+1)); done\nexit 2")
    };
    let (worker, _, job) = setup(&sandbox, settings, json!([]));

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    let message = finished.message.unwrap();
    assert!(message.starts_with("error 0"));
    assert!(message.chars().count() <= 40);
}

#[tokio::test]
async fn test_clean_exit_without_artifact_fails() {
    let sandbox = Sandbox::new("no_artifact");
    let settings = sandbox.settings("echo out_time=00:00:10.000000\necho progress=end\nexit 0");
    let (worker, store, job) = setup(&sandbox, settings, json!([]));

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.output_path.is_none());
    assert!(finished.servable_output().is_none());
    assert!(finished
        .message
        .as_deref()
        .unwrap()
        .starts_with("Finalization failed"));
    assert!(!store
        .writes()
        .iter()
        .any(|(status, _)| *status == JobStatus::Done));
}

#[tokio::test]
async fn test_missing_completion_signal_fails() {
    let sandbox = Sandbox::new("no_end");
    let settings = sandbox.settings(
        "for last; do :; done\nprintf 'partial' > \"$last\"\necho out_time=00:00:04.000000\nexit 0",
    );
    let (worker, _, job) = setup(&sandbox, settings, json!([]));

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished
        .message
        .as_deref()
        .unwrap()
        .contains("without completion signal"));
    assert_eq!(staging_leftovers(&sandbox.root), 0);
    assert!(!sandbox
        .root
        .join(format!("{}_output.mp4", job.id))
        .exists());
}

#[tokio::test]
async fn test_cancellation_ends_job_cancelled() {
    let sandbox = Sandbox::new("cancel");
    let settings = sandbox.settings("echo out_time=00:00:01.000000\nexec sleep 30");
    let (worker, store, job) = setup(&sandbox, settings, json!([]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let finished = tokio::time::timeout(
        Duration::from_secs(15),
        worker.process_job(&job.id, cancel),
    )
    .await
    .expect("cancellation should stop the render")
    .unwrap();

    assert_eq!(finished.status, JobStatus::Cancelled);
    assert!(finished.output_path.is_none());
    assert_eq!(finished.message.as_deref(), Some("Render cancelled"));
    assert_single_terminal_write_last(&store.writes());
}

#[tokio::test]
async fn test_watchdog_fails_stuck_render() {
    let sandbox = Sandbox::new("watchdog");
    let settings = RenderSettings {
        max_render_secs: Some(1),
        ..sandbox.settings("exec sleep 30")
    };
    let (worker, _, job) = setup(&sandbox, settings, json!([]));

    let finished = tokio::time::timeout(
        Duration::from_secs(15),
        worker.process_job(&job.id, CancellationToken::new()),
    )
    .await
    .expect("watchdog should stop the render")
    .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.message.as_deref().unwrap().contains("time limit"));
}

#[tokio::test]
async fn test_duplicate_dispatch_is_rejected() {
    let sandbox = Sandbox::new("duplicate");
    let settings = sandbox.settings("exec sleep 30");
    let (worker, store, job) = setup(&sandbox, settings, json!([]));

    let cancel = CancellationToken::new();
    let first = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        let id = job.id.clone();
        tokio::spawn(async move { worker.process_job(&id, cancel).await })
    };

    for _ in 0..250 {
        let status = store.get(&job.id).unwrap().unwrap().status;
        if status == JobStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        store.get(&job.id).unwrap().unwrap().status,
        JobStatus::Processing
    );

    let writes_before = store.writes().len();
    let second = worker.process_job(&job.id, CancellationToken::new()).await;
    assert!(matches!(
        second,
        Err(ButtercutError::AlreadyProcessing { .. })
    ));
    assert_eq!(store.writes().len(), writes_before);

    cancel.cancel();
    let finished = first.await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Cancelled);

    // A finished job cannot be dispatched again.
    let again = worker.process_job(&job.id, CancellationToken::new()).await;
    assert!(matches!(
        again,
        Err(ButtercutError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_panic_during_render_fails_job() {
    let sandbox = Sandbox::new("panic");
    let settings = sandbox.settings(
        "for last; do :; done\necho out_time=00:00:05.000000\nprintf 'x' > \"$last\"\necho progress=end",
    );
    let store = RecordingStore {
        panic_on_progress: true,
        ..RecordingStore::default()
    };
    let (worker, store, job) = setup_with_store(&sandbox, settings, json!([]), store);

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished
        .message
        .as_deref()
        .unwrap()
        .contains("progress write exploded"));
    assert_eq!(store.get(&job.id).unwrap().unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_unreadable_overlay_source_fails_before_encoding() {
    let sandbox = Sandbox::new("bad_source");
    let marker = sandbox.root.join("encoder-ran");
    let settings = sandbox.settings(&format!("touch \"{}\"\nexit 0", marker.display()));
    let overlays = json!([{ "type": "video", "source": "missing.mp4" }]);
    let (worker, _, job) = setup(&sandbox, settings, overlays);

    let finished = worker
        .process_job(&job.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.message.as_deref().unwrap().contains("not readable"));
    assert!(!marker.exists());
}
