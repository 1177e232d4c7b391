#![cfg(unix)]

use std::collections::{HashMap, VecDeque};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use clusterd::Result;
use clusterd::config::RunnerConfig;
use clusterd::domain::{CaptureParams, Job, ReportKind, StatusReport};
use clusterd::runner::{CoordinatorClient, ExecutionEngine, ReportPolicy, ReportQueue};

/// Writes a one-segment recording, then records until stdin closes.
const RECORDING_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
dir=$(dirname "$last")
printf 'INIT' > "$dir/init.mp4"
printf 'aaaaaaaaaa' > "$dir/0.m4s"
printf '#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:2\n#EXT-X-MAP:URI="init.mp4"\n#EXTINF:2.000,\n0.m4s\n' > "$last"
echo "fake recorder running" >&2
cat > /dev/null
exit 0
"#;

const FAILING_FFMPEG: &str = "#!/bin/sh\necho 'connection refused' >&2\nexit 3\n";

#[derive(Default)]
struct FakeCoordinator {
    jobs: Mutex<HashMap<i64, Job>>,
    reports: Mutex<Vec<StatusReport>>,
    /// Handed out by successive lease requests.
    queued: Mutex<VecDeque<Job>>,
    lease_failures: Mutex<u32>,
    /// Time of each lease request and whether it granted a job.
    lease_calls: Mutex<Vec<(Instant, bool)>>,
}

impl FakeCoordinator {
    fn archive_without_exit_code(&self, job_id: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).unwrap();
        job.end_time = Some(Utc::now());
        job.exit_code = None;
    }

    fn kinds(&self) -> Vec<ReportKind> {
        self.reports.lock().unwrap().iter().map(|r| r.kind).collect()
    }
}

#[async_trait]
impl CoordinatorClient for FakeCoordinator {
    async fn acquire_job(&self, _runner: &str) -> Result<Option<Job>> {
        {
            let mut failures = self.lease_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                self.lease_calls.lock().unwrap().push((Instant::now(), false));
                return Err(std::io::Error::other("coordinator unreachable").into());
            }
        }
        let job = self.queued.lock().unwrap().pop_front();
        self.lease_calls
            .lock()
            .unwrap()
            .push((Instant::now(), job.is_some()));
        Ok(job)
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn report(&self, report: &StatusReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    fake: Arc<FakeCoordinator>,
    engine: Arc<ExecutionEngine>,
}

fn install_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg.sh");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn harness(script: &str) -> Harness {
    harness_with(script, |_| {})
}

fn harness_with(script: &str, tune: impl FnOnce(&mut RunnerConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg_path = install_script(dir.path(), script);
    let fake = Arc::new(FakeCoordinator::default());

    let (reports, _drain) = ReportQueue::spawn(
        fake.clone(),
        ReportPolicy {
            max_attempts: 2,
            retry_delay: Duration::from_millis(10),
        },
        CancellationToken::new(),
        Span::none(),
    );
    let mut config = RunnerConfig {
        name: "test-runner".to_string(),
        work_dir: dir.path().join("media"),
        ffmpeg_path,
        watch_interval: Duration::from_millis(50),
        stop_grace: Duration::from_secs(2),
        ..RunnerConfig::default()
    };
    tune(&mut config);
    let engine = Arc::new(ExecutionEngine::new(fake.clone(), reports, config, Span::none()));

    Harness { dir, fake, engine }
}

fn leased_job(fake: &FakeCoordinator, id: i64, category: &str, params: &CaptureParams) -> Job {
    let job = Job {
        id,
        ref_id: "1".to_string(),
        category: category.to_string(),
        metadata: serde_json::to_string(params).unwrap(),
        runner: Some("test-runner".to_string()),
        exit_code: None,
        create_time: Utc::now(),
        schedule_time: None,
        start_time: Some(Utc::now()),
        end_time: None,
        last_seen_time: None,
    };
    fake.jobs.lock().unwrap().insert(id, job.clone());
    job
}

#[tokio::test]
async fn reaching_end_time_is_a_normal_end() {
    let h = harness(RECORDING_FFMPEG);
    let mut params = CaptureParams::single("rtmp://origin/live/s");
    params.end_time = Some(Utc::now() + chrono::Duration::milliseconds(800));
    let job = leased_job(&h.fake, 1, "capture", &params);

    let terminal = h.engine.run_job(job, &CancellationToken::new()).await;

    assert_eq!(terminal.kind, ReportKind::End);
    assert_eq!(terminal.exit_code, Some(0));
    assert_eq!(terminal.size, 14);
    assert_eq!(terminal.duration_ms, 2000);
    assert!(terminal.stderr.is_empty());
    assert_eq!(h.fake.kinds(), vec![ReportKind::Start, ReportKind::End]);
    assert!(h.dir.path().join("media/1/ffmpeg.stderr.log").exists());
}

#[tokio::test]
async fn external_archival_cancels_the_capture() {
    let h = harness(RECORDING_FFMPEG);
    let job = leased_job(&h.fake, 2, "capture", &CaptureParams::single("rtmp://origin/live/s"));

    let engine = h.engine.clone();
    let run = tokio::spawn(async move { engine.run_job(job, &CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.fake.archive_without_exit_code(2);

    // One watch interval to notice, then the graceful stop.
    let bound = Duration::from_millis(50) + Duration::from_secs(2);
    let terminal = tokio::time::timeout(bound, run)
        .await
        .expect("capture should stop within one watch interval plus the stop grace")
        .unwrap();

    assert_eq!(terminal.kind, ReportKind::Cancelled);
    assert_eq!(terminal.exit_code, None);
    assert!(terminal.stderr.contains("fake recorder running"));
    assert_eq!(h.fake.kinds(), vec![ReportKind::Start, ReportKind::Cancelled]);
}

#[tokio::test]
async fn failing_process_reports_exception_with_log_tail() {
    let h = harness(FAILING_FFMPEG);
    let job = leased_job(&h.fake, 3, "capture", &CaptureParams::single("rtmp://origin/live/s"));

    let terminal = h.engine.run_job(job, &CancellationToken::new()).await;

    assert_eq!(terminal.kind, ReportKind::Exception);
    assert_eq!(terminal.exit_code, Some(3));
    assert!(terminal.stderr.contains("connection refused"));
    assert_eq!(h.fake.kinds(), vec![ReportKind::Start, ReportKind::Exception]);
}

#[tokio::test]
async fn unsupported_category_fails_without_start() {
    let h = harness(RECORDING_FFMPEG);
    let job = leased_job(&h.fake, 4, "transcode", &CaptureParams::single("rtmp://x"));

    let terminal = h.engine.run_job(job, &CancellationToken::new()).await;

    assert_eq!(terminal.kind, ReportKind::Exception);
    assert_eq!(terminal.exit_code, Some(-1));
    assert!(terminal.stderr.contains("transcode"));
    assert_eq!(h.fake.kinds(), vec![ReportKind::Exception]);
}

#[tokio::test]
async fn cancellation_interrupts_deferred_start() {
    let h = harness(RECORDING_FFMPEG);
    let mut params = CaptureParams::single("rtmp://origin/live/s");
    params.start_time = Some(Utc::now() + chrono::Duration::hours(1));
    let job = leased_job(&h.fake, 5, "capture", &params);

    let engine = h.engine.clone();
    let run = tokio::spawn(async move { engine.run_job(job, &CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.fake.archive_without_exit_code(5);

    let terminal = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terminal.kind, ReportKind::Cancelled);
    assert!(!h.dir.path().join("media/5/index.m3u8").exists());
}

#[tokio::test]
async fn shutdown_is_reported_as_exception() {
    let h = harness(RECORDING_FFMPEG);
    let job = leased_job(&h.fake, 6, "capture", &CaptureParams::single("rtmp://origin/live/s"));

    let shutdown = CancellationToken::new();
    let engine = h.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run_job(job, &token).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.cancel();

    let terminal = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terminal.kind, ReportKind::Exception);
    assert_eq!(terminal.exit_code, Some(-1));
}

#[tokio::test]
async fn artifacts_are_reported_between_start_and_end() {
    let h = harness(RECORDING_FFMPEG);
    let mut params = CaptureParams::single("rtmp://origin/live/s");
    params.artifact_interval_secs = 1;
    params.end_time = Some(Utc::now() + chrono::Duration::milliseconds(1600));
    let job = leased_job(&h.fake, 7, "capture", &params);

    let terminal = h.engine.run_job(job, &CancellationToken::new()).await;
    assert_eq!(terminal.kind, ReportKind::End);

    let reports = h.fake.reports.lock().unwrap().clone();
    let kinds: Vec<_> = reports.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ReportKind::Start, ReportKind::Artifact, ReportKind::End]);
    assert_eq!(reports[1].filename.as_deref(), Some("1.mp4"));
    assert_eq!(reports[1].size, 14);
    assert!(h.dir.path().join("media/7/1.m3u8").exists());
}

#[tokio::test]
async fn poll_loop_runs_leased_jobs_and_stops_on_shutdown() {
    let poll_interval = Duration::from_millis(50);
    let h = harness_with(RECORDING_FFMPEG, |config| {
        config.poll_interval = poll_interval;
        config.idle_warn_polls = 2;
    });
    let mut params = CaptureParams::single("rtmp://origin/live/s");
    params.end_time = Some(Utc::now() + chrono::Duration::milliseconds(500));
    let job = leased_job(&h.fake, 8, "capture", &params);
    *h.fake.lease_failures.lock().unwrap() = 1;
    h.fake.queued.lock().unwrap().push_back(job);

    let shutdown = CancellationToken::new();
    let engine = h.engine.clone();
    let token = shutdown.clone();
    let run = tokio::spawn(async move { engine.run(token).await });

    // A failed lease is retried on the next poll, which hands out the job.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !h.fake.kinds().contains(&ReportKind::End) {
        assert!(Instant::now() < deadline, "job was never run from the poll loop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.fake.kinds(), vec![ReportKind::Start, ReportKind::End]);

    // Idle past the warning threshold; polling continues at the interval.
    tokio::time::sleep(poll_interval * 6).await;
    shutdown.cancel();
    tokio::time::timeout(poll_interval * 4, run)
        .await
        .expect("poll loop should stop promptly on shutdown")
        .unwrap();

    let calls = h.fake.lease_calls.lock().unwrap().clone();
    assert!(!calls[0].1, "first lease request should have failed");
    assert!(calls[1].1, "second lease request should grant the job");
    assert!(calls.len() >= 5, "only {} lease requests", calls.len());
    for pair in calls.windows(2).filter(|pair| !pair[0].1) {
        let gap = pair[1].0 - pair[0].0;
        assert!(gap >= poll_interval, "polls {gap:?} apart");
    }
}
