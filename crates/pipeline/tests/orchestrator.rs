//! End-to-end runs of the orchestrator against an in-process engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use texture_comfyui::workflow::{NodeSlotMapping, WorkflowBuilder, WorkflowInstance, WorkflowTemplate};
use texture_comfyui::{Engine, EngineError, JobHandle};
use texture_core::error::ErrorKind;
use texture_core::poses::PoseCatalog;
use texture_pipeline::{
    FailurePolicy, MemoryAssetStore, OrchestratorSettings, PipelineError, PoseOrchestrator, SkipReason,
};

/// How the stub engine should treat jobs for one reference file.
#[derive(Debug, Clone, Copy)]
enum Fault {
    Upload,
    Timeout,
    Execution,
    Cancelled,
    /// Never finishes on its own.
    Hang,
}

/// Deterministic engine: the output of a job is derived from the
/// reference image and prompt it was submitted with.
#[derive(Default)]
struct StubEngine {
    faults: HashMap<String, Fault>,
    uploads: Mutex<HashMap<String, u32>>,
    jobs: Mutex<HashMap<String, (String, String)>>,
    cancelled: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl StubEngine {
    fn with_fault(mut self, filename: &str, fault: Fault) -> Self {
        self.faults.insert(filename.to_string(), fault);
        self
    }

    fn uploads_of(&self, filename: &str) -> u32 {
        self.uploads.lock().unwrap().get(filename).copied().unwrap_or(0)
    }

    fn fault_for(&self, job: &JobHandle) -> Option<Fault> {
        let jobs = self.jobs.lock().unwrap();
        let (image, _) = jobs.get(&job.job_id)?;
        let filename = image.strip_prefix("stored/")?;
        self.faults.get(filename).copied()
    }
}

#[async_trait]
impl Engine for StubEngine {
    async fn upload_image(&self, _bytes: Vec<u8>, filename: &str) -> Result<String, EngineError> {
        *self.uploads.lock().unwrap().entry(filename.to_string()).or_default() += 1;
        if let Some(Fault::Upload) = self.faults.get(filename) {
            return Err(EngineError::Connectivity {
                operation: "upload",
                detail: "connection refused".into(),
                request_sent: false,
            });
        }
        Ok(format!("stored/{filename}"))
    }

    async fn submit(&self, workflow: WorkflowInstance) -> Result<JobHandle, EngineError> {
        let image = workflow.node("10").unwrap()["inputs"]["image"].as_str().unwrap().to_string();
        let prompt = workflow.node("7").unwrap()["inputs"]["text"].as_str().unwrap().to_string();

        let mut jobs = self.jobs.lock().unwrap();
        let job = JobHandle::new(format!("job-{}", jobs.len() + 1));
        jobs.insert(job.job_id.clone(), (image, prompt));
        Ok(job)
    }

    async fn wait_for_completion(&self, job: &JobHandle, timeout: Duration) -> Result<(), EngineError> {
        match self.fault_for(job) {
            Some(Fault::Timeout) => Err(EngineError::Timeout {
                job_id: job.job_id.clone(),
                waited: timeout,
                detail: String::new(),
            }),
            Some(Fault::Execution) => Err(EngineError::JobFailed {
                job_id: job.job_id.clone(),
                detail: "node 10: CUDA out of memory".into(),
            }),
            Some(Fault::Cancelled) => Err(EngineError::Cancelled),
            Some(Fault::Hang) => std::future::pending().await,
            _ => Ok(()),
        }
    }

    async fn fetch_output(&self, job: &JobHandle, prefix: &str) -> Result<Vec<u8>, EngineError> {
        let jobs = self.jobs.lock().unwrap();
        let (image, prompt) = &jobs[&job.job_id];
        Ok(format!("{prefix}|{image}|{prompt}").into_bytes())
    }

    async fn release(&self, job: &JobHandle) {
        self.released.lock().unwrap().push(job.job_id.clone());
    }

    async fn cancel(&self, job: &JobHandle) -> Result<(), EngineError> {
        self.release(job).await;
        self.cancelled.lock().unwrap().push(job.job_id.clone());
        Ok(())
    }
}

fn builder() -> WorkflowBuilder {
    let template = WorkflowTemplate::from_value(json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 7}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
        "9": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
        "10": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
    }))
    .unwrap();
    WorkflowBuilder::new(Arc::new(template), NodeSlotMapping::default()).unwrap()
}

/// Initial pose plus two of the three default poses; `pose7.jpg` is absent.
fn assets() -> MemoryAssetStore {
    MemoryAssetStore::new()
        .with_file("pose1.jpg", b"p1".to_vec())
        .with_file("pose2.jpg", b"p2".to_vec())
        .with_file("pose8.jpg", b"p8".to_vec())
}

fn settings(policy: FailurePolicy) -> OrchestratorSettings {
    OrchestratorSettings {
        initial_pose: "pose1.jpg".into(),
        output_prefix: "no_bg".into(),
        job_timeout: Duration::from_secs(5),
        cancel_on_timeout: true,
        failure_policy: policy,
    }
}

fn orchestrator(
    engine: StubEngine,
    assets: MemoryAssetStore,
    policy: FailurePolicy,
) -> (Arc<StubEngine>, PoseOrchestrator<StubEngine, MemoryAssetStore>) {
    let engine = Arc::new(engine);
    let orchestrator = PoseOrchestrator::new(
        engine.clone(),
        Arc::new(assets),
        builder(),
        Arc::new(PoseCatalog::default()),
        settings(policy),
    );
    (engine, orchestrator)
}

fn text(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap()
}

#[tokio::test]
async fn generates_initial_and_available_poses() {
    let (_, orchestrator) = orchestrator(StubEngine::default(), assets(), FailurePolicy::default());

    let report = orchestrator.run("a knight in silver armor").await.unwrap();

    let labels: Vec<_> = report.results.labels().collect();
    assert_eq!(labels, vec!["initial_pose", "thinking", "yay"]);
    assert!(report.errors.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].label, "wrong");
    assert_eq!(report.skipped[0].reason, SkipReason::AssetMissing);

    let yay = text(report.results.get("yay").unwrap());
    assert!(yay.starts_with("no_bg|stored/pose8.jpg|a knight in silver armor,(looking at camera:1.3)"));
}

#[tokio::test]
async fn full_catalog_run_is_complete() {
    let catalog = PoseCatalog::new([("pose2.jpg", "thinking"), ("pose8.jpg", "yay")]).unwrap();
    let orchestrator = PoseOrchestrator::new(
        Arc::new(StubEngine::default()),
        Arc::new(assets()),
        builder(),
        Arc::new(catalog),
        settings(FailurePolicy::default()),
    );

    let report = orchestrator.run("a knight").await.unwrap();

    let labels: HashSet<_> = report.results.labels().collect();
    assert_eq!(labels, HashSet::from(["initial_pose", "thinking", "yay"]));
    assert!(report.is_complete());
}

#[tokio::test]
async fn upload_failure_is_attributed_under_skip_policy() {
    let engine = StubEngine::default().with_fault("pose8.jpg", Fault::Upload);
    let (_, orchestrator) = orchestrator(engine, assets(), FailurePolicy::SkipAndContinue);

    let report = orchestrator.run("a knight").await.unwrap();

    assert!(report.results.contains("initial_pose"));
    assert!(report.results.contains("thinking"));
    assert!(!report.results.contains("yay"));
    assert_eq!(report.errors.len(), 1);

    let error = report.error_for("yay").unwrap();
    assert_eq!(error.kind, ErrorKind::Connectivity);
    assert!(error.job_id.is_none());
}

#[tokio::test]
async fn upload_failure_on_last_pose_under_abort_policy() {
    let engine = StubEngine::default().with_fault("pose8.jpg", Fault::Upload);
    let (_, orchestrator) = orchestrator(engine, assets(), FailurePolicy::AbortRemaining);

    let report = orchestrator.run("a knight").await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.error_for("yay").unwrap().kind, ErrorKind::Connectivity);
    // Nothing left to abort after the last pose; only the missing asset is skipped.
    assert_eq!(report.skipped.len(), 1);
}

#[tokio::test]
async fn abort_policy_skips_labels_after_failure() {
    let engine = StubEngine::default().with_fault("pose1.jpg", Fault::Execution);
    let (_, orchestrator) = orchestrator(engine, assets(), FailurePolicy::AbortRemaining);

    let report = orchestrator.run("a knight").await.unwrap();

    assert!(report.results.is_empty());
    let error = report.error_for("initial_pose").unwrap();
    assert_eq!(error.kind, ErrorKind::EngineRejected);
    assert_eq!(error.job_id.as_deref(), Some("job-1"));

    let aborted: Vec<_> = report
        .skipped
        .iter()
        .filter(|s| s.reason == SkipReason::Aborted)
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(aborted, vec!["thinking", "yay"]);
}

#[tokio::test]
async fn skip_policy_continues_after_execution_failure() {
    let engine = StubEngine::default().with_fault("pose2.jpg", Fault::Execution);
    let (_, orchestrator) = orchestrator(engine, assets(), FailurePolicy::SkipAndContinue);

    let report = orchestrator.run("a knight").await.unwrap();

    let labels: Vec<_> = report.results.labels().collect();
    assert_eq!(labels, vec!["initial_pose", "yay"]);
    assert_eq!(report.error_for("thinking").unwrap().kind, ErrorKind::EngineRejected);
}

#[tokio::test]
async fn repeated_runs_return_identical_results() {
    let (_, orchestrator) = orchestrator(StubEngine::default(), assets(), FailurePolicy::default());

    let first = orchestrator.run("a knight").await.unwrap();
    let second = orchestrator.run("a knight").await.unwrap();

    assert_eq!(first.results, second.results);
}

#[tokio::test]
async fn repeated_failing_runs_report_identical_shapes() {
    for policy in [FailurePolicy::AbortRemaining, FailurePolicy::SkipAndContinue] {
        let engine = StubEngine::default().with_fault("pose8.jpg", Fault::Upload);
        let (_, orchestrator) = orchestrator(engine, assets(), policy);

        let first = orchestrator.run("a knight").await.unwrap();
        let second = orchestrator.run("a knight").await.unwrap();

        let shape = |report: &texture_pipeline::GenerationReport| {
            let errors: Vec<_> = report.errors.iter().map(|e| (e.label.clone(), e.kind)).collect();
            let skipped: Vec<_> = report.skipped.iter().map(|s| (s.label.clone(), s.reason)).collect();
            let labels: Vec<_> = report.results.labels().map(str::to_string).collect();
            (labels, errors, skipped)
        };
        assert_eq!(shape(&first), shape(&second), "policy {policy}");
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.results, second.results);
    }
}

#[tokio::test]
async fn shared_reference_file_is_uploaded_once() {
    let catalog = PoseCatalog::new([("pose1.jpg", "neutral"), ("pose8.jpg", "yay")]).unwrap();
    let engine = Arc::new(StubEngine::default());
    let orchestrator = PoseOrchestrator::new(
        engine.clone(),
        Arc::new(assets()),
        builder(),
        Arc::new(catalog),
        settings(FailurePolicy::default()),
    );

    let report = orchestrator.run("a knight").await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results.get("initial_pose"), report.results.get("neutral"));
    assert_eq!(engine.uploads_of("pose1.jpg"), 1);
    assert_eq!(engine.uploads_of("pose8.jpg"), 1);
}

#[tokio::test]
async fn blank_prompt_is_rejected_before_any_upload() {
    let (engine, orchestrator) = orchestrator(StubEngine::default(), assets(), FailurePolicy::default());

    let result = orchestrator.run("   ").await;

    assert_matches!(result, Err(PipelineError::Validation(_)));
    assert!(engine.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn timeout_cancels_job_in_engine() {
    let engine = StubEngine::default().with_fault("pose2.jpg", Fault::Timeout);
    let (engine, orchestrator) = orchestrator(engine, assets(), FailurePolicy::SkipAndContinue);

    let report = orchestrator.run("a knight").await.unwrap();

    let error = report.error_for("thinking").unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.job_id.as_deref(), Some("job-2"));
    assert_eq!(*engine.cancelled.lock().unwrap(), vec!["job-2".to_string()]);
    assert!(report.results.contains("yay"));
}

#[tokio::test]
async fn timeout_leaves_job_when_cancel_disabled() {
    let engine = Arc::new(StubEngine::default().with_fault("pose2.jpg", Fault::Timeout));
    let orchestrator = PoseOrchestrator::new(
        engine.clone(),
        Arc::new(assets()),
        builder(),
        Arc::new(PoseCatalog::default()),
        OrchestratorSettings {
            cancel_on_timeout: false,
            ..settings(FailurePolicy::default())
        },
    );

    let report = orchestrator.run("a knight").await.unwrap();

    assert_eq!(report.error_for("thinking").unwrap().kind, ErrorKind::Timeout);
    assert!(engine.cancelled.lock().unwrap().is_empty());
    assert_eq!(*engine.released.lock().unwrap(), vec!["job-2".to_string()]);
}

#[tokio::test]
async fn caller_cancel_mid_wait_releases_job_without_engine_cancel() {
    let engine = Arc::new(StubEngine::default().with_fault("pose2.jpg", Fault::Hang));
    let orchestrator = PoseOrchestrator::new(
        engine.clone(),
        Arc::new(assets()),
        builder(),
        Arc::new(PoseCatalog::default()),
        OrchestratorSettings {
            cancel_on_timeout: false,
            ..settings(FailurePolicy::default())
        },
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orchestrator.run_with_cancel("a knight", &cancel).await.unwrap();

    assert!(report.results.contains("initial_pose"));
    let error = report.error_for("thinking").unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.job_id.as_deref(), Some("job-2"));
    assert!(engine.cancelled.lock().unwrap().is_empty());
    assert_eq!(*engine.released.lock().unwrap(), vec!["job-2".to_string()]);
}

#[tokio::test]
async fn missing_initial_pose_is_a_configuration_error() {
    let assets = MemoryAssetStore::new().with_file("pose2.jpg", b"p2".to_vec());
    let (engine, orchestrator) = orchestrator(StubEngine::default(), assets, FailurePolicy::default());

    let report = orchestrator.run("a knight").await.unwrap();

    assert_eq!(report.error_for("initial_pose").unwrap().kind, ErrorKind::Configuration);
    assert!(report.results.contains("thinking"));
    assert_eq!(engine.uploads_of("pose1.jpg"), 0);
}

#[tokio::test]
async fn cancelled_run_skips_every_stage() {
    let (engine, orchestrator) = orchestrator(StubEngine::default(), assets(), FailurePolicy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator.run_with_cancel("a knight", &cancel).await.unwrap();

    assert!(report.results.is_empty());
    assert!(report.errors.is_empty());
    let cancelled: HashSet<_> = report
        .skipped
        .iter()
        .filter(|s| s.reason == SkipReason::Cancelled)
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(cancelled, HashSet::from(["initial_pose", "thinking", "yay"]));
    assert!(engine.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn engine_cancellation_stops_run_regardless_of_policy() {
    let engine = StubEngine::default().with_fault("pose2.jpg", Fault::Cancelled);
    let (engine, orchestrator) = orchestrator(engine, assets(), FailurePolicy::SkipAndContinue);

    let report = orchestrator.run("a knight").await.unwrap();

    assert!(report.results.contains("initial_pose"));
    assert_eq!(report.error_for("thinking").unwrap().kind, ErrorKind::Cancelled);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.label == "yay" && s.reason == SkipReason::Cancelled));
    assert_eq!(*engine.cancelled.lock().unwrap(), vec!["job-2".to_string()]);
}

#[tokio::test]
async fn every_label_is_accounted_for_once() {
    let engine = StubEngine::default().with_fault("pose2.jpg", Fault::Timeout);
    let (_, orchestrator) = orchestrator(engine, assets(), FailurePolicy::AbortRemaining);

    let report = orchestrator.run("a knight").await.unwrap();

    let mut seen: Vec<&str> = report.results.labels().collect();
    seen.extend(report.errors.iter().map(|e| e.label.as_str()));
    seen.extend(report.skipped.iter().map(|s| s.label.as_str()));
    seen.sort_unstable();
    assert_eq!(seen, vec!["initial_pose", "thinking", "wrong", "yay"]);
}
