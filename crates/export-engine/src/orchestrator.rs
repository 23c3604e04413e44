//! Export orchestrator.
//!
//! Sequences one export: validate, profile, plan, proxy oversized sources,
//! render, combine. Exactly one export runs at a time; the active slot and
//! the session's temporary files are released on every exit path.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use framecast_common::config::{AppConfig, ExportPolicy};
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_job_model::chunk::ChunkPlan;
use framecast_job_model::job::{Clip, ExportJob};
use framecast_job_model::progress::{ExportResult, ExportStage};
use framecast_job_model::worker_config::{CodecSettings, CompositionMeta, ExportJobConfig, InputProps};

use crate::allocator::{chunk_timeout_ms, get_export_strategy, is_decode_heavy, throttle_for_zoom, ExportStrategy, StrategyInput};
use crate::chunk_plan::{build_chunk_plan, calculate_stable_chunk_size};
use crate::combiner::ChunkCombiner;
use crate::coordinator::{export_result_from, RenderedOutput, WorkerCoordinator};
use crate::hardware::detect_hardware_encoder;
use crate::probe::{FfprobeProber, MediaProber};
use crate::profiler::{export_memory_constraints, profile_system, MachineProfile, MemoryConstraints};
use crate::proxy::{fit_dimensions, ProxyKind, ProxyOptions, ProxyOverrides, ProxyService};
use crate::session::{CancelToken, ExportSession};
use crate::tracker::{ProgressCallback, ProgressTracker};
use crate::transcoder::{FfmpegTranscoder, Transcoder};
use crate::worker::ProcessSpawner;

/// Source of the machine profile for an export.
#[async_trait]
pub trait Profiler: Send + Sync {
    async fn profile(&self, width: u32, height: u32) -> MachineProfile;
}

/// Profiles the host this process runs on.
pub struct SystemProfiler {
    ffmpeg: PathBuf,
}

impl SystemProfiler {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }
}

#[async_trait]
impl Profiler for SystemProfiler {
    async fn profile(&self, width: u32, height: u32) -> MachineProfile {
        profile_system(width, height, &self.ffmpeg).await
    }
}

/// Caller overrides of the allocator's decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOverrides {
    /// Worker count to use when parallel rendering is allowed.
    pub workers: Option<u32>,
    /// Always render with a single worker.
    pub sequential: bool,
}

/// Everything decided before rendering starts.
#[derive(Debug, Clone, Serialize)]
pub struct ExportPlan {
    pub profile: MachineProfile,
    pub constraints: MemoryConstraints,
    pub chunk_plan: ChunkPlan,
    pub strategy: ExportStrategy,
    /// Why rendering is sequential, when it is.
    pub sequential_reasons: Vec<&'static str>,
}

/// Decide how a job will be rendered on a machine. Pure.
pub fn plan_export(
    job: &ExportJob,
    profile: &MachineProfile,
    policy: &ExportPolicy,
    overrides: ExportOverrides,
) -> FramecastResult<ExportPlan> {
    let constraints = export_memory_constraints(profile, policy);
    let total_frames = job.total_frames();
    let duration_secs = job.duration_secs();
    let fps = job.output.fps;
    let megapixels = job.megapixels();

    let chunk_size = calculate_stable_chunk_size(total_frames, duration_secs, policy);
    let mut chunk_plan = build_chunk_plan(total_frames, chunk_size, fps);
    chunk_plan.check_coverage().map_err(FramecastError::config)?;

    let mut sequential_reasons = Vec::new();
    let high_fps = fps as f64 >= policy.high_fps_threshold;
    if constraints.force_sequential(duration_secs, megapixels, high_fps) {
        sequential_reasons.push("memory pressure");
    }
    if is_decode_heavy(&job.clips, policy) {
        sequential_reasons.push("decode-heavy sources");
    }
    if !job.output.format.supports_concat() {
        sequential_reasons.push("output format cannot be concatenated");
    }
    if overrides.sequential {
        sequential_reasons.push("requested");
    }

    let input = StrategyInput {
        chunk_count: chunk_plan.len(),
        total_frames,
        fps,
        effective_memory_gb: constraints.effective_memory_gb,
        megapixels,
        force_sequential: !sequential_reasons.is_empty(),
    };
    let mut strategy = get_export_strategy(profile, &input, policy);
    strategy = throttle_for_zoom(strategy, job.max_zoom_scale(), policy);

    if let (Some(workers), true) = (overrides.workers, strategy.use_parallel) {
        let limit = (chunk_plan.len() as u32).min(policy.max_workers.max(1));
        strategy.worker_count = workers.clamp(1, limit);
        strategy.use_parallel = strategy.worker_count >= 2;
    }

    if !strategy.use_parallel {
        chunk_plan = chunk_plan.collapsed();
        strategy.worker_count = 1;
        strategy.timeout_ms = chunk_timeout_ms(total_frames, megapixels, policy);
    }
    strategy.concurrency = (profile.cpu_cores / strategy.worker_count.max(1))
        .clamp(1, policy.max_concurrency.max(1));

    Ok(ExportPlan {
        profile: *profile,
        constraints,
        chunk_plan,
        strategy,
        sequential_reasons,
    })
}

pub struct ExportOrchestrator {
    config: AppConfig,
    profiler: Arc<dyn Profiler>,
    proxies: Arc<ProxyService>,
    prober: Arc<dyn MediaProber>,
    coordinator: WorkerCoordinator,
    overrides: ExportOverrides,
    active: Mutex<Option<CancelToken>>,
}

impl ExportOrchestrator {
    /// Build an orchestrator backed by ffmpeg, ffprobe and renderer processes.
    pub async fn from_config(config: AppConfig) -> FramecastResult<Self> {
        let grace = Duration::from_millis(config.policy.kill_grace_ms);
        let hardware_encoder = detect_hardware_encoder(&config.tools.ffmpeg).await;
        let ffmpeg = FfmpegTranscoder::new(&config.tools.ffmpeg, grace);
        if !ffmpeg.is_available() {
            return Err(FramecastError::config(format!(
                "transcoder not found: {}",
                ffmpeg.binary().display()
            )));
        }
        let transcoder: Arc<dyn Transcoder> = Arc::new(ffmpeg);
        let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(&config.tools.ffprobe));

        let program = match &config.renderer.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
        let spawner = ProcessSpawner::new(program, config.renderer.args.clone()).with_env("RUST_LOG", log_level);

        let proxies = Arc::new(ProxyService::new(
            config.proxy_cache_dir.clone(),
            Arc::clone(&transcoder),
            Arc::clone(&prober),
            hardware_encoder,
        ));
        let coordinator = WorkerCoordinator::new(
            Arc::new(spawner),
            ChunkCombiner::new(transcoder, config.policy.min_combined_ratio),
            grace,
        );
        let profiler = Arc::new(SystemProfiler::new(config.tools.ffmpeg.clone()));

        Ok(Self::with_components(config, profiler, proxies, prober, coordinator))
    }

    pub fn with_components(
        config: AppConfig,
        profiler: Arc<dyn Profiler>,
        proxies: Arc<ProxyService>,
        prober: Arc<dyn MediaProber>,
        coordinator: WorkerCoordinator,
    ) -> Self {
        Self {
            config,
            profiler,
            proxies,
            prober,
            coordinator,
            overrides: ExportOverrides::default(),
            active: Mutex::new(None),
        }
    }

    pub fn with_overrides(mut self, overrides: ExportOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn proxies(&self) -> &Arc<ProxyService> {
        &self.proxies
    }

    /// Profile this machine and plan `job` without rendering.
    pub async fn plan(&self, job: &ExportJob) -> FramecastResult<ExportPlan> {
        job.validate().map_err(|e| FramecastError::config(e.to_string()))?;
        let profile = self.profiler.profile(job.output.width, job.output.height).await;
        plan_export(job, &profile, &self.config.policy, self.overrides)
    }

    pub fn is_export_in_progress(&self) -> bool {
        self.active.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Cancel the running export. No-op when none is running.
    pub fn cancel_export(&self) {
        let token = self.active.lock().ok().and_then(|slot| slot.clone());
        match token {
            Some(token) => {
                if token.cancel() {
                    tracing::info!("Export cancellation requested");
                }
            }
            None => tracing::debug!("Cancel requested with no export running"),
        }
    }

    /// Run one export to completion, failure, or cancellation.
    pub async fn export(&self, job: &ExportJob, on_progress: Option<ProgressCallback>) -> ExportResult {
        let session = ExportSession::new(&self.config.work_dir);
        let _active = match self.activate(&session) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "Export rejected");
                return export_result_from(Err(e));
            }
        };

        tracing::info!(session = session.id(), started_at = session.clock().epoch_wall(), job = %job.name, output = %job.output.path.display(), "Export started");
        let tracker = ProgressTracker::new(job.total_frames(), on_progress);
        let outcome = self.run(job, &session, &tracker).await;

        match &outcome {
            Ok(rendered) => {
                tracker.complete("Export complete");
                tracing::info!(
                    session = session.id(),
                    output = %rendered.output_path.display(),
                    bytes = rendered.file_size,
                    elapsed_secs = session.clock().elapsed_secs(),
                    "Export finished"
                );
            }
            Err(e) if e.is_cancelled() => tracing::info!(session = session.id(), "Export cancelled"),
            Err(e) => tracing::error!(session = session.id(), error = %e, "Export failed"),
        }
        export_result_from(outcome)
    }

    fn activate<'a>(&'a self, session: &'a ExportSession) -> FramecastResult<ActiveExport<'a>> {
        let mut slot = self
            .active
            .lock()
            .map_err(|_| FramecastError::render("export state lock poisoned"))?;
        if slot.is_some() {
            return Err(FramecastError::ExportInProgress);
        }
        *slot = Some(session.cancel_token().clone());
        Ok(ActiveExport {
            orchestrator: self,
            session,
        })
    }

    async fn run(
        &self,
        job: &ExportJob,
        session: &ExportSession,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        let cancel = session.cancel_token();

        tracker.on_stage(ExportStage::Preparing, 0.0, "Validating job");
        job.validate().map_err(|e| FramecastError::config(e.to_string()))?;
        let missing = job.validate_sources();
        if !missing.is_empty() {
            return Err(FramecastError::config(missing.join("; ")));
        }
        self.coordinator.preflight()?;

        tracker.on_stage(ExportStage::Preparing, 0.1, "Profiling machine");
        let profile = self.profiler.profile(job.output.width, job.output.height).await;
        let plan = plan_export(job, &profile, &self.config.policy, self.overrides)?;
        tracing::info!(
            chunks = plan.chunk_plan.len(),
            parallel = plan.strategy.use_parallel,
            workers = plan.strategy.worker_count,
            concurrency = plan.strategy.concurrency,
            timeout_ms = plan.strategy.timeout_ms,
            sequential_reasons = ?plan.sequential_reasons,
            "Export planned"
        );
        cancel.ensure_active()?;

        tracker.on_stage(ExportStage::Preparing, 0.2, "Preparing media");
        let clips = self.resolve_media(job, cancel, tracker).await?;
        cancel.ensure_active()?;

        session.prepare_work_dir()?;
        let config = ExportJobConfig {
            composition_id: job.name.clone(),
            composition: CompositionMeta::from_job(job),
            input_props: InputProps {
                clips,
                effects: job.effects.clone(),
            },
            codec: CodecSettings::from_job(job),
            concurrency: plan.strategy.concurrency,
            timeout_ms: plan.strategy.timeout_ms,
            video_cache_size_bytes: plan.constraints.video_cache_size_bytes,
            chunk_plan: plan.chunk_plan,
        };

        tracker.on_stage(ExportStage::Preparing, 1.0, "Starting render");
        if plan.strategy.use_parallel {
            self.coordinator
                .run_parallel_export(session, &config, plan.strategy.worker_count, &job.output.path, tracker)
                .await
        } else {
            self.coordinator
                .run_sequential_export(session, &config, &job.output.path, tracker)
                .await
        }
    }

    /// Swap oversized sources for export proxies. A failed proxy keeps the
    /// original media.
    async fn resolve_media(
        &self,
        job: &ExportJob,
        cancel: &CancelToken,
        tracker: &ProgressTracker,
    ) -> FramecastResult<Vec<Clip>> {
        let policy = &self.config.policy;
        let total = job.clips.len().max(1);
        let mut resolved = Vec::with_capacity(job.clips.len());

        for (position, clip) in job.clips.iter().enumerate() {
            cancel.ensure_active()?;
            let resolved_clip = self.resolve_clip(job, clip, policy, cancel).await;
            cancel.ensure_active()?;
            resolved.push(resolved_clip);

            let fraction = 0.2 + 0.7 * (position + 1) as f64 / total as f64;
            tracker.on_stage(
                ExportStage::Preparing,
                fraction,
                format!("Prepared media {}/{}", position + 1, job.clips.len()),
            );
        }
        Ok(resolved)
    }

    async fn resolve_clip(&self, job: &ExportJob, clip: &Clip, policy: &ExportPolicy, cancel: &CancelToken) -> Clip {
        let (source_width, source_height) = match (clip.source_width, clip.source_height) {
            (Some(w), Some(h)) => (w, h),
            _ => match self.prober.probe(&clip.source).await {
                Ok(info) => (info.width, info.height),
                Err(e) => {
                    tracing::warn!(clip = %clip.id, error = %e, "Could not probe source; using original");
                    return clip.clone();
                }
            },
        };

        let zoom = job.max_zoom_scale_for(&clip.id);
        let needed_width = (job.output.width as f64 * zoom).round() as u32;
        let needed_height = (job.output.height as f64 * zoom).round() as u32;
        if source_width as f64 <= needed_width as f64 * policy.proxy_width_factor {
            return clip.clone();
        }

        let target = (needed_width.min(source_width), needed_height.min(source_height));
        let options = ProxyOptions::new(ProxyKind::Export)
            .with_source_size(source_width, source_height)
            .with_overrides(ProxyOverrides {
                width: Some(target.0),
                height: Some(target.1),
                ..ProxyOverrides::default()
            });
        tracing::info!(
            clip = %clip.id,
            source_width,
            target_width = target.0,
            zoom,
            "Requesting export proxy"
        );

        let result = self.proxies.ensure_proxy(&clip.source, &options, cancel).await;
        match result.proxy_path {
            Some(path) if result.success => {
                let (width, height) = fit_dimensions((source_width, source_height), target);
                Clip {
                    source: path,
                    source_width: Some(width),
                    source_height: Some(height),
                    ..clip.clone()
                }
            }
            _ => {
                if !result.skipped {
                    tracing::warn!(clip = %clip.id, error = ?result.error, "Proxy unavailable; using original media");
                }
                clip.clone()
            }
        }
    }
}

/// Holds the single active-export slot. Dropping it releases the slot and
/// the session's temporary files.
struct ActiveExport<'a> {
    orchestrator: &'a ExportOrchestrator,
    session: &'a ExportSession,
}

impl Drop for ActiveExport<'_> {
    fn drop(&mut self) {
        self.orchestrator.coordinator.cleanup_export_resources(self.session);
        if let Ok(mut slot) = self.orchestrator.active.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBehavior, FakeProber, FakeSpawner, FakeTranscoder};
    use framecast_job_model::job::{Effect, OutputSettings};
    use std::path::Path;

    const GB: u64 = 1024 * 1024 * 1024;

    struct FixedProfiler(MachineProfile);

    #[async_trait]
    impl Profiler for FixedProfiler {
        async fn profile(&self, _width: u32, _height: u32) -> MachineProfile {
            self.0
        }
    }

    fn workstation() -> MachineProfile {
        MachineProfile::from_measurements(8, 32 * GB, None, 1920, 1080)
    }

    fn job(dir: &Path, source_size: (u32, u32), duration_secs: f64) -> ExportJob {
        let source = dir.join("source.mp4");
        std::fs::write(&source, vec![0u8; 4096]).unwrap();
        ExportJob {
            name: "demo".to_string(),
            clips: vec![Clip {
                id: "a".to_string(),
                source,
                timeline_start_secs: 0.0,
                source_in_secs: 0.0,
                duration_secs,
                source_width: Some(source_size.0),
                source_height: Some(source_size.1),
                source_fps: Some(30.0),
                has_audio: true,
            }],
            effects: vec![],
            output: OutputSettings {
                path: dir.join("out").join("demo.mp4"),
                width: 1920,
                height: 1080,
                fps: 30,
                format: Default::default(),
                quality: Default::default(),
                video_bitrate_kbps: 0,
                audio_bitrate_kbps: 192,
            },
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        spawner: Arc<FakeSpawner>,
        transcoder: Arc<FakeTranscoder>,
        orchestrator: ExportOrchestrator,
    }

    fn harness(behavior: FakeBehavior, transcoder_bytes: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            work_dir: dir.path().join("work"),
            proxy_cache_dir: dir.path().join("proxies"),
            ..AppConfig::default()
        };
        let spawner = Arc::new(FakeSpawner::new(behavior));
        let transcoder = Arc::new(FakeTranscoder::new(transcoder_bytes));
        let prober = Arc::new(FakeProber::new(1920, 1080));
        let proxies = Arc::new(ProxyService::new(
            config.proxy_cache_dir.clone(),
            transcoder.clone(),
            prober.clone(),
            None,
        ));
        let coordinator = WorkerCoordinator::new(
            spawner.clone(),
            ChunkCombiner::new(transcoder.clone(), config.policy.min_combined_ratio),
            Duration::from_millis(20),
        );
        let orchestrator = ExportOrchestrator::with_components(
            config,
            Arc::new(FixedProfiler(workstation())),
            proxies,
            prober,
            coordinator,
        );
        Harness {
            dir,
            spawner,
            transcoder,
            orchestrator,
        }
    }

    fn work_dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir.join("work"))
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[test]
    fn test_constrained_machine_renders_4k60_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), (3840, 2160), 300.0);
        job.output.width = 3840;
        job.output.height = 2160;
        job.output.fps = 60;
        let profile = MachineProfile::from_measurements(2, 8 * GB, None, 3840, 2160);

        let plan = plan_export(&job, &profile, &ExportPolicy::default(), ExportOverrides::default()).unwrap();
        assert!(!plan.strategy.use_parallel);
        assert_eq!(plan.strategy.worker_count, 1);
        assert!(plan.chunk_plan.is_single());
        assert_eq!(plan.chunk_plan.total_frames, 18_000);
    }

    #[test]
    fn test_workstation_renders_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), (1920, 1080), 40.0);
        let plan = plan_export(&job, &workstation(), &ExportPolicy::default(), ExportOverrides::default()).unwrap();
        assert!(plan.strategy.use_parallel);
        assert_eq!(plan.chunk_plan.len(), 4);
        assert!(plan.sequential_reasons.is_empty());

        let forced = plan_export(
            &job,
            &workstation(),
            &ExportPolicy::default(),
            ExportOverrides {
                sequential: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!forced.strategy.use_parallel);
        assert_eq!(forced.sequential_reasons, vec!["requested"]);
    }

    #[test]
    fn test_zoom_halves_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), (1920, 1080), 40.0);
        let plain = plan_export(&job, &workstation(), &ExportPolicy::default(), ExportOverrides::default()).unwrap();
        job.effects.push(Effect {
            kind: "zoom".to_string(),
            clip_id: None,
            params: serde_json::json!({ "scale": 2.5 }),
        });
        let zoomed = plan_export(&job, &workstation(), &ExportPolicy::default(), ExportOverrides::default()).unwrap();
        assert_eq!(zoomed.strategy.worker_count, (plain.strategy.worker_count / 2).max(1));
    }

    #[tokio::test]
    async fn test_parallel_export_completes_with_monotonic_progress() {
        let h = harness(FakeBehavior::Succeed, 3_000);
        let job = job(h.dir.path(), (1920, 1080), 40.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        let result = h.orchestrator.export(&job, Some(callback)).await;
        match &result {
            ExportResult::Completed { output_path, file_size } => {
                assert_eq!(output_path, &job.output.path);
                assert_eq!(*file_size, 3_000);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(h.spawner.spawned() >= 2);
        assert_eq!(h.transcoder.calls(), 1);
        assert!(!h.orchestrator.is_export_in_progress());
        assert!(work_dir_is_empty(h.dir.path()));

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[1].progress >= w[0].progress));
        let last = seen.last().unwrap();
        assert_eq!(last.stage, ExportStage::Complete);
        assert_eq!(last.progress, 100.0);
    }

    #[tokio::test]
    async fn test_oversized_source_is_proxied() {
        let h = harness(FakeBehavior::Succeed, 200 * 1024);
        let job = job(h.dir.path(), (7680, 4320), 40.0);

        let result = h.orchestrator.export(&job, None).await;
        assert!(result.is_success(), "{result:?}");

        let inits = h.spawner.inits();
        let source = &inits[0].config.input_props.clips[0].source;
        assert!(source.starts_with(h.dir.path().join("proxies")));
        assert_eq!(inits[0].config.input_props.clips[0].source_width, Some(1920));
    }

    #[tokio::test]
    async fn test_failed_proxy_falls_back_to_original() {
        // Undersized proxy output fails validation on every tier.
        let h = harness(FakeBehavior::Succeed, 3_000);
        let job = job(h.dir.path(), (7680, 4320), 40.0);

        let result = h.orchestrator.export(&job, None).await;
        assert!(result.is_success(), "{result:?}");
        let inits = h.spawner.inits();
        assert_eq!(inits[0].config.input_props.clips[0].source, job.clips[0].source);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_spawning() {
        let h = harness(FakeBehavior::Succeed, 3_000);
        let mut job = job(h.dir.path(), (1920, 1080), 10.0);
        job.clips[0].source = h.dir.path().join("missing.mp4");

        let result = h.orchestrator.export(&job, None).await;
        match result {
            ExportResult::Failed { error } => assert!(error.contains("missing")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(h.spawner.spawned(), 0);
    }

    #[tokio::test]
    async fn test_second_export_is_rejected_and_cancel_cleans_up() {
        let h = harness(FakeBehavior::Hang, 3_000);
        let job = job(h.dir.path(), (1920, 1080), 40.0);
        let orchestrator = &h.orchestrator;

        let first = orchestrator.export(&job, None);
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(orchestrator.is_export_in_progress());
            let rejected = orchestrator.export(&job, None).await;
            orchestrator.cancel_export();
            rejected
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(second, ExportResult::Failed { .. }));
        assert!(first.is_cancelled());
        assert!(!orchestrator.is_export_in_progress());
        assert_eq!(h.spawner.live(), 0);
        assert!(work_dir_is_empty(h.dir.path()));
        assert!(!job.output.path.exists());
    }

    #[test]
    fn test_cancel_without_export_is_noop() {
        let h = harness(FakeBehavior::Succeed, 3_000);
        h.orchestrator.cancel_export();
        assert!(!h.orchestrator.is_export_in_progress());
    }
}
