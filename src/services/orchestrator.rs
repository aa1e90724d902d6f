//! Processing state machine for one video.
//!
//! `pending -> processing -> {success | failed}`, plus the explicit
//! `failed -> pending` retry. The claim is atomic in the store, so two
//! dispatches of the same video never run concurrently.
//!
//! A run:
//!
//! 1. claims the video (idempotency guard)
//! 2. checks disk space and tool availability
//! 3. probes metadata; failure ends the run before any encode
//! 4. encodes the selected profiles in parallel, one metric per attempt
//! 5. writes poster and preview (optional artifacts)
//! 6. records the rendition set and finishes as `success` when at least one
//!    profile produced output, `failed` otherwise
//!
//! Files created by a failed run are removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{AppConfig, PipelineConfig};
use crate::error::{PipelineError, StoreError};
use crate::models::{EncodedFile, EncodingProfile, ProcessingStatus, StreamProtocol, Video};
use crate::repository::{EncodedFileRepository, ProfileRepository, Store, VideoRepository};
use crate::services::encoder::{EncodeOutcome, Encoder};
use crate::services::guard::Guard;
use crate::services::metadata;
use crate::services::metrics::{Attempt, MetricsRecorder};
use crate::services::streams::StreamGenerator;
use crate::services::thumbnail::ThumbnailGenerator;
use crate::services::tools::MediaTools;

const PROGRESS_METADATA: i32 = 5;
const PROGRESS_ENCODED: i32 = 95;

/// What a finished run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub video_id: Uuid,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    tools: Arc<dyn MediaTools>,
    guard: Arc<Guard>,
    encoder: Encoder,
    thumbnails: ThumbnailGenerator,
    metrics: MetricsRecorder,
    streams: StreamGenerator,
    inline_protocols: Vec<StreamProtocol>,
    pipeline: PipelineConfig,
    media_root: PathBuf,
    delete_source: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        tools: Arc<dyn MediaTools>,
        guard: Arc<Guard>,
        config: &AppConfig,
    ) -> Self {
        let media_root = config.storage.media_root.clone();
        let mut inline_protocols = Vec::new();
        if config.streams.generate_hls_inline {
            inline_protocols.push(StreamProtocol::Hls);
        }
        if config.streams.generate_dash_inline {
            inline_protocols.push(StreamProtocol::Dash);
        }

        Self {
            encoder: Encoder::new(
                tools.clone(),
                config.storage.videos_root(),
                config.pipeline.max_parallel_jobs,
            ),
            thumbnails: ThumbnailGenerator::new(
                tools.clone(),
                config.thumbnails.clone(),
                media_root.clone(),
            ),
            metrics: MetricsRecorder::new(store.clone()),
            streams: StreamGenerator::new(
                store.clone(),
                tools.clone(),
                media_root.clone(),
                config.streams.clone(),
            ),
            store,
            tools,
            guard,
            inline_protocols,
            pipeline: config.pipeline.clone(),
            media_root,
            delete_source: config.storage.delete_source_after_success,
        }
    }

    /// Runs the pipeline for `video_id`, optionally restricted to the named
    /// profiles. Job-level failures leave the video `failed` and are returned.
    pub async fn process(
        &self,
        video_id: Uuid,
        profile_names: Option<&[String]>,
    ) -> Result<JobReport, PipelineError> {
        let mut video = self.claim(video_id).await?;
        log::info!("Processing video {} ({})", video.id, video.title);

        let mut created = Vec::new();
        match self.run(&mut video, profile_names, &mut created).await {
            Ok(report) => {
                log::info!(
                    "Video {} processed: {} renditions, {} failed",
                    video.id,
                    report.succeeded.len(),
                    report.failed.len()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Processing video {} failed: {}", video.id, e);
                if self.pipeline.cleanup_on_error {
                    remove_all(&created).await;
                }
                video.mark_failed(e.to_string());
                self.store.save_video(&video).await?;
                Err(e)
            }
        }
    }

    /// `failed -> pending`. Any other status is rejected.
    pub async fn retry(&self, video_id: Uuid) -> Result<Video, PipelineError> {
        let mut video = self.load(video_id).await?;
        if !video.reset_for_retry() {
            return Err(PipelineError::InvalidState {
                id: video_id,
                status: video.processing_status.to_string(),
                expected: "failed",
            });
        }
        self.store.save_video(&video).await?;
        log::info!("Video {} reset to pending for retry", video_id);
        Ok(video)
    }

    async fn load(&self, video_id: Uuid) -> Result<Video, PipelineError> {
        self.store.load_video(video_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => PipelineError::VideoNotFound(video_id),
            other => other.into(),
        })
    }

    async fn claim(&self, video_id: Uuid) -> Result<Video, PipelineError> {
        let claimed = self.store.claim_video(video_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => PipelineError::VideoNotFound(video_id),
            other => other.into(),
        })?;
        if let Some(video) = claimed {
            return Ok(video);
        }

        let video = self.load(video_id).await?;
        match video.processing_status {
            ProcessingStatus::Processing => {
                log::warn!("Video {} is already being processed, skipping", video_id);
                Err(PipelineError::AlreadyProcessing(video_id))
            }
            status => Err(PipelineError::InvalidState {
                id: video_id,
                status: status.to_string(),
                expected: "pending",
            }),
        }
    }

    async fn run(
        &self,
        video: &mut Video,
        profile_names: Option<&[String]>,
        created: &mut Vec<PathBuf>,
    ) -> Result<JobReport, PipelineError> {
        self.guard.preflight(&self.media_root).await?;

        let info = metadata::extract(self.tools.as_ref(), video).await?;
        self.set_progress(video, PROGRESS_METADATA).await?;

        let profiles = self.select_profiles(profile_names, info.height).await?;
        let source = PathBuf::from(&video.source_path);
        let input_size = video.file_size.unwrap_or(info.file_size);

        let outcomes = self
            .encode_all(video, &source, input_size, profiles.clone(), created)
            .await?;

        let mut report = JobReport {
            video_id: video.id,
            ..JobReport::default()
        };
        let mut files = Vec::new();
        for profile in &profiles {
            let Some(outcome) = outcomes.iter().find(|o| o.profile.id == profile.id) else {
                continue;
            };
            match &outcome.result {
                Ok(size) => {
                    report.succeeded.push(profile.name.clone());
                    files.push(encoded_file(video, profile, &outcome.output_path, *size, files.is_empty()));
                }
                Err(_) => report.failed.push(profile.name.clone()),
            }
        }

        if files.is_empty() {
            return Err(PipelineError::AllProfilesFailed);
        }

        let thumbs = self
            .thumbnails
            .generate(&source, video.id, info.duration)
            .await;
        created.extend(thumbs.files().cloned());

        self.store.replace_encoded_files(video.id, &files).await?;

        let now = Utc::now();
        video.poster_path = thumbs.poster.map(|p| p.display().to_string());
        video.preview_path = thumbs.preview.map(|p| p.display().to_string());
        video.processing_status = ProcessingStatus::Success;
        video.processing_progress = 100;
        video.error_message = None;
        video.processing_finished_at = Some(now);
        video.updated_at = now;
        self.store.save_video(video).await?;

        self.generate_inline_streams(video, &files).await;

        if self.delete_source {
            match tokio::fs::remove_file(&source).await {
                Ok(()) => log::info!("Removed source {}", source.display()),
                Err(e) => log::warn!("Could not remove source {}: {}", source.display(), e),
            }
        }

        Ok(report)
    }

    async fn select_profiles(
        &self,
        names: Option<&[String]>,
        source_height: i32,
    ) -> Result<Vec<EncodingProfile>, PipelineError> {
        let mut profiles = self.store.active_profiles().await?;
        if let Some(names) = names.filter(|n| !n.is_empty()) {
            profiles.retain(|p| names.contains(&p.name));
        }
        let profiles = metadata::suitable_profiles(profiles, source_height, self.pipeline.skip_upscale);
        if profiles.is_empty() {
            return Err(PipelineError::NoProfiles);
        }
        Ok(profiles)
    }

    /// Drains the encoder, recording a metric and advancing progress per attempt.
    async fn encode_all(
        &self,
        video: &mut Video,
        source: &Path,
        input_size: i64,
        profiles: Vec<EncodingProfile>,
        created: &mut Vec<PathBuf>,
    ) -> Result<Vec<EncodeOutcome>, PipelineError> {
        let total = profiles.len() as i32;
        let mut rx = self.encoder.encode(source, video.id, profiles);
        let mut outcomes = Vec::with_capacity(total as usize);
        let mut failure = None;

        // drain fully so every written output lands in `created`
        while let Some(outcome) = rx.recv().await {
            if outcome.is_success() {
                created.push(outcome.output_path.clone());
            }
            if failure.is_some() {
                continue;
            }
            let done = outcomes.len() as i32 + 1;
            let accounted = self
                .account_attempt(video, &outcome, input_size, done, total)
                .await;
            match accounted {
                Ok(()) => outcomes.push(outcome),
                Err(e) => {
                    log::error!("Bookkeeping for video {} failed: {}", video.id, e);
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    async fn account_attempt(
        &self,
        video: &mut Video,
        outcome: &EncodeOutcome,
        input_size: i64,
        done: i32,
        total: i32,
    ) -> Result<(), PipelineError> {
        self.metrics
            .record(Attempt {
                video_id: video.id,
                profile: &outcome.profile,
                elapsed: outcome.elapsed,
                input_size,
                output_size: outcome.result.as_ref().ok().map(|s| *s as i64),
                error: outcome.result.as_ref().err().map(|e| e.to_string()),
            })
            .await?;
        let progress =
            PROGRESS_METADATA + (PROGRESS_ENCODED - PROGRESS_METADATA) * done / total.max(1);
        self.set_progress(video, progress).await
    }

    async fn set_progress(&self, video: &mut Video, progress: i32) -> Result<(), PipelineError> {
        video.processing_progress = progress;
        video.updated_at = Utc::now();
        self.store.save_video(video).await?;
        Ok(())
    }

    async fn generate_inline_streams(&self, video: &Video, files: &[EncodedFile]) {
        for &protocol in &self.inline_protocols {
            if let Err(e) = self
                .streams
                .generate_protocol(video, files, protocol, false)
                .await
            {
                log::warn!("Inline {} generation for video {} failed: {}", protocol, video.id, e);
            }
        }
    }
}

fn encoded_file(
    video: &Video,
    profile: &EncodingProfile,
    path: &Path,
    size: u64,
    is_primary: bool,
) -> EncodedFile {
    EncodedFile {
        id: Uuid::new_v4(),
        video_id: video.id,
        profile_id: profile.id,
        profile_name: profile.name.clone(),
        file_path: path.display().to_string(),
        file_size: size as i64,
        duration: video.duration,
        width: profile.width,
        height: profile.height,
        bitrate: profile.bitrate,
        is_primary,
        created_at: Utc::now(),
    }
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::info!("Cleaned up {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not clean up {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::MetricStatus;
    use crate::repository::{EncodedFileRepository, MemoryStore, MetricRepository, ProfileRepository, VideoRepository};
    use crate::test_utils::{FakeTools, FixedProbe};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        tools: Arc<FakeTools>,
        orchestrator: Orchestrator,
        source: PathBuf,
    }

    async fn fixture(free_mb: u64) -> Fixture {
        fixture_with(free_mb, FakeTools::new()).await
    }

    async fn fixture_with(free_mb: u64, tools: FakeTools) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.media_root = dir.path().join("media");
        let source = dir.path().join("upload.mp4");
        std::fs::write(&source, b"source").unwrap();

        let store = Arc::new(MemoryStore::new());
        for (i, (name, w, h, kbps)) in [
            ("360p", 640, 360, 800),
            ("480p", 854, 480, 1400),
            ("720p", 1280, 720, 2500),
        ]
        .into_iter()
        .enumerate()
        {
            store
                .save_profile(&EncodingProfile::new(name, w, h, kbps, i as i32))
                .await
                .unwrap();
        }

        let tools = Arc::new(tools);
        let guard = Arc::new(Guard::new(
            Arc::new(FixedProbe::free_mb(free_mb)),
            tools.clone(),
            config.pipeline.min_disk_space_bytes(),
        ));
        let orchestrator = Orchestrator::new(store.clone(), tools.clone(), guard, &config);
        Fixture {
            _dir: dir,
            store,
            tools,
            orchestrator,
            source,
        }
    }

    async fn pending_video(fx: &Fixture) -> Video {
        let video = Video::new("upload", fx.source.display().to_string(), None);
        fx.store.save_video(&video).await.unwrap();
        video
    }

    #[tokio::test]
    async fn partial_success_finishes_as_success() {
        let fx = fixture(10_000).await;
        fx.tools.fail_profile("480p");
        let video = pending_video(&fx).await;

        let report = fx.orchestrator.process(video.id, None).await.unwrap();

        assert_eq!(report.succeeded, vec!["360p", "720p"]);
        assert_eq!(report.failed, vec!["480p"]);
        let stored = fx.store.load_video(video.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Success);
        assert_eq!(stored.processing_progress, 100);
        assert!(stored.poster_path.is_some());

        let metrics = fx.store.metrics_for_video(video.id).await.unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics.iter().filter(|m| m.status == MetricStatus::Error).count(), 1);

        let files = fx.store.encoded_files(video.id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.iter().filter(|f| f.is_primary).count(), 1);
        assert!(files.iter().any(|f| f.is_primary && f.profile_name == "360p"));
    }

    #[tokio::test]
    async fn bookkeeping_failure_cleans_up_every_rendition() {
        let fx = fixture_with(10_000, FakeTools::new().with_delay(Duration::from_millis(30))).await;
        fx.store.fail_metric_writes();
        let video = pending_video(&fx).await;

        let err = fx.orchestrator.process(video.id, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Store(_)));
        assert_eq!(fx.tools.transcode_count(), 3);
        let stored = fx.store.load_video(video.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        let videos_root = fx._dir.path().join("media").join("videos");
        for profile in ["360p", "480p", "720p"] {
            let path = videos_root
                .join(profile)
                .join(format!("{}_{}.mp4", video.id, profile));
            assert!(!path.exists(), "{} left behind", profile);
        }
    }

    #[tokio::test]
    async fn low_disk_fails_without_encoding() {
        let fx = fixture(100).await;
        let video = pending_video(&fx).await;

        let err = fx.orchestrator.process(video.id, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::InsufficientDiskSpace { .. }));
        assert_eq!(fx.tools.transcode_count(), 0);
        let stored = fx.store.load_video(video.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert!(stored.error_message.unwrap().contains("Insufficient disk space"));
    }

    #[tokio::test]
    async fn metadata_failure_attempts_nothing() {
        let fx = fixture(10_000).await;
        fx.tools.fail_probe();
        let video = pending_video(&fx).await;

        let err = fx.orchestrator.process(video.id, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Metadata(_)));
        assert_eq!(fx.tools.transcode_count(), 0);
        assert!(fx.store.metrics_for_video(video.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_profiles_failing_cleans_up() {
        let fx = fixture(10_000).await;
        for name in ["360p", "480p", "720p"] {
            fx.tools.fail_profile(name);
        }
        let video = pending_video(&fx).await;

        let err = fx.orchestrator.process(video.id, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::AllProfilesFailed));
        let stored = fx.store.load_video(video.id).await.unwrap();
        assert!(stored.is_failed());
        assert_eq!(fx.store.metrics_for_video(video.id).await.unwrap().len(), 3);
        assert!(fx.store.encoded_files(video.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_subset_is_respected() {
        let fx = fixture(10_000).await;
        let video = pending_video(&fx).await;

        let names = vec!["720p".to_string()];
        let report = fx.orchestrator.process(video.id, Some(&names)).await.unwrap();

        assert_eq!(report.succeeded, vec!["720p"]);
        assert_eq!(fx.tools.transcode_count(), 1);
    }

    #[tokio::test]
    async fn second_dispatch_is_refused() {
        let fx = fixture(10_000).await;
        let video = pending_video(&fx).await;
        fx.store.claim_video(video.id).await.unwrap();

        assert!(matches!(
            fx.orchestrator.process(video.id, None).await,
            Err(PipelineError::AlreadyProcessing(_))
        ));
    }

    #[tokio::test]
    async fn retry_only_from_failed() {
        let fx = fixture(10_000).await;
        let mut video = pending_video(&fx).await;

        assert!(matches!(
            fx.orchestrator.retry(video.id).await,
            Err(PipelineError::InvalidState { .. })
        ));

        video.mark_failed("boom");
        fx.store.save_video(&video).await.unwrap();
        let retried = fx.orchestrator.retry(video.id).await.unwrap();
        assert_eq!(retried.processing_status, ProcessingStatus::Pending);
        assert_eq!(retried.error_message, None);
    }
}
