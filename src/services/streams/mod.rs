//! Adaptive streaming output (HLS and DASH).
//!
//! Layout under the media root:
//!
//! ```text
//! streams/hls/{video_id}/master.m3u8
//! streams/hls/{video_id}/{rendition}/playlist.m3u8
//! streams/dash/{video_id}/master.mpd
//! streams/dash/{video_id}/{rendition}/manifest.mpd
//! ```
//!
//! A rendition is written into a hidden staging directory and renamed into
//! place only once its manifest and at least one segment exist, so a
//! consumer never sees a half-written rendition marked ready.

pub mod dash;
pub mod hls;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{PipelineError, ToolError};
use crate::models::{EncodedFile, EncodingProfile, ProcessingStatus, Stream, StreamProtocol, Video};
use crate::repository::{EncodedFileRepository, Store, StreamRepository, VideoRepository};
use crate::services::tools::MediaTools;

pub use dash::DashGenerator;
pub use hls::HlsGenerator;

/// One line of a master manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterEntry {
    pub label: String,
    /// Bits per second.
    pub bandwidth: i64,
    pub width: i32,
    pub height: i32,
}

/// Protocol-specific naming, tool arguments and master rendering.
pub trait ProtocolGenerator: Send + Sync {
    fn protocol(&self) -> StreamProtocol;

    /// Per-rendition manifest file name.
    fn manifest_name(&self) -> &'static str;

    fn master_name(&self) -> &'static str;

    fn is_segment(&self, file_name: &str) -> bool;

    fn ffmpeg_args(
        &self,
        input: &Path,
        out_dir: &Path,
        profile: &EncodingProfile,
        segment_seconds: u32,
        preset: &str,
        audio_bitrate: &str,
    ) -> Vec<OsString>;

    /// `renditions` arrive highest bandwidth first.
    fn render_master(&self, renditions: &[MasterEntry], duration: i32) -> String;
}

pub fn generator_for(protocol: StreamProtocol) -> &'static dyn ProtocolGenerator {
    match protocol {
        StreamProtocol::Hls => &HlsGenerator,
        StreamProtocol::Dash => &DashGenerator,
    }
}

/// Batch invocation: one video or every eligible one, optionally a single protocol.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub video_id: Option<Uuid>,
    pub protocol: Option<StreamProtocol>,
    pub limit: usize,
    pub force: bool,
}

impl StreamRequest {
    fn protocols(&self) -> Vec<StreamProtocol> {
        match self.protocol {
            Some(p) => vec![p],
            None => StreamProtocol::ALL.to_vec(),
        }
    }
}

/// Per-video tally across the requested protocols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoStreamReport {
    pub video_id: Uuid,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Renditions ready after the run, whether generated now or before.
    pub ready: usize,
}

impl VideoStreamReport {
    fn new(video_id: Uuid) -> Self {
        Self {
            video_id,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: VideoStreamReport) {
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.ready += other.ready;
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub videos: Vec<VideoStreamReport>,
}

impl BatchReport {
    /// Videos left without a single ready stream.
    pub fn failed_videos(&self) -> Vec<Uuid> {
        self.videos
            .iter()
            .filter(|v| v.ready == 0)
            .map(|v| v.video_id)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed_videos().is_empty()
    }
}

struct Rendition {
    segment_count: i32,
    total_size: i64,
}

pub struct StreamGenerator {
    store: Arc<dyn Store>,
    tools: Arc<dyn MediaTools>,
    media_root: PathBuf,
    config: StreamConfig,
}

impl StreamGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        tools: Arc<dyn MediaTools>,
        media_root: PathBuf,
        config: StreamConfig,
    ) -> Self {
        Self {
            store,
            tools,
            media_root,
            config,
        }
    }

    pub fn video_dir(&self, protocol: StreamProtocol, video_id: Uuid) -> PathBuf {
        self.media_root
            .join("streams")
            .join(protocol.as_str())
            .join(video_id.to_string())
    }

    fn segment_seconds(&self, protocol: StreamProtocol) -> u32 {
        match protocol {
            StreamProtocol::Hls => self.config.hls_segment_seconds,
            StreamProtocol::Dash => self.config.dash_segment_seconds,
        }
    }

    pub async fn run_batch(&self, request: &StreamRequest) -> Result<BatchReport, PipelineError> {
        let protocols = request.protocols();
        let mut report = BatchReport::default();

        for (video, files) in self.select_videos(request).await? {
            let mut video_report = VideoStreamReport::new(video.id);
            if files.is_empty() {
                log::warn!("Video {} has no encoded files, nothing to stream", video.id);
            }
            for &protocol in &protocols {
                video_report.absorb(
                    self.generate_protocol(&video, &files, protocol, request.force)
                        .await?,
                );
            }
            log::info!(
                "Streams for video {}: {} generated, {} skipped, {} failed",
                video.id,
                video_report.generated,
                video_report.skipped,
                video_report.failed
            );
            report.videos.push(video_report);
        }

        Ok(report)
    }

    async fn select_videos(
        &self,
        request: &StreamRequest,
    ) -> Result<Vec<(Video, Vec<EncodedFile>)>, PipelineError> {
        if let Some(id) = request.video_id {
            let video = self.store.load_video(id).await.map_err(|e| match e {
                crate::error::StoreError::NotFound { .. } => PipelineError::VideoNotFound(id),
                other => other.into(),
            })?;
            if video.processing_status != ProcessingStatus::Success {
                log::warn!(
                    "Video {} is {}, streams need a successful encode",
                    id,
                    video.processing_status
                );
                return Ok(vec![(video, Vec::new())]);
            }
            let files = self.store.encoded_files(id).await?;
            return Ok(vec![(video, files)]);
        }

        let mut selected = Vec::new();
        for video in self
            .store
            .videos_with_status(ProcessingStatus::Success, None)
            .await?
        {
            if selected.len() >= request.limit {
                break;
            }
            let files = self.store.encoded_files(video.id).await?;
            if !files.is_empty() {
                selected.push((video, files));
            }
        }
        Ok(selected)
    }

    /// Streams every encoded rendition of `video` for one protocol.
    pub async fn generate_protocol(
        &self,
        video: &Video,
        files: &[EncodedFile],
        protocol: StreamProtocol,
        force: bool,
    ) -> Result<VideoStreamReport, PipelineError> {
        let mut report = VideoStreamReport::new(video.id);

        for file in files {
            let existing = self
                .store
                .find_stream(video.id, protocol, file.profile_id)
                .await?;

            if !force && existing.as_ref().is_some_and(|s| s.is_ready) {
                log::debug!(
                    "{} {} for video {} already ready, skipping",
                    protocol,
                    file.profile_name,
                    video.id
                );
                report.skipped += 1;
                report.ready += 1;
                continue;
            }

            if let Some(mut stale) = existing.filter(|s| s.is_ready) {
                stale.is_ready = false;
                stale.updated_at = Utc::now();
                self.store.save_stream(&stale).await?;
            }

            match self.generate_rendition(video.id, file, protocol).await {
                Ok(rendition) => {
                    self.save_stream(video.id, file, protocol, Some(rendition))
                        .await?;
                    report.generated += 1;
                    report.ready += 1;
                }
                Err(e) => {
                    log::warn!(
                        "{} generation failed for video {} profile {}: {}",
                        protocol,
                        video.id,
                        file.profile_name,
                        e
                    );
                    self.save_stream(video.id, file, protocol, None).await?;
                    self.remove_rendition_dir(video.id, file, protocol).await?;
                    report.failed += 1;
                }
            }
        }

        if report.generated + report.failed > 0 {
            self.write_master(video, files, protocol).await?;
        }

        Ok(report)
    }

    async fn generate_rendition(
        &self,
        video_id: Uuid,
        file: &EncodedFile,
        protocol: StreamProtocol,
    ) -> Result<Rendition, ToolError> {
        let generator = generator_for(protocol);
        let video_dir = self.video_dir(protocol, video_id);
        let final_dir = video_dir.join(&file.profile_name);
        let staging = video_dir.join(format!(".{}.staging", file.profile_name));

        if fs::metadata(&staging).await.is_ok() {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let result = self.segment_into(&staging, file, protocol).await;
        let rendition = match result {
            Ok(rendition) => rendition,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        if fs::metadata(&final_dir).await.is_ok() {
            fs::remove_dir_all(&final_dir).await?;
        }
        if let Err(e) = fs::rename(&staging, &final_dir).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        log::info!(
            "{} {} for video {}: {} segments, {} bytes",
            generator.protocol(),
            file.profile_name,
            video_id,
            rendition.segment_count,
            rendition.total_size
        );
        Ok(rendition)
    }

    async fn segment_into(
        &self,
        dir: &Path,
        file: &EncodedFile,
        protocol: StreamProtocol,
    ) -> Result<Rendition, ToolError> {
        let generator = generator_for(protocol);
        let profile = profile_of(file);

        self.tools
            .segment(
                Path::new(&file.file_path),
                dir,
                protocol,
                &profile,
                self.segment_seconds(protocol),
            )
            .await?;

        let manifest = dir.join(generator.manifest_name());
        if fs::metadata(&manifest).await.is_err() {
            return Err(ToolError::MissingOutput {
                operation: format!("{}_{}", protocol, file.profile_name),
                path: manifest.display().to_string(),
            });
        }

        let mut segment_count = 0;
        let mut total_size = 0i64;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = entry.metadata().await?.len() as i64;
            if generator.is_segment(&name) {
                segment_count += 1;
                total_size += size;
            } else if name != generator.manifest_name() {
                // init segments count toward size
                total_size += size;
            }
        }

        if segment_count == 0 {
            return Err(ToolError::MissingOutput {
                operation: format!("{}_{}", protocol, file.profile_name),
                path: dir.display().to_string(),
            });
        }

        Ok(Rendition {
            segment_count,
            total_size,
        })
    }

    async fn save_stream(
        &self,
        video_id: Uuid,
        file: &EncodedFile,
        protocol: StreamProtocol,
        rendition: Option<Rendition>,
    ) -> Result<(), PipelineError> {
        let manifest = self
            .video_dir(protocol, video_id)
            .join(&file.profile_name)
            .join(generator_for(protocol).manifest_name());
        let now = Utc::now();
        let (segment_count, total_size, is_ready) = match rendition {
            Some(r) => (r.segment_count, r.total_size, true),
            None => (0, 0, false),
        };
        self.store
            .save_stream(&Stream {
                id: Uuid::new_v4(),
                video_id,
                protocol,
                profile_id: file.profile_id,
                profile_name: file.profile_name.clone(),
                manifest_path: manifest.display().to_string(),
                segment_count,
                total_size,
                is_ready,
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }

    /// A rendition that is not ready must not stay servable.
    async fn remove_rendition_dir(
        &self,
        video_id: Uuid,
        file: &EncodedFile,
        protocol: StreamProtocol,
    ) -> Result<(), PipelineError> {
        let dir = self.video_dir(protocol, video_id).join(&file.profile_name);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(&dir).await?;
            log::info!("Removed stale {} {} for video {}", protocol, file.profile_name, video_id);
        }
        Ok(())
    }

    /// Rewrites the master manifest from every ready rendition, or removes it
    /// when none is left.
    async fn write_master(
        &self,
        video: &Video,
        files: &[EncodedFile],
        protocol: StreamProtocol,
    ) -> Result<(), PipelineError> {
        let generator = generator_for(protocol);
        let ready = self.store.ready_streams(video.id, protocol).await?;

        let mut entries: Vec<MasterEntry> = ready
            .iter()
            .filter_map(|s| files.iter().find(|f| f.profile_id == s.profile_id))
            .map(|f| MasterEntry {
                label: f.profile_name.clone(),
                bandwidth: f.bitrate as i64 * 1000,
                width: f.width,
                height: f.height,
            })
            .collect();
        entries.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

        let dir = self.video_dir(protocol, video.id);
        let path = dir.join(generator.master_name());

        if entries.is_empty() {
            if fs::metadata(&path).await.is_ok() {
                fs::remove_file(&path).await?;
            }
            return Ok(());
        }

        let tmp = dir.join(format!(".{}.tmp", generator.master_name()));
        let body = generator.render_master(&entries, video.duration.unwrap_or(0));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        log::info!(
            "{} master for video {} lists {} renditions",
            protocol,
            video.id,
            entries.len()
        );
        Ok(())
    }
}

fn profile_of(file: &EncodedFile) -> EncodingProfile {
    EncodingProfile {
        id: file.profile_id,
        name: file.profile_name.clone(),
        width: file.width,
        height: file.height,
        bitrate: file.bitrate,
        is_active: true,
        sort_order: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{EncodedFileRepository, MemoryStore, StreamRepository, VideoRepository};
    use crate::test_utils::{encoded_file, FakeTools};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<MemoryStore>,
        tools: Arc<FakeTools>,
        generator: StreamGenerator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(FakeTools::new());
        let generator = StreamGenerator::new(
            store.clone(),
            tools.clone(),
            root.clone(),
            StreamConfig::default(),
        );
        Fixture {
            _dir: dir,
            root,
            store,
            tools,
            generator,
        }
    }

    async fn encoded_video(fx: &Fixture) -> (Video, Vec<EncodedFile>) {
        let mut video = Video::new("clip", "/src.mp4", None);
        video.processing_status = ProcessingStatus::Success;
        video.duration = Some(120);
        fx.store.save_video(&video).await.unwrap();
        let files = vec![
            encoded_file(&fx.root, video.id, &EncodingProfile::new("360p", 640, 360, 800, 1)),
            encoded_file(&fx.root, video.id, &EncodingProfile::new("720p", 1280, 720, 2500, 2)),
        ];
        fx.store.replace_encoded_files(video.id, &files).await.unwrap();
        (video, files)
    }

    #[tokio::test]
    async fn writes_renditions_and_master() {
        let fx = fixture();
        let (video, files) = encoded_video(&fx).await;

        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, false)
            .await
            .unwrap();

        assert_eq!(report.generated, 2);
        let dir = fx.generator.video_dir(StreamProtocol::Hls, video.id);
        assert!(dir.join("720p/playlist.m3u8").exists());
        let master = std::fs::read_to_string(dir.join("master.m3u8")).unwrap();
        let first = master.find("720p/playlist.m3u8").unwrap();
        let second = master.find("360p/playlist.m3u8").unwrap();
        assert!(first < second, "highest bitrate first");
        assert_eq!(
            fx.store
                .ready_streams(video.id, StreamProtocol::Hls)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn second_run_without_force_touches_nothing() {
        let fx = fixture();
        let (video, files) = encoded_video(&fx).await;
        fx.generator
            .generate_protocol(&video, &files, StreamProtocol::Dash, false)
            .await
            .unwrap();
        let calls = fx.tools.segment_calls();
        let streams_before = fx.store.all_streams().await;

        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Dash, false)
            .await
            .unwrap();

        assert_eq!(report.generated, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(fx.tools.segment_calls(), calls);
        assert_eq!(fx.store.all_streams().await, streams_before);
    }

    #[tokio::test]
    async fn force_regenerates() {
        let fx = fixture();
        let (video, files) = encoded_video(&fx).await;
        fx.generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, false)
            .await
            .unwrap();

        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, true)
            .await
            .unwrap();

        assert_eq!(report.generated, 2);
        assert_eq!(fx.store.all_streams().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_forced_rendition_leaves_the_master() {
        let fx = fixture();
        let (video, files) = encoded_video(&fx).await;
        fx.generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, false)
            .await
            .unwrap();
        let dir = fx.generator.video_dir(StreamProtocol::Hls, video.id);

        fx.tools.fail_segment("720p");
        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, true)
            .await
            .unwrap();

        assert_eq!(report.generated, 1);
        assert_eq!(report.failed, 1);
        assert!(!dir.join("720p").exists());
        let master = std::fs::read_to_string(dir.join("master.m3u8")).unwrap();
        assert!(!master.contains("720p/"));
        assert!(master.contains("360p/playlist.m3u8"));

        // nothing ready: no master at all
        fx.tools.fail_segment("360p");
        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, true)
            .await
            .unwrap();

        assert_eq!(report.ready, 0);
        assert!(!dir.join("360p").exists());
        assert!(!dir.join("master.m3u8").exists());
        assert!(fx
            .store
            .ready_streams(video.id, StreamProtocol::Hls)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_rendition_is_not_ready_and_leaves_no_directory() {
        let fx = fixture();
        let (video, files) = encoded_video(&fx).await;
        fx.tools.fail_segment("720p");

        let report = fx
            .generator
            .generate_protocol(&video, &files, StreamProtocol::Hls, false)
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.ready, 1);
        let dir = fx.generator.video_dir(StreamProtocol::Hls, video.id);
        assert!(!dir.join("720p").exists());
        assert!(!dir.join(".720p.staging").exists());
        let stream = fx
            .store
            .find_stream(video.id, StreamProtocol::Hls, files[1].profile_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stream.is_ready);
        let master = std::fs::read_to_string(dir.join("master.m3u8")).unwrap();
        assert!(!master.contains("720p"));
    }

    #[tokio::test]
    async fn unknown_video_is_an_error() {
        let fx = fixture();
        let request = StreamRequest {
            video_id: Some(Uuid::new_v4()),
            protocol: None,
            limit: 10,
            force: false,
        };
        assert!(matches!(
            fx.generator.run_batch(&request).await,
            Err(PipelineError::VideoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn video_without_renditions_fails_the_batch() {
        let fx = fixture();
        let video = Video::new("pending", "/src.mp4", None);
        fx.store.save_video(&video).await.unwrap();
        let request = StreamRequest {
            video_id: Some(video.id),
            protocol: Some(StreamProtocol::Hls),
            limit: 10,
            force: false,
        };
        let report = fx.generator.run_batch(&request).await.unwrap();
        assert_eq!(report.failed_videos(), vec![video.id]);
        assert!(!report.is_success());
    }
}
