//! Fakes shared by unit and integration tests.
//!
//! [`FakeTools`] writes small placeholder files wherever the real tools
//! would, so stages that inspect their output behave as in production.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::ToolError;
use crate::models::{Alert, EncodedFile, EncodingProfile, StreamProtocol};
use crate::services::alerts::{Notifier, NotifyError};
use crate::services::guard::{DiskUsage, SystemProbe};
use crate::services::metadata::MediaInfo;
use crate::services::tools::{ClipSpec, MediaTools};

const SEGMENTS_PER_RENDITION: usize = 3;

pub struct FakeTools {
    probe: Mutex<Option<MediaInfo>>,
    delay: Duration,
    available: AtomicBool,
    thumbnails_fail: AtomicBool,
    failing_profiles: Mutex<HashSet<String>>,
    failing_segments: Mutex<HashSet<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    transcodes: AtomicUsize,
    segments: AtomicUsize,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            probe: Mutex::new(Some(sample_media_info())),
            delay: Duration::ZERO,
            available: AtomicBool::new(true),
            thumbnails_fail: AtomicBool::new(false),
            failing_profiles: Mutex::new(HashSet::new()),
            failing_segments: Mutex::new(HashSet::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            transcodes: AtomicUsize::new(0),
            segments: AtomicUsize::new(0),
        }
    }

    /// Each transcode sleeps this long while counted as running.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Probing fails from now on.
    pub fn fail_probe(&self) {
        *lock(&self.probe) = None;
    }

    /// Transcodes for `profile` write a partial file, then fail.
    pub fn fail_profile(&self, profile: &str) {
        lock(&self.failing_profiles).insert(profile.to_string());
    }

    pub fn fail_segment(&self, profile: &str) {
        lock(&self.failing_segments).insert(profile.to_string());
    }

    pub fn fail_thumbnails(&self) {
        self.thumbnails_fail.store(true, Ordering::SeqCst);
    }

    pub fn max_concurrent_transcodes(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn transcode_count(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }

    pub fn segment_calls(&self) -> usize {
        self.segments.load(Ordering::SeqCst)
    }

    fn thumbnail_result(&self, operation: &str) -> Result<(), ToolError> {
        if self.thumbnails_fail.load(Ordering::SeqCst) {
            Err(failed(operation))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn probe(&self, _input: &Path) -> Result<MediaInfo, ToolError> {
        lock(&self.probe)
            .clone()
            .ok_or_else(|| ToolError::Parse("no video stream".to_string()))
    }

    async fn transcode(
        &self,
        _input: &Path,
        output: &Path,
        profile: &EncodingProfile,
    ) -> Result<(), ToolError> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = lock(&self.failing_profiles).contains(&profile.name);
        let result = if fail {
            write(output, b"partial").await.and(Err(failed(&format!("encode_{}", profile.name))))
        } else {
            write(output, format!("encoded {}", profile.name).as_bytes()).await
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn segment(
        &self,
        _input: &Path,
        out_dir: &Path,
        protocol: StreamProtocol,
        profile: &EncodingProfile,
        _segment_seconds: u32,
    ) -> Result<(), ToolError> {
        self.segments.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_segments).contains(&profile.name) {
            write(&out_dir.join("segment_000.ts"), b"partial").await?;
            return Err(failed(&format!("{}_{}", protocol, profile.name)));
        }

        match protocol {
            StreamProtocol::Hls => {
                for i in 0..SEGMENTS_PER_RENDITION {
                    write(&out_dir.join(format!("segment_{:03}.ts", i)), b"ts").await?;
                }
                write(&out_dir.join("playlist.m3u8"), b"#EXTM3U\n").await
            }
            StreamProtocol::Dash => {
                write(&out_dir.join("init.mp4"), b"init").await?;
                for i in 1..=SEGMENTS_PER_RENDITION {
                    write(&out_dir.join(format!("segment_{:05}.m4s", i)), b"m4s").await?;
                }
                write(&out_dir.join("manifest.mpd"), b"<MPD/>").await
            }
        }
    }

    async fn poster(
        &self,
        _input: &Path,
        output: &Path,
        _at_seconds: u32,
        _width: u32,
        _height: u32,
    ) -> Result<(), ToolError> {
        self.thumbnail_result("poster")?;
        write(output, b"jpeg").await
    }

    async fn clip(&self, _input: &Path, output: &Path, _spec: ClipSpec) -> Result<(), ToolError> {
        self.thumbnail_result("preview")?;
        write(output, b"clip").await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        self.thumbnail_result("preview_concat")?;
        write(output, format!("{} parts", inputs.len()).as_bytes()).await
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Reports the same volume for every path.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Option<DiskUsage>);

impl FixedProbe {
    pub fn free_mb(available: u64) -> Self {
        Self(Some(DiskUsage {
            total_bytes: 100 * 1024 * 1024 * 1024,
            available_bytes: available * 1024 * 1024,
        }))
    }
}

impl SystemProbe for FixedProbe {
    fn disk_usage(&self, _path: &Path) -> Option<DiskUsage> {
        self.0
    }
}

/// Counts deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    emails: AtomicUsize,
    webhooks: AtomicUsize,
    webhooks_fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_webhooks(&self) {
        self.webhooks_fail.store(true, Ordering::SeqCst);
    }

    pub fn emails(&self) -> usize {
        self.emails.load(Ordering::SeqCst)
    }

    pub fn webhooks(&self) -> usize {
        self.webhooks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, _recipients: &[String], _alert: &Alert) -> Result<(), NotifyError> {
        self.emails.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_webhook(&self, _url: &str, _alert: &Alert) -> Result<(), NotifyError> {
        if self.webhooks_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::HttpStatus(503));
        }
        self.webhooks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 1080p, two minutes, with audio.
pub fn sample_media_info() -> MediaInfo {
    MediaInfo {
        duration: 120,
        width: 1920,
        height: 1080,
        video_codec: "h264".to_string(),
        container_format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        bitrate_kbps: 4500,
        fps: 29.97,
        has_audio: true,
        audio_codec: Some("aac".to_string()),
        file_size: 64 * 1024 * 1024,
    }
}

/// Writes a placeholder rendition under `root/videos` and describes it.
pub fn encoded_file(root: &Path, video_id: Uuid, profile: &EncodingProfile) -> EncodedFile {
    let path = root
        .join("videos")
        .join(&profile.name)
        .join(format!("{}_{}.mp4", video_id, profile.name));
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&path, b"rendition");
    EncodedFile {
        id: Uuid::new_v4(),
        video_id,
        profile_id: profile.id,
        profile_name: profile.name.clone(),
        file_path: path.display().to_string(),
        file_size: 9,
        duration: Some(120),
        width: profile.width,
        height: profile.height,
        bitrate: profile.bitrate,
        is_primary: false,
        created_at: Utc::now(),
    }
}

fn failed(operation: &str) -> ToolError {
    ToolError::Failed {
        operation: operation.to_string(),
        code: Some(1),
        stderr: "simulated failure".to_string(),
    }
}

async fn write(path: &Path, contents: &[u8]) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
