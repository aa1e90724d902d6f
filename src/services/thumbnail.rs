use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use uuid::Uuid;

use crate::config::ThumbnailConfig;
use crate::error::ToolError;
use crate::services::tools::{ClipSpec, MediaTools};

/// Artifacts written for one video. Both are optional.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Thumbnails {
    pub poster: Option<PathBuf>,
    pub preview: Option<PathBuf>,
}

impl Thumbnails {
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.poster.iter().chain(self.preview.iter())
    }
}

pub struct ThumbnailGenerator {
    tools: Arc<dyn MediaTools>,
    config: ThumbnailConfig,
    media_root: PathBuf,
}

impl ThumbnailGenerator {
    pub fn new(tools: Arc<dyn MediaTools>, config: ThumbnailConfig, media_root: PathBuf) -> Self {
        Self {
            tools,
            config,
            media_root,
        }
    }

    pub fn poster_path(&self, video_id: Uuid) -> PathBuf {
        self.media_root
            .join("posters")
            .join(format!("poster_{}.jpg", video_id))
    }

    pub fn preview_path(&self, video_id: Uuid) -> PathBuf {
        self.media_root
            .join("previews")
            .join(format!("preview_{}.mp4", video_id))
    }

    /// Failures are logged and leave the corresponding field empty.
    pub async fn generate(&self, input: &Path, video_id: Uuid, duration: i32) -> Thumbnails {
        let duration = duration.max(0) as u32;
        let mut thumbs = Thumbnails::default();

        match self.poster(input, video_id, duration).await {
            Ok(path) => thumbs.poster = Some(path),
            Err(e) => log::warn!("Poster generation failed for video {}: {}", video_id, e),
        }

        match self.preview(input, video_id, duration).await {
            Ok(path) => thumbs.preview = Some(path),
            Err(e) => log::warn!("Preview generation failed for video {}: {}", video_id, e),
        }

        thumbs
    }

    async fn poster(&self, input: &Path, video_id: Uuid, duration: u32) -> Result<PathBuf, ToolError> {
        let output = self.poster_path(video_id);
        create_parent(&output).await?;
        let at = (duration / 2).max(1);
        let result = self
            .tools
            .poster(
                input,
                &output,
                at,
                self.config.poster_width,
                self.config.poster_height,
            )
            .await;
        if let Err(e) = result {
            remove_quietly(&output).await;
            return Err(e);
        }
        log::info!("Poster created for video {} at {}s", video_id, at);
        Ok(output)
    }

    async fn preview(&self, input: &Path, video_id: Uuid, duration: u32) -> Result<PathBuf, ToolError> {
        let output = self.preview_path(video_id);
        create_parent(&output).await?;

        let result = if duration <= self.config.preview_duration {
            self.tools.clip(input, &output, self.scaled(None, None)).await
        } else {
            match self.stitched(input, &output, video_id, duration).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    log::warn!(
                        "Stitched preview failed for video {}, using opening seconds: {}",
                        video_id,
                        e
                    );
                    self.tools
                        .clip(
                            input,
                            &output,
                            self.scaled(None, Some(self.config.preview_duration)),
                        )
                        .await
                }
            }
        };

        if let Err(e) = result {
            remove_quietly(&output).await;
            return Err(e);
        }
        log::info!("Preview created for video {}", video_id);
        Ok(output)
    }

    /// Evenly spaced clips concatenated into one file.
    async fn stitched(
        &self,
        input: &Path,
        output: &Path,
        video_id: Uuid,
        duration: u32,
    ) -> Result<(), ToolError> {
        let parts_dir = output
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!(".preview_{}_parts", video_id));
        fs::create_dir_all(&parts_dir).await?;

        let mut parts = Vec::new();
        for (i, start) in preview_offsets(
            duration,
            self.config.preview_duration,
            self.config.preview_segment_duration,
        )
        .into_iter()
        .enumerate()
        {
            let part = parts_dir.join(format!("part_{:02}.mp4", i));
            let spec = self.scaled(Some(start), Some(self.config.preview_segment_duration));
            match self.tools.clip(input, &part, spec).await {
                Ok(()) => parts.push(part),
                Err(e) => log::warn!("Preview part {} failed: {}", i, e),
            }
        }

        let result = if parts.is_empty() {
            Err(ToolError::MissingOutput {
                operation: "preview_parts".to_string(),
                path: parts_dir.display().to_string(),
            })
        } else {
            self.tools.concat(&parts, output).await
        };

        let _ = fs::remove_dir_all(&parts_dir).await;
        result
    }

    fn scaled(&self, start: Option<u32>, duration: Option<u32>) -> ClipSpec {
        ClipSpec {
            start,
            duration,
            width: self.config.preview_width,
            height: self.config.preview_height,
        }
    }
}

/// Start offsets of preview clips spread across the video.
pub fn preview_offsets(duration: u32, preview_duration: u32, segment_duration: u32) -> Vec<u32> {
    if segment_duration == 0 {
        return Vec::new();
    }
    let count = preview_duration / segment_duration;
    let interval = duration as f64 / (count + 1) as f64;
    (0..count)
        .map(|i| {
            let start = (interval * (i + 1) as f64) as u32;
            if start + segment_duration > duration {
                duration.saturating_sub(segment_duration)
            } else {
                start
            }
        })
        .collect()
}

async fn create_parent(path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if fs::metadata(path).await.is_ok() {
        if let Err(e) = fs::remove_file(path).await {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeTools;

    #[test]
    fn offsets_are_evenly_spaced() {
        assert_eq!(preview_offsets(70, 12, 2), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn offsets_stay_inside_the_video() {
        for start in preview_offsets(13, 12, 2) {
            assert!(start + 2 <= 13);
        }
    }

    #[tokio::test]
    async fn writes_poster_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Arc::new(FakeTools::new());
        let gen = ThumbnailGenerator::new(
            tools.clone(),
            ThumbnailConfig::default(),
            dir.path().to_path_buf(),
        );
        let id = Uuid::new_v4();

        let thumbs = gen.generate(Path::new("in.mp4"), id, 120).await;

        assert_eq!(thumbs.poster, Some(gen.poster_path(id)));
        assert_eq!(thumbs.preview, Some(gen.preview_path(id)));
        assert!(gen.preview_path(id).exists());
        // clip parts are cleaned up after concatenation
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("previews"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn failures_do_not_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakeTools::new();
        tools.fail_thumbnails();
        let gen = ThumbnailGenerator::new(
            Arc::new(tools),
            ThumbnailConfig::default(),
            dir.path().to_path_buf(),
        );
        let thumbs = gen.generate(Path::new("in.mp4"), Uuid::new_v4(), 120).await;
        assert_eq!(thumbs, Thumbnails::default());
    }
}
