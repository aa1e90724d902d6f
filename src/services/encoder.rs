//! Parallel rendition encoding.
//!
//! One task per profile, gated by a semaphore so at most `max_parallel`
//! transcodes run for a job. Each task reports on a shared channel in
//! completion order; a failing profile never cancels its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::error::ToolError;
use crate::models::EncodingProfile;
use crate::services::tools::MediaTools;

/// Result of one profile attempt.
#[derive(Debug)]
pub struct EncodeOutcome {
    pub profile: EncodingProfile,
    pub output_path: PathBuf,
    pub elapsed: Duration,
    /// Output size in bytes on success.
    pub result: Result<u64, ToolError>,
}

impl EncodeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Encoder {
    tools: Arc<dyn MediaTools>,
    videos_root: PathBuf,
    max_parallel: usize,
}

impl Encoder {
    pub fn new(tools: Arc<dyn MediaTools>, videos_root: PathBuf, max_parallel: usize) -> Self {
        Self {
            tools,
            videos_root,
            max_parallel: max_parallel.max(1),
        }
    }

    /// `videos/{label}/{video_id}_{label}.mp4`
    pub fn output_path(&self, video_id: Uuid, profile: &EncodingProfile) -> PathBuf {
        self.videos_root
            .join(&profile.name)
            .join(format!("{}_{}.mp4", video_id, profile.name))
    }

    /// Starts every profile and returns the outcome stream.
    ///
    /// The receiver yields exactly one outcome per profile and closes once all
    /// tasks are done.
    pub fn encode(
        &self,
        input: &Path,
        video_id: Uuid,
        profiles: Vec<EncodingProfile>,
    ) -> mpsc::Receiver<EncodeOutcome> {
        let (tx, rx) = mpsc::channel(profiles.len().max(1));
        let slots = Arc::new(Semaphore::new(self.max_parallel));

        log::info!(
            "Encoding video {} into {} profiles, {} at a time",
            video_id,
            profiles.len(),
            self.max_parallel
        );

        for profile in profiles {
            let tx = tx.clone();
            let slots = slots.clone();
            let tools = self.tools.clone();
            let input = input.to_path_buf();
            let output = self.output_path(video_id, &profile);

            tokio::spawn(async move {
                let outcome = match slots.acquire_owned().await {
                    Ok(_permit) => encode_one(tools.as_ref(), &input, output, profile).await,
                    Err(_) => EncodeOutcome {
                        result: Err(ToolError::Spawn {
                            tool: "encoder".to_string(),
                            source: std::io::Error::other("worker pool closed"),
                        }),
                        output_path: output,
                        elapsed: Duration::ZERO,
                        profile,
                    },
                };
                if tx.send(outcome).await.is_err() {
                    log::warn!("Encode outcome dropped, receiver gone");
                }
            });
        }

        rx
    }
}

async fn encode_one(
    tools: &dyn MediaTools,
    input: &Path,
    output: PathBuf,
    profile: EncodingProfile,
) -> EncodeOutcome {
    let start = Instant::now();
    log::info!("Encoding profile {}", profile.name);

    let result = transcode(tools, input, &output, &profile).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(size) => log::info!(
            "Profile {} done in {:.1}s ({} bytes)",
            profile.name,
            elapsed.as_secs_f64(),
            size
        ),
        Err(e) => {
            log::warn!("Profile {} failed: {}", profile.name, e);
            if tokio::fs::metadata(&output).await.is_ok() {
                if let Err(e) = tokio::fs::remove_file(&output).await {
                    log::warn!("Could not remove partial {}: {}", output.display(), e);
                }
            }
        }
    }

    EncodeOutcome {
        profile,
        output_path: output,
        elapsed,
        result,
    }
}

async fn transcode(
    tools: &dyn MediaTools,
    input: &Path,
    output: &Path,
    profile: &EncodingProfile,
) -> Result<u64, ToolError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tools.transcode(input, output, profile).await?;
    Ok(tokio::fs::metadata(output).await?.len())
}
