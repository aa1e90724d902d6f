//! External media tool invocation.
//!
//! Every ffmpeg/ffprobe call goes through [`run_tool`], which applies a
//! per-operation timeout, captures output and maps a missing binary to
//! [`ToolError::NotFound`]. [`MediaTools`] is the seam the pipeline stages
//! use; [`FfmpegTools`] is the production implementation.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::FfmpegConfig;
use crate::error::ToolError;
use crate::models::{EncodingProfile, StreamProtocol};
use crate::services::metadata::{self, MediaInfo};
use crate::services::streams;

const MAX_STDERR_CHARS: usize = 500;
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// One cut of a source video, scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipSpec {
    pub start: Option<u32>,
    pub duration: Option<u32>,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait MediaTools: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaInfo, ToolError>;

    /// Single continuous output file at the profile's size and bitrate.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
    ) -> Result<(), ToolError>;

    /// Writes segments plus the per-rendition manifest into `out_dir`.
    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        protocol: StreamProtocol,
        profile: &EncodingProfile,
        segment_seconds: u32,
    ) -> Result<(), ToolError>;

    async fn poster(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: u32,
        width: u32,
        height: u32,
    ) -> Result<(), ToolError>;

    async fn clip(&self, input: &Path, output: &Path, spec: ClipSpec) -> Result<(), ToolError>;

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;

    /// Both the transcoder and the prober answer `-version`.
    async fn is_available(&self) -> bool;
}

/// Runs `program args...` with a timeout. Non-zero exit is an error.
pub async fn run_tool(
    program: &str,
    args: &[OsString],
    operation: &str,
    timeout: Duration,
) -> Result<Output, ToolError> {
    let start = Instant::now();
    log::info!("[{}] starting {} with {} args", operation, program, args.len());

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            log::error!("[{}] {} not found", operation, program);
            return Err(ToolError::NotFound {
                tool: program.to_string(),
            });
        }
        Ok(Err(e)) => {
            return Err(ToolError::Spawn {
                tool: program.to_string(),
                source: e,
            })
        }
        Err(_) => {
            log::error!("[{}] timed out after {}s", operation, timeout.as_secs());
            return Err(ToolError::TimedOut {
                operation: operation.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = truncate_chars(&String::from_utf8_lossy(&output.stderr), MAX_STDERR_CHARS);
        log::error!(
            "[{}] failed with code {:?}: {}",
            operation,
            output.status.code(),
            stderr
        );
        return Err(ToolError::Failed {
            operation: operation.to_string(),
            code: output.status.code(),
            stderr,
        });
    }

    log::info!(
        "[{}] finished in {:.2}s",
        operation,
        start.elapsed().as_secs_f64()
    );
    Ok(output)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.into_iter().map(Into::into).collect()
}

async fn ensure_output(operation: &str, path: &Path) -> Result<(), ToolError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(ToolError::MissingOutput {
            operation: operation.to_string(),
            path: path.display().to_string(),
        }),
    }
}

/// Formats seconds as `HH:MM:SS` for `-ss`.
pub fn format_timestamp(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// ffmpeg/ffprobe on the host.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    config: FfmpegConfig,
}

impl FfmpegTools {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    async fn ffmpeg(
        &self,
        args: Vec<OsString>,
        operation: &str,
        timeout_secs: u64,
    ) -> Result<Output, ToolError> {
        run_tool(
            &self.config.ffmpeg_path,
            &args,
            operation,
            FfmpegConfig::timeout(timeout_secs),
        )
        .await
    }

    fn transcode_args(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Vec<OsString> {
        let mut args = os_args(["-i"]);
        args.push(input.into());
        args.extend(os_args([
            "-vf".to_string(),
            format!("scale={}:{}", profile.width, profile.height),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.config.preset.clone(),
            "-profile:v".into(),
            "main".into(),
            "-b:v".into(),
            format!("{}k", profile.bitrate),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            self.config.audio_bitrate.clone(),
            "-movflags".into(),
            "+faststart".into(),
            "-y".into(),
        ]));
        args.push(output.into());
        args
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn probe(&self, input: &Path) -> Result<MediaInfo, ToolError> {
        let mut args = os_args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        args.push(input.into());
        let output = run_tool(
            &self.config.ffprobe_path,
            &args,
            "probe",
            FfmpegConfig::timeout(self.config.probe_timeout),
        )
        .await?;
        metadata::parse_probe_output(&output.stdout)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
    ) -> Result<(), ToolError> {
        let operation = format!("encode_{}", profile.name);
        let args = self.transcode_args(input, output, profile);
        self.ffmpeg(args, &operation, self.config.encode_timeout)
            .await?;
        ensure_output(&operation, output).await
    }

    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        protocol: StreamProtocol,
        profile: &EncodingProfile,
        segment_seconds: u32,
    ) -> Result<(), ToolError> {
        let generator = streams::generator_for(protocol);
        let operation = format!("{}_{}", protocol, profile.name);
        let args = generator.ffmpeg_args(
            input,
            out_dir,
            profile,
            segment_seconds,
            &self.config.preset,
            &self.config.audio_bitrate,
        );
        self.ffmpeg(args, &operation, self.config.segment_timeout)
            .await?;
        ensure_output(&operation, &out_dir.join(generator.manifest_name())).await
    }

    async fn poster(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: u32,
        width: u32,
        height: u32,
    ) -> Result<(), ToolError> {
        let mut args = os_args(["-ss".to_string(), format_timestamp(at_seconds), "-i".into()]);
        args.push(input.into());
        args.extend(os_args([
            "-vframes".to_string(),
            "1".into(),
            "-vf".into(),
            format!("scale={}:{}", width, height),
            "-f".into(),
            "image2".into(),
            "-q:v".into(),
            "2".into(),
            "-y".into(),
        ]));
        args.push(output.into());
        self.ffmpeg(args, "poster", self.config.poster_timeout).await?;
        ensure_output("poster", output).await
    }

    async fn clip(&self, input: &Path, output: &Path, spec: ClipSpec) -> Result<(), ToolError> {
        let mut args = Vec::new();
        if let Some(start) = spec.start {
            args.extend(os_args(["-ss".to_string(), format_timestamp(start)]));
        }
        args.push("-i".into());
        args.push(input.into());
        if let Some(duration) = spec.duration {
            args.extend(os_args(["-t".to_string(), duration.to_string()]));
        }
        args.extend(os_args([
            "-vf".to_string(),
            format!("scale={}:{}", spec.width, spec.height),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            "-crf".into(),
            "28".into(),
            "-an".into(),
            "-y".into(),
        ]));
        args.push(output.into());
        self.ffmpeg(args, "preview_clip", self.config.preview_timeout)
            .await?;
        ensure_output("preview_clip", output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        let list_path = output.with_extension("concat.txt");
        let list: String = inputs
            .iter()
            .map(|p| format!("file '{}'\n", p.display()))
            .collect();
        tokio::fs::write(&list_path, list).await?;

        let mut args = os_args(["-f", "concat", "-safe", "0", "-i"]);
        args.push(list_path.clone().into());
        args.extend(os_args(["-c", "copy", "-y"]));
        args.push(output.into());
        let result = self
            .ffmpeg(args, "preview_concat", self.config.preview_timeout)
            .await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result?;
        ensure_output("preview_concat", output).await
    }

    async fn is_available(&self) -> bool {
        let version = os_args(["-version"]);
        for program in [&self.config.ffmpeg_path, &self.config.ffprobe_path] {
            if let Err(e) = run_tool(program, &version, "version_check", VERSION_CHECK_TIMEOUT).await {
                log::warn!("{} unavailable: {}", program, e);
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(3725), "01:02:05");
    }

    #[test]
    fn stderr_is_truncated_on_char_boundaries() {
        let long = "é".repeat(600);
        assert_eq!(truncate_chars(&long, MAX_STDERR_CHARS).chars().count(), 500);
    }

    #[test]
    fn transcode_uses_profile_values_verbatim() {
        let tools = FfmpegTools::new(FfmpegConfig::default());
        let profile = EncodingProfile::new("720p", 1280, 720, 2500, 1);
        let args: Vec<String> = tools
            .transcode_args(Path::new("in.mp4"), Path::new("out.mp4"), &profile)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"scale=1280:720".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn missing_binary_maps_to_not_found() {
        let err = run_tool(
            "definitely-not-a-real-tool-binary",
            &[],
            "probe",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }
}
