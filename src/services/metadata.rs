// ffprobe JSON parsing and profile selection

use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, ToolError};
use crate::models::{EncodingProfile, Video};
use crate::services::tools::MediaTools;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    /// Whole seconds.
    pub duration: i32,
    pub width: i32,
    pub height: i32,
    pub video_codec: String,
    pub container_format: String,
    pub bitrate_kbps: i32,
    pub fps: f64,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
    pub file_size: i64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Option<Vec<ProbeStream>>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
///
/// A file without a video stream is rejected.
pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo, ToolError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ToolError::Parse(format!("invalid ffprobe json: {}", e)))?;

    let streams = probe.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ToolError::Parse("no video stream".to_string()))?;
    let audio = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let format = probe.format.unwrap_or_default();

    Ok(MediaInfo {
        duration: format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d as i32)
            .unwrap_or(0),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        video_codec: video.codec_name.clone().unwrap_or_default(),
        container_format: format.format_name.unwrap_or_default(),
        bitrate_kbps: format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse::<i64>().ok())
            .map(|b| (b / 1000) as i32)
            .unwrap_or(0),
        fps: parse_frame_rate(video.r_frame_rate.as_deref()).unwrap_or(0.0),
        has_audio: audio.is_some(),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        file_size: format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// Parse frame rate string like "30000/1001", rounded to two decimals.
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    Some((fps * 100.0).round() / 100.0)
}

/// Probes the source of `video` and copies the result onto the record.
pub async fn extract(tools: &dyn MediaTools, video: &mut Video) -> Result<MediaInfo, PipelineError> {
    let source = Path::new(&video.source_path);
    if !source.exists() {
        return Err(PipelineError::Metadata(format!(
            "source file {} does not exist",
            video.source_path
        )));
    }

    let info = tools
        .probe(source)
        .await
        .map_err(|e| PipelineError::Metadata(e.to_string()))?;

    video.duration = Some(info.duration);
    video.width = Some(info.width);
    video.height = Some(info.height);
    video.video_codec = Some(info.video_codec.clone());
    video.container_format = Some(info.container_format.clone());
    video.bitrate_kbps = Some(info.bitrate_kbps);
    video.fps = Some(info.fps);
    video.has_audio = info.has_audio;
    video.file_size = Some(info.file_size);

    log::info!(
        "Video {}: {}s {}x{} {} ({})",
        video.id,
        info.duration,
        info.width,
        info.height,
        info.video_codec,
        info.container_format
    );
    Ok(info)
}

/// Drops profiles taller than the source when `skip_upscale` is set.
///
/// Falls back to the single lowest profile when nothing fits, and keeps every
/// profile when the source height is unknown.
pub fn suitable_profiles(
    profiles: Vec<EncodingProfile>,
    source_height: i32,
    skip_upscale: bool,
) -> Vec<EncodingProfile> {
    if !skip_upscale || source_height <= 0 || profiles.is_empty() {
        return profiles;
    }

    let (suitable, skipped): (Vec<_>, Vec<_>) = profiles
        .into_iter()
        .partition(|p| p.height <= source_height);

    for profile in &skipped {
        log::info!(
            "Profile {} ({}p) skipped, source is {}p",
            profile.name,
            profile.height,
            source_height
        );
    }

    if !suitable.is_empty() {
        return suitable;
    }

    match skipped.into_iter().min_by_key(|p| p.height) {
        Some(lowest) => {
            log::warn!("No profile fits the source, using lowest: {}", lowest.name);
            vec![lowest]
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "r_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "183.47", "bit_rate": "4500000", "size": "103219200"}
    }"#;

    #[test]
    fn parses_ffprobe_output() {
        let info = parse_probe_output(PROBE_JSON.as_bytes()).unwrap();
        assert_eq!(info.duration, 183);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.bitrate_kbps, 4500);
        assert_eq!(info.fps, 29.97);
        assert!(info.has_audio);
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.file_size, 103_219_200);
    }

    #[test]
    fn audio_only_file_is_rejected() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}], "format": {}}"#;
        assert!(matches!(
            parse_probe_output(json.as_bytes()),
            Err(ToolError::Parse(_))
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_probe_output(b"not json").is_err());
    }

    fn ladder() -> Vec<EncodingProfile> {
        vec![
            EncodingProfile::new("360p", 640, 360, 800, 1),
            EncodingProfile::new("720p", 1280, 720, 2500, 2),
            EncodingProfile::new("1080p", 1920, 1080, 5000, 3),
        ]
    }

    #[test]
    fn never_upscales() {
        let names: Vec<String> = suitable_profiles(ladder(), 720, true)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["360p", "720p"]);
    }

    #[test]
    fn tiny_source_gets_lowest_profile() {
        let picked = suitable_profiles(ladder(), 240, true);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "360p");
    }

    #[test]
    fn unknown_height_keeps_everything() {
        assert_eq!(suitable_profiles(ladder(), 0, true).len(), 3);
        assert_eq!(suitable_profiles(ladder(), 240, false).len(), 3);
    }
}
