use std::ffi::OsString;
use std::path::Path;

use super::{MasterEntry, ProtocolGenerator};
use crate::models::{EncodingProfile, StreamProtocol};

/// MPEG-TS segments with a VOD playlist per rendition.
#[derive(Debug, Default, Clone, Copy)]
pub struct HlsGenerator;

impl ProtocolGenerator for HlsGenerator {
    fn protocol(&self) -> StreamProtocol {
        StreamProtocol::Hls
    }

    fn manifest_name(&self) -> &'static str {
        "playlist.m3u8"
    }

    fn master_name(&self) -> &'static str {
        "master.m3u8"
    }

    fn is_segment(&self, file_name: &str) -> bool {
        file_name.starts_with("segment_") && file_name.ends_with(".ts")
    }

    fn ffmpeg_args(
        &self,
        input: &Path,
        out_dir: &Path,
        profile: &EncodingProfile,
        segment_seconds: u32,
        preset: &str,
        audio_bitrate: &str,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        args.extend(
            [
                "-vf".to_string(),
                format!("scale={}:{}", profile.width, profile.height),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                preset.to_string(),
                "-profile:v".into(),
                "main".into(),
                "-b:v".into(),
                format!("{}k", profile.bitrate),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                audio_bitrate.to_string(),
                "-g".into(),
                "48".into(),
                "-sc_threshold".into(),
                "0".into(),
                "-hls_time".into(),
                segment_seconds.to_string(),
                "-hls_playlist_type".into(),
                "vod".into(),
                "-hls_segment_filename".into(),
            ]
            .map(OsString::from),
        );
        args.push(out_dir.join("segment_%03d.ts").into());
        args.push("-y".into());
        args.push(out_dir.join(self.manifest_name()).into());
        args
    }

    fn render_master(&self, renditions: &[MasterEntry], _duration: i32) -> String {
        let mut master = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for r in renditions {
            master.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/{}\n",
                r.bandwidth,
                r.width,
                r.height,
                r.label,
                self.manifest_name()
            ));
        }
        master
    }
}
