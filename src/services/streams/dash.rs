use std::ffi::OsString;
use std::path::Path;

use super::{MasterEntry, ProtocolGenerator};
use crate::models::{EncodingProfile, StreamProtocol};

/// Fragmented MP4 segments with an MPD per rendition.
#[derive(Debug, Default, Clone, Copy)]
pub struct DashGenerator;

impl ProtocolGenerator for DashGenerator {
    fn protocol(&self) -> StreamProtocol {
        StreamProtocol::Dash
    }

    fn manifest_name(&self) -> &'static str {
        "manifest.mpd"
    }

    fn master_name(&self) -> &'static str {
        "master.mpd"
    }

    fn is_segment(&self, file_name: &str) -> bool {
        file_name.starts_with("segment_") && file_name.ends_with(".m4s")
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
                "-f".into(),
                "dash".into(),
                "-seg_duration".into(),
                segment_seconds.to_string(),
                "-init_seg_name".into(),
                "init.mp4".into(),
                "-media_seg_name".into(),
                "segment_%05d.m4s".into(),
                "-use_timeline".into(),
                "1".into(),
                "-use_template".into(),
                "1".into(),
                "-window_size".into(),
                "0".into(),
                "-y".into(),
            ]
            .map(OsString::from),
        );
        args.push(out_dir.join(self.manifest_name()).into());
        args
    }

    fn render_master(&self, renditions: &[MasterEntry], duration: i32) -> String {
        let mut mpd = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        mpd.push_str(&format!(
            "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" minBufferTime=\"PT2S\" type=\"static\" \
             mediaPresentationDuration=\"{}\" profiles=\"urn:mpeg:dash:profile:isoff-live:2011\">\n",
            iso_duration(duration)
        ));
        mpd.push_str("  <Period start=\"PT0S\">\n");
        for r in renditions {
            mpd.push_str(
                "    <AdaptationSet mimeType=\"video/mp4\" segmentAlignment=\"true\" startWithSAP=\"1\">\n",
            );
            mpd.push_str(&format!(
                "      <Representation id=\"{}\" bandwidth=\"{}\" width=\"{}\" height=\"{}\">\n",
                xml_escape(&r.label),
                r.bandwidth,
                r.width,
                r.height
            ));
            mpd.push_str(&format!(
                "        <BaseURL>{}/{}</BaseURL>\n",
                xml_escape(&r.label),
                self.manifest_name()
            ));
            mpd.push_str("      </Representation>\n");
            mpd.push_str("    </AdaptationSet>\n");
        }
        mpd.push_str("  </Period>\n</MPD>\n");
        mpd
    }
}

/// `PT{h}H{m}M{s}S`
pub fn iso_duration(seconds: i32) -> String {
    let seconds = seconds.max(0);
    format!(
        "PT{}H{}M{}S",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_durations() {
        assert_eq!(iso_duration(0), "PT0H0M0S");
        assert_eq!(iso_duration(3725), "PT1H2M5S");
    }

    #[test]
    fn master_references_rendition_manifests() {
        let mpd = DashGenerator.render_master(
            &[MasterEntry {
                label: "480p".into(),
                bandwidth: 1_400_000,
                width: 854,
                height: 480,
            }],
            95,
        );
        assert!(mpd.contains("mediaPresentationDuration=\"PT0H1M35S\""));
        assert!(mpd.contains(
            "<Representation id=\"480p\" bandwidth=\"1400000\" width=\"854\" height=\"480\">"
        ));
        assert!(mpd.contains("<BaseURL>480p/manifest.mpd</BaseURL>"));
    }

    #[test]
    fn recognises_m4s_segments() {
        assert!(DashGenerator.is_segment("segment_00012.m4s"));
        assert!(!DashGenerator.is_segment("init.mp4"));
    }
}
