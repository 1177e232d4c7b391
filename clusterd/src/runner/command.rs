//! Capture process command line.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use url::Url;

use crate::domain::{CaptureInput, CaptureParams, CaptureSource};
use crate::media::{INDEX_PLAYLIST, INIT_SEGMENT, SEGMENT_PATTERN, SESSION_DESCRIPTION};
use crate::{Error, Result};

const VIDEO_PAYLOAD_TYPE: u8 = 96;
const AUDIO_PAYLOAD_TYPE: u8 = 97;
const DEFAULT_VIDEO_RTPMAP: &str = "H264/90000";
const DEFAULT_AUDIO_RTPMAP: &str = "opus/48000/2";

/// A ready-to-spawn capture invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureCommand {
    pub args: Vec<String>,
    /// Session description to write into the job directory before spawning.
    pub session_description: Option<(PathBuf, String)>,
}

impl CaptureCommand {
    /// Build the arguments for recording `params` into `job_dir` as an
    /// event-type fMP4 HLS playlist.
    pub fn build(params: &CaptureParams, job_dir: &Path) -> Result<Self> {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into(), "-nostats".into()];
        let timeout_us = params.io_timeout_secs.saturating_mul(1_000_000);

        let session_description = match params.input()? {
            CaptureInput::Single(source) => {
                if timeout_us > 0 {
                    args.extend(["-rw_timeout".into(), timeout_us.to_string()]);
                }
                args.extend(["-re".into(), "-i".into(), source.url.clone()]);
                None
            }
            CaptureInput::Dual { video, audio } => {
                let sdp_path = job_dir.join(SESSION_DESCRIPTION);
                if timeout_us > 0 {
                    args.extend(["-timeout".into(), timeout_us.to_string()]);
                }
                args.extend([
                    "-protocol_whitelist".into(),
                    "file,udp,rtp".into(),
                    "-i".into(),
                    sdp_path.to_string_lossy().into_owned(),
                ]);
                Some((sdp_path, session_description(video, audio)?))
            }
        };

        args.extend(["-c".into(), "copy".into()]);
        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            params.segment_duration_secs.to_string(),
            "-hls_list_size".into(),
            "0".into(),
            "-hls_playlist_type".into(),
            "event".into(),
            "-hls_segment_type".into(),
            "fmp4".into(),
            "-hls_fmp4_init_filename".into(),
            INIT_SEGMENT.into(),
            "-hls_segment_filename".into(),
            job_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
            job_dir.join(INDEX_PLAYLIST).to_string_lossy().into_owned(),
        ]);

        Ok(Self {
            args,
            session_description,
        })
    }
}

/// Synthesize an SDP describing one video and one audio RTP stream.
pub fn session_description(video: &CaptureSource, audio: &CaptureSource) -> Result<String> {
    let (video_host, video_port) = rtp_endpoint(video)?;
    let (audio_host, audio_port) = rtp_endpoint(audio)?;

    let mut sdp = String::new();
    let _ = writeln!(sdp, "v=0");
    let _ = writeln!(sdp, "o=- 0 0 IN IP4 {video_host}");
    let _ = writeln!(sdp, "s=clusterd capture");
    let _ = writeln!(sdp, "t=0 0");
    let _ = writeln!(sdp, "m=video {video_port} RTP/AVP {VIDEO_PAYLOAD_TYPE}");
    let _ = writeln!(sdp, "c=IN IP4 {video_host}");
    let _ = writeln!(
        sdp,
        "a=rtpmap:{VIDEO_PAYLOAD_TYPE} {}",
        video.rtpmap.as_deref().unwrap_or(DEFAULT_VIDEO_RTPMAP)
    );
    let _ = writeln!(sdp, "m=audio {audio_port} RTP/AVP {AUDIO_PAYLOAD_TYPE}");
    let _ = writeln!(sdp, "c=IN IP4 {audio_host}");
    let _ = writeln!(
        sdp,
        "a=rtpmap:{AUDIO_PAYLOAD_TYPE} {}",
        audio.rtpmap.as_deref().unwrap_or(DEFAULT_AUDIO_RTPMAP)
    );
    Ok(sdp)
}

fn rtp_endpoint(source: &CaptureSource) -> Result<(String, u16)> {
    let url = Url::parse(&source.url)
        .map_err(|e| Error::validation(format!("invalid {} source url '{}': {e}", source.name, source.url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::validation(format!("{} source url has no host", source.name)))?;
    let port = url
        .port()
        .ok_or_else(|| Error::validation(format!("{} source url has no port", source.name)))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_reads_url_directly() {
        let mut params = CaptureParams::single("rtmp://origin/live/a");
        params.segment_duration_secs = 4;
        let cmd = CaptureCommand::build(&params, Path::new("/m/7")).unwrap();

        assert!(cmd.session_description.is_none());
        let args = cmd.args.join(" ");
        assert!(args.contains("-rw_timeout 10000000"));
        assert!(args.contains("-i rtmp://origin/live/a"));
        assert!(args.contains("-hls_time 4"));
        assert!(args.contains("-hls_segment_type fmp4"));
        assert!(args.ends_with("/m/7/index.m3u8"));
    }

    #[test]
    fn dual_source_goes_through_sdp() {
        let mut params = CaptureParams::single("rtp://10.0.0.1:5004");
        params.sources[0].name = "video".to_string();
        params.sources.push(CaptureSource {
            name: "audio".to_string(),
            url: "rtp://10.0.0.1:5006".to_string(),
            rtpmap: Some("PCMA/8000".to_string()),
        });

        let cmd = CaptureCommand::build(&params, Path::new("/m/7")).unwrap();
        let (path, sdp) = cmd.session_description.unwrap();
        assert_eq!(path, Path::new("/m/7/input.sdp"));
        assert!(sdp.contains("m=video 5004 RTP/AVP 96"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000"));
        assert!(sdp.contains("m=audio 5006 RTP/AVP 97"));
        assert!(sdp.contains("a=rtpmap:97 PCMA/8000"));
        assert!(cmd.args.join(" ").contains("-protocol_whitelist file,udp,rtp"));
    }

    #[test]
    fn dual_source_requires_port() {
        let video = CaptureSource {
            name: "video".to_string(),
            url: "rtp://10.0.0.1".to_string(),
            rtpmap: None,
        };
        let audio = CaptureSource {
            name: "audio".to_string(),
            url: "rtp://10.0.0.1:5006".to_string(),
            rtpmap: None,
        };
        assert!(matches!(
            session_description(&video, &audio),
            Err(Error::Validation(_))
        ));
    }
}
