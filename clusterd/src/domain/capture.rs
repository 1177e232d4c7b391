//! Capture job parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// A named source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSource {
    /// `video` / `audio` in dual-source mode, free-form otherwise.
    #[serde(default)]
    pub name: String,
    pub url: String,
    /// RTP payload mapping used when the source is part of a session
    /// description, e.g. `H264/90000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtpmap: Option<String>,
}

/// Parameters of a `capture` job, stored as the job metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    pub sources: Vec<CaptureSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Overrides rule-based and default notification targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    /// Overrides the media root for this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u32,
    /// Seconds between intermediate artifacts; 0 disables them.
    #[serde(default)]
    pub artifact_interval_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub stream_name: String,
}

fn default_segment_duration_secs() -> u32 {
    6
}

fn default_io_timeout_secs() -> u64 {
    10
}

/// What the capture process reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput<'a> {
    Single(&'a CaptureSource),
    Dual {
        video: &'a CaptureSource,
        audio: &'a CaptureSource,
    },
}

impl CaptureParams {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            sources: vec![CaptureSource {
                name: String::new(),
                url: url.into(),
                rtpmap: None,
            }],
            start_time: None,
            end_time: None,
            notify_url: None,
            storage_path: None,
            segment_duration_secs: default_segment_duration_secs(),
            artifact_interval_secs: 0,
            io_timeout_secs: default_io_timeout_secs(),
            domain_name: String::new(),
            app_name: String::new(),
            stream_name: String::new(),
        }
    }

    /// Resolve the source list into a capture input.
    ///
    /// Two sources must be named `video` and `audio`.
    pub fn input(&self) -> Result<CaptureInput<'_>> {
        for source in &self.sources {
            if source.url.trim().is_empty() {
                return Err(Error::validation("missing source url"));
            }
        }

        match self.sources.as_slice() {
            [] => Err(Error::validation("missing source url")),
            [source] => Ok(CaptureInput::Single(source)),
            [a, b] => {
                let find = |name: &str| [a, b].into_iter().find(|s| s.name == name);
                match (find("video"), find("audio")) {
                    (Some(video), Some(audio)) => Ok(CaptureInput::Dual { video, audio }),
                    _ => Err(Error::validation(
                        "dual-source capture requires sources named 'video' and 'audio'",
                    )),
                }
            }
            _ => Err(Error::validation(format!(
                "at most two sources are supported, got {}",
                self.sources.len()
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.input()?;
        if self.segment_duration_secs == 0 {
            return Err(Error::validation("segment duration must be positive"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && end <= start
        {
            return Err(Error::validation("end time must be after start time"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, url: &str) -> CaptureSource {
        CaptureSource {
            name: name.to_string(),
            url: url.to_string(),
            rtpmap: None,
        }
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let params: CaptureParams =
            serde_json::from_str(r#"{"sources":[{"url":"rtmp://live/app/s"}]}"#).unwrap();
        assert_eq!(params.segment_duration_secs, 6);
        assert_eq!(params.io_timeout_secs, 10);
        assert_eq!(params.artifact_interval_secs, 0);
        assert!(matches!(params.input().unwrap(), CaptureInput::Single(_)));
    }

    #[test]
    fn dual_sources_resolve_by_name() {
        let mut params = CaptureParams::single("unused");
        params.sources = vec![source("audio", "rtp://10.0.0.1:5004"), source("video", "rtp://10.0.0.1:5006")];

        match params.input().unwrap() {
            CaptureInput::Dual { video, audio } => {
                assert_eq!(video.url, "rtp://10.0.0.1:5006");
                assert_eq!(audio.url, "rtp://10.0.0.1:5004");
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_source_sets() {
        let mut params = CaptureParams::single("");
        assert!(params.validate().is_err());

        params.sources = vec![source("a", "rtp://h:1"), source("b", "rtp://h:2")];
        assert!(params.validate().is_err());

        params.sources = vec![source("video", "x"), source("audio", "y"), source("z", "w")];
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_inverted_window() {
        let mut params = CaptureParams::single("rtmp://live/app/s");
        let now = Utc::now();
        params.start_time = Some(now);
        params.end_time = Some(now);
        assert!(params.validate().is_err());

        params.end_time = Some(now + chrono::Duration::seconds(1));
        assert!(params.validate().is_ok());
    }
}
