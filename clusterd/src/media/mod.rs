//! On-disk layout of a capture.
//!
//! Each job records into `<root>/<job id>/`: the live playlist
//! `index.m3u8`, the shared `init.mp4`, numbered `.m4s` segments, numbered
//! artifact playlists `<n>.m3u8` and the capture process logs.

pub mod concat;
pub mod playlist;

use std::path::{Path, PathBuf};

pub use concat::ConcatPlan;
pub use playlist::{MediaIndex, MediaTotals, SegmentEntry};

use crate::{Error, Result};

pub const INDEX_PLAYLIST: &str = "index.m3u8";
pub const INIT_SEGMENT: &str = "init.mp4";
pub const SEGMENT_PATTERN: &str = "%d.m4s";
pub const STDOUT_LOG: &str = "ffmpeg.stdout.log";
pub const STDERR_LOG: &str = "ffmpeg.stderr.log";
pub const SESSION_DESCRIPTION: &str = "input.sdp";

pub fn job_dir(root: &Path, job_id: i64) -> PathBuf {
    root.join(job_id.to_string())
}

/// Playlist path for a download name.
///
/// `None` means the full recording. Artifact names are stems such as `3` or
/// `3.mp4`; anything outside `[A-Za-z0-9_-]` is rejected.
pub fn playlist_for(dir: &Path, artifact: Option<&str>) -> Result<PathBuf> {
    let Some(name) = artifact else {
        return Ok(dir.join(INDEX_PLAYLIST));
    };
    let stem = name.strip_suffix(".mp4").unwrap_or(name);
    let valid = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(Error::validation(format!("invalid artifact name '{name}'")));
    }
    Ok(dir.join(format!("{stem}.m3u8")))
}

pub fn artifact_playlist_name(number: u32) -> String {
    format!("{number}.m3u8")
}

pub fn artifact_download_name(number: u32) -> String {
    format!("{number}.mp4")
}
