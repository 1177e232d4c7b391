//! Reading and writing fMP4 HLS media playlists.

use std::fmt::Write as _;
use std::path::Path;

use m3u8_rs::Playlist;
use tracing::warn;

use crate::{Error, Result};

/// One media segment as listed in a playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub uri: String,
    /// Seconds.
    pub duration: f32,
}

/// Parsed media playlist: the shared init segment and the segment list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaIndex {
    pub init: Option<String>,
    pub segments: Vec<SegmentEntry>,
    pub ended: bool,
}

/// Cumulative size and duration of a set of segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaTotals {
    pub size: u64,
    pub duration_ms: u64,
}

impl MediaIndex {
    pub fn parse(input: &[u8]) -> Result<Self> {
        let playlist = match m3u8_rs::parse_playlist_res(input) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(Error::Playlist("expected a media playlist".to_string()));
            }
            Err(e) => return Err(Error::Playlist(format!("parse failed: {e:?}"))),
        };

        let init = playlist
            .segments
            .iter()
            .find_map(|s| s.map.as_ref().map(|m| m.uri.clone()));
        let segments = playlist
            .segments
            .iter()
            .filter(|s| !s.uri.is_empty())
            .map(|s| SegmentEntry {
                uri: s.uri.clone(),
                duration: s.duration,
            })
            .collect();

        Ok(Self {
            init,
            segments,
            ended: playlist.end_list,
        })
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::parse(&bytes).map_err(|e| Error::Playlist(format!("{}: {e}", path.display())))
    }

    /// Index of the segment with `uri`, searching from the end.
    pub fn position_of(&self, uri: &str) -> Option<usize> {
        self.segments.iter().rposition(|s| s.uri == uri)
    }

    pub fn duration_ms(&self) -> u64 {
        let secs: f64 = self.segments.iter().map(|s| s.duration as f64).sum();
        (secs * 1000.0).round() as u64
    }

    /// Render as a finished VOD playlist.
    pub fn to_vod_string(&self) -> String {
        let target_duration = self
            .segments
            .iter()
            .map(|s| s.duration)
            .fold(0.0, f32::max)
            .ceil() as u32;

        let mut out = String::new();
        let _ = writeln!(out, "#EXTM3U");
        let _ = writeln!(out, "#EXT-X-VERSION:7");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", target_duration.max(1));
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0");
        let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");
        if let Some(init) = &self.init {
            let _ = writeln!(out, "#EXT-X-MAP:URI=\"{init}\"");
        }
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.3},", segment.duration);
            let _ = writeln!(out, "{}", segment.uri);
        }
        let _ = writeln!(out, "#EXT-X-ENDLIST");
        out
    }

    /// Write atomically (temp file + rename) so readers never see a partial playlist.
    pub async fn write_vod(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("m3u8.tmp");
        tokio::fs::write(&tmp, self.to_vod_string()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Sum the init segment and segment files under `dir`.
    ///
    /// Missing files are logged and skipped.
    pub async fn measure(&self, dir: &Path) -> MediaTotals {
        let mut size = 0u64;
        let files = self
            .init
            .iter()
            .map(String::as_str)
            .chain(self.segments.iter().map(|s| s.uri.as_str()));
        for name in files {
            let path = dir.join(name);
            match tokio::fs::metadata(&path).await {
                Ok(meta) => size += meta.len(),
                Err(e) => warn!(path = %path.display(), error = %e, "segment missing, skipped from size"),
            }
        }
        MediaTotals {
            size,
            duration_ms: self.duration_ms(),
        }
    }
}
