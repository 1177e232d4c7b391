//! Periodic cutting of intermediate artifacts from the live index.
//!
//! Each artifact is a VOD playlist over the segments that appeared since the
//! previous cut, sharing the live recording's init segment.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::report_queue::ReportQueue;
use crate::domain::StatusReport;
use crate::media::{self, INDEX_PLAYLIST, MediaIndex, MediaTotals};
use crate::{Error, Result};

/// A cut artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub number: u32,
    pub playlist: PathBuf,
    pub totals: MediaTotals,
    pub segment_count: usize,
}

impl Artifact {
    pub fn download_name(&self) -> String {
        media::artifact_download_name(self.number)
    }
}

pub struct ArtifactCutter {
    dir: PathBuf,
    next_number: u32,
    last_segment: Option<String>,
}

impl ArtifactCutter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_number: 1,
            last_segment: None,
        }
    }

    /// Cut the next artifact from the current live index, if it has grown.
    pub async fn cut(&mut self) -> Result<Option<Artifact>> {
        let live = match MediaIndex::read(&self.dir.join(INDEX_PLAYLIST)).await {
            Ok(index) => index,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        self.cut_from(&live).await
    }

    pub async fn cut_from(&mut self, live: &MediaIndex) -> Result<Option<Artifact>> {
        let new_segments = match &self.last_segment {
            None => live.segments.as_slice(),
            Some(last) => match live.position_of(last) {
                Some(pos) => &live.segments[pos + 1..],
                None => {
                    warn!(segment = %last, "previous artifact's last segment not in live index, skipping");
                    return Ok(None);
                }
            },
        };
        if new_segments.is_empty() {
            return Ok(None);
        }

        let index = MediaIndex {
            init: live.init.clone(),
            segments: new_segments.to_vec(),
            ended: true,
        };
        let number = self.next_number;
        let playlist = self.dir.join(media::artifact_playlist_name(number));
        index.write_vod(&playlist).await?;
        let totals = index.measure(&self.dir).await;

        self.next_number += 1;
        self.last_segment = index.segments.last().map(|s| s.uri.clone());

        debug!(
            artifact = number,
            segments = index.segments.len(),
            size = totals.size,
            "artifact cut"
        );
        Ok(Some(Artifact {
            number,
            playlist,
            totals,
            segment_count: index.segments.len(),
        }))
    }
}

/// Cut and report artifacts every `interval` until `cancel` fires.
pub async fn run_artifact_loop(
    job_id: i64,
    mut cutter: ArtifactCutter,
    interval: Duration,
    reports: ReportQueue,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match cutter.cut().await {
            Ok(Some(artifact)) => reports.enqueue(StatusReport::artifact(
                job_id,
                artifact.download_name(),
                artifact.totals.size,
                artifact.totals.duration_ms,
            )),
            Ok(None) => {}
            Err(e) => warn!(job_id, error = %e, "artifact cut failed"),
        }
    }
    debug!(job_id, "artifact loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SegmentEntry;

    fn live(segments: &[&str]) -> MediaIndex {
        MediaIndex {
            init: Some("init.mp4".to_string()),
            segments: segments
                .iter()
                .map(|uri| SegmentEntry {
                    uri: uri.to_string(),
                    duration: 2.0,
                })
                .collect(),
            ended: false,
        }
    }

    #[tokio::test]
    async fn first_cut_takes_everything_then_only_new_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut cutter = ArtifactCutter::new(dir.path());

        assert!(cutter.cut_from(&live(&[])).await.unwrap().is_none());

        let first = cutter.cut_from(&live(&["0.m4s", "1.m4s"])).await.unwrap().unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(first.segment_count, 2);
        assert_eq!(first.download_name(), "1.mp4");
        assert_eq!(first.totals.duration_ms, 4000);
        assert!(dir.path().join("1.m3u8").exists());

        assert!(cutter.cut_from(&live(&["0.m4s", "1.m4s"])).await.unwrap().is_none());

        let second = cutter
            .cut_from(&live(&["0.m4s", "1.m4s", "2.m4s"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.number, 2);
        let written = MediaIndex::read(&second.playlist).await.unwrap();
        assert_eq!(written.segments.len(), 1);
        assert_eq!(written.segments[0].uri, "2.m4s");
        assert_eq!(written.init.as_deref(), Some("init.mp4"));
    }

    #[tokio::test]
    async fn lost_anchor_skips_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut cutter = ArtifactCutter::new(dir.path());
        cutter.cut_from(&live(&["0.m4s"])).await.unwrap().unwrap();

        assert!(cutter.cut_from(&live(&["5.m4s", "6.m4s"])).await.unwrap().is_none());
        assert_eq!(cutter.next_number, 2);
    }

    #[tokio::test]
    async fn missing_live_index_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cutter = ArtifactCutter::new(dir.path());
        assert!(cutter.cut().await.unwrap().is_none());
    }
}
