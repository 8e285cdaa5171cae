//! Polling progress estimation.
//!
//! Backends do not report progress, so it is estimated from what has been
//! written so far: the duration of a partially written file, the number of
//! HLS segments on disk, or the number of storyboard frames done. Estimates
//! are capped at 99; only completion reports 100.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sv_av::MediaProbe;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Highest value an estimate may report.
pub const MAX_ESTIMATE: u8 = 99;

/// `min(99, floor(done / total * 100))`, or 0 when `total` is not positive.
pub fn percent_of(done: f64, total: f64) -> u8 {
    if total <= 0.0 || done <= 0.0 {
        return 0;
    }
    let pct = (done / total * 100.0).floor();
    if pct >= f64::from(MAX_ESTIMATE) {
        MAX_ESTIMATE
    } else {
        pct as u8
    }
}

pub fn duration_percent(current: Duration, total: Duration) -> u8 {
    percent_of(current.as_secs_f64(), total.as_secs_f64())
}

pub fn segment_percent(segments: usize, segment_secs: u32, total: Duration) -> u8 {
    let covered = segments as f64 * f64::from(segment_secs);
    percent_of(covered, total.as_secs_f64())
}

pub fn frame_percent(done: u32, count: u32) -> u8 {
    percent_of(f64::from(done), f64::from(count))
}

/// Number of finished `.ts` segments in `dir` whose names start with `prefix`.
pub async fn count_segments(dir: &Path, prefix: &str) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".ts") {
            count += 1;
        }
    }
    Ok(count)
}

/// Where an in-flight estimate comes from.
pub enum ProgressSource {
    /// Re-probe the output as it is being written.
    PartialOutput {
        path: PathBuf,
        total: Duration,
        prober: Arc<dyn MediaProbe>,
    },
    /// Count segments of one rung (the lowest, which finishes last).
    HlsSegments {
        dir: PathBuf,
        prefix: String,
        segment_secs: u32,
        total: Duration,
    },
}

impl ProgressSource {
    /// Take one sample.
    pub async fn sample(&self) -> sv_core::Result<u8> {
        match self {
            Self::PartialOutput { path, total, prober } => {
                let info = prober.probe(path).await?;
                Ok(duration_percent(
                    Duration::from_millis(info.duration_ms),
                    *total,
                ))
            }
            Self::HlsSegments {
                dir,
                prefix,
                segment_secs,
                total,
            } => {
                let n = count_segments(dir, prefix).await?;
                Ok(segment_percent(n, *segment_secs, *total))
            }
        }
    }
}

/// Receives samples for one job.
pub trait ProgressSink: Send + Sync {
    /// Whether the job is still processing. Polling stops once this is false.
    fn is_processing(&self) -> bool;

    fn report(&self, percent: u8);
}

/// Sample `source` every `interval` until `cancel` fires or the job leaves
/// processing. Failed samples are skipped.
pub fn spawn_poller(
    source: ProgressSource,
    interval: Duration,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing is written yet.
        ticker.tick().await;

        loop {
            if cancel.is_cancelled() || !sink.is_processing() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !sink.is_processing() {
                break;
            }

            let sample = tokio::select! {
                _ = cancel.cancelled() => break,
                sample = source.sample() => sample,
            };
            match sample {
                Ok(pct) => {
                    // Re-check: the job may have settled while sampling.
                    if !cancel.is_cancelled() && sink.is_processing() {
                        sink.report(pct);
                    }
                }
                Err(e) => tracing::trace!(error = %e, "progress sample skipped"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn estimates_are_floored_and_capped() {
        assert_eq!(percent_of(0.0, 100.0), 0);
        assert_eq!(percent_of(33.9, 100.0), 33);
        assert_eq!(percent_of(100.0, 100.0), 99);
        assert_eq!(percent_of(250.0, 100.0), 99);
        assert_eq!(percent_of(5.0, 0.0), 0);
        assert_eq!(duration_percent(Duration::from_secs(30), Duration::from_secs(60)), 50);
        assert_eq!(segment_percent(4, 6, Duration::from_secs(60)), 40);
        assert_eq!(segment_percent(20, 6, Duration::from_secs(60)), 99);
        assert_eq!(frame_percent(3, 10), 30);
        assert_eq!(frame_percent(10, 10), 99);
    }

    #[tokio::test]
    async fn counts_only_matching_segments() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["m_240p_000.ts", "m_240p_001.ts", "m_360p_000.ts", "m_240p.m3u8"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(count_segments(dir.path(), "m_240p_").await.unwrap(), 2);
        assert!(count_segments(&dir.path().join("missing"), "m_").await.is_err());
    }

    struct RecordingSink {
        processing: AtomicBool,
        reports: Mutex<Vec<u8>>,
    }

    impl ProgressSink for RecordingSink {
        fn is_processing(&self) -> bool {
            self.processing.load(Ordering::SeqCst)
        }

        fn report(&self, percent: u8) {
            self.reports.lock().push(percent);
        }
    }

    #[tokio::test]
    async fn poller_stops_when_job_leaves_processing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m_240p_000.ts"), b"x").unwrap();
        let sink = Arc::new(RecordingSink {
            processing: AtomicBool::new(true),
            reports: Mutex::new(Vec::new()),
        });
        let source = ProgressSource::HlsSegments {
            dir: dir.path().to_path_buf(),
            prefix: "m_240p_".into(),
            segment_secs: 6,
            total: Duration::from_secs(60),
        };

        let handle = spawn_poller(
            source,
            Duration::from_millis(20),
            sink.clone(),
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        sink.processing.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let reports = sink.reports.lock().clone();
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|p| *p == 10));
    }

    #[tokio::test]
    async fn poller_stops_on_cancel() {
        let sink = Arc::new(RecordingSink {
            processing: AtomicBool::new(true),
            reports: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let handle = spawn_poller(
            ProgressSource::HlsSegments {
                dir: PathBuf::from("/nonexistent"),
                prefix: "x_".into(),
                segment_secs: 6,
                total: Duration::from_secs(60),
            },
            Duration::from_secs(3600),
            sink.clone(),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(sink.reports.lock().is_empty());
    }
}
