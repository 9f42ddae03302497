use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ESTIMATE_SECONDS_PER_MEGABYTE: f64 = 10.0;

/// Determines clip durations by asking ffprobe, with a size-based estimate
/// when the probe fails or times out.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    timeout: Duration,
}

impl Default for MediaProbe {
    fn default() -> Self {
        Self { timeout: PROBE_TIMEOUT }
    }
}

impl MediaProbe {
    /// Duration of `path` in seconds. Never errors: probe failures fall
    /// through to the size estimate, and an unreadable file reports 0.
    pub async fn clip_duration(&self, path: &Path) -> f64 {
        match self.ffprobe_duration(path).await {
            Some(seconds) => seconds,
            None => {
                let estimate = estimate_duration_from_size(path);
                debug!(
                    "Probe failed for {}, estimating {:.1}s from file size",
                    path.display(),
                    estimate
                );
                estimate
            }
        }
    }

    async fn ffprobe_duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("Failed to run ffprobe: {}", e);
                return None;
            }
            Err(_) => {
                warn!("ffprobe timed out after {:?} for {}", self.timeout, path.display());
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            );
            return None;
        }

        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

/// Crude approximation kept for compatibility: 10 seconds per megabyte.
/// This is a rough guess, not a measured duration.
pub fn estimate_duration_from_size(path: &Path) -> f64 {
    match std::fs::metadata(path) {
        Ok(meta) => (meta.len() as f64 / (1024.0 * 1024.0)) * ESTIMATE_SECONDS_PER_MEGABYTE,
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_size_estimate_is_ten_seconds_per_megabyte() {
        // Approximation only: 2 MiB of anything reads as twenty seconds
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("falcon_120000_visit.mp4");
        fs::write(&path, vec![0u8; 2 * 1024 * 1024]).unwrap();

        let estimate = estimate_duration_from_size(&path);
        assert!((estimate - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_size_estimate_for_missing_file_is_zero() {
        assert_eq!(estimate_duration_from_size(Path::new("/no/such/file.mp4")), 0.0);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_estimate_on_non_media_file() {
        // Not a real video, so ffprobe (if present at all) rejects it and
        // the size estimate applies.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("falcon_120000_visit.mp4");
        fs::write(&path, vec![0u8; 1024 * 1024]).unwrap();

        let probe = MediaProbe::default();
        let duration = probe.clip_duration(&path).await;
        assert!((duration - 10.0).abs() < f64::EPSILON);
    }
}
