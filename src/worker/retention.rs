use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::dispatcher::job::JobStatus;

/// Periodically deletes job output files that have not been written to for
/// longer than the configured maximum age.
pub struct RetentionSweeper {
    logs_dir: PathBuf,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(logs_dir: impl Into<PathBuf>, config: RetentionConfig) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            config,
        }
    }

    /// Sweep on every interval tick until `shutdown` fires.
    ///
    /// The output of the job currently held in `status` is always kept.
    pub async fn run(&self, status: watch::Receiver<JobStatus>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let current = status.borrow().id.clone();
                    let removed = self.sweep_once(Some(current.as_str())).await;
                    if removed > 0 {
                        tracing::info!(removed, "Evicted stale job output files");
                    }
                }
            }
        }
    }

    /// One pass over the logs directory. Returns how many files were removed.
    pub async fn sweep_once(&self, keep_job: Option<&str>) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.logs_dir.display(), error = %e, "Cannot scan logs directory");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error while scanning logs directory");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("out") {
                continue;
            }
            let stem = path.file_stem().and_then(|stem| stem.to_str());
            if stem.is_some() && stem == keep_job {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            // Timestamps in the future count as fresh
            let age = now.duration_since(modified).unwrap_or_default();
            if age < self.config.max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), age_secs = age.as_secs(), "Removed job output");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove job output");
                }
            }
        }

        removed
    }
}
