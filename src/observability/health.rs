//! Health reporter: periodic JSONL snapshots to `{log_dir}/health.jsonl`,
//! size-rotated (default 10 MiB, 5 files), mirroring the journal writer's
//! `tokio::fs`-driven async loop but for a single append-only file instead
//! of per-partition ones.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::observability::tap::EventTap;

#[derive(Debug, Clone, Serialize)]
struct HealthSnapshot {
    ts_ms: i64,
    counters: HashMap<&'static str, u64>,
    degraded_sources: Vec<String>,
}

pub struct HealthReporterConfig {
    pub log_dir: PathBuf,
    pub interval: std::time::Duration,
    pub rotate_max_bytes: u64,
    pub rotate_max_files: u32,
}

/// Samples [`EventTap`] and a caller-supplied degraded-source lister on a
/// fixed interval, appending one JSON line per sample and rotating the file
/// by size.
pub struct HealthReporter {
    config: HealthReporterConfig,
    tap: Arc<EventTap>,
    degraded_sources: Box<dyn Fn() -> Vec<String> + Send + Sync>,
}

impl HealthReporter {
    pub fn new(
        config: HealthReporterConfig,
        tap: Arc<EventTap>,
        degraded_sources: impl Fn() -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self { config, tap, degraded_sources: Box::new(degraded_sources) }
    }

    fn path(&self) -> PathBuf {
        self.config.log_dir.join("health.jsonl")
    }

    /// Runs until the supplied shutdown signal resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sample_once().await {
                        tracing::warn!(error = %err, "health snapshot write failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    pub async fn sample_once(&self) -> std::io::Result<()> {
        let snapshot = HealthSnapshot {
            ts_ms: crate::bus::now_ms(),
            counters: self.tap.snapshot(),
            degraded_sources: (self.degraded_sources)(),
        };

        tokio::fs::create_dir_all(&self.config.log_dir).await?;
        self.rotate_if_needed().await?;

        let line = serde_json::to_string(&snapshot).unwrap_or_default();
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(self.path()).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let path = self.path();
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.config.rotate_max_bytes {
            return Ok(());
        }

        for idx in (1..self.config.rotate_max_files).rev() {
            let from = rotated_path(&path, idx);
            let to = rotated_path(&path, idx + 1);
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(&from, &to).await;
            }
        }
        tokio::fs::rename(&path, rotated_path(&path, 1)).await
    }
}

fn rotated_path(base: &Path, idx: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{idx}"));
    PathBuf::from(name)
}
