//! Partitioned JSONL event journal (§4.6).
//!
//! Layout: `{baseDir}/{streamId}/{symbol}/{topicDir}/[{tf}/]{runId}/{date}.jsonl`,
//! `date` taken from `tsIngest`'s UTC day. Each partition path has its own
//! monotonic `seq` starting at 1 for the life of the run. `append` is
//! synchronous (safe to call from inside a bus subscriber callback); the
//! actual file I/O happens on a background task, batched by size or time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::bus::EventBus;
use crate::journal::quality::QualityDetector;

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub base_dir: PathBuf,
    pub run_id: String,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub latency_spike_ms: i64,
}

impl JournalConfig {
    pub fn new(base_dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            run_id: run_id.into(),
            max_batch_size: 50,
            flush_interval: Duration::from_millis(200),
            latency_spike_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteFailedEvent {
    pub path: String,
    pub message: String,
}

/// Fields forbidden on a `*_raw` topic: the raw mirror of a canonical
/// event must carry no aggregation-derived metadata (§4.5).
const FORBIDDEN_RAW_FIELDS: &[&str] = &[
    "qualityFlags",
    "confidenceScore",
    "venueBreakdown",
    "sourcesUsed",
    "weightsUsed",
    "mismatchDetected",
    "staleSourcesDropped",
];

fn assert_raw_payload_is_clean(topic: &str, payload: &Value) {
    if !topic.ends_with("_raw") {
        return;
    }
    if let Value::Object(map) = payload {
        for field in FORBIDDEN_RAW_FIELDS {
            assert!(
                !map.contains_key(*field),
                "raw topic '{topic}' payload carries aggregation field '{field}'"
            );
        }
    }
}

pub struct JournalWriter {
    config: JournalConfig,
    bus: Arc<EventBus>,
    quality: QualityDetector,
    seq: Mutex<HashMap<PathBuf, u64>>,
    queue: Mutex<VecDeque<(PathBuf, String)>>,
    failed_paths: Mutex<HashSet<PathBuf>>,
    flush_notify: Notify,
}

impl JournalWriter {
    pub fn new(config: JournalConfig, bus: Arc<EventBus>) -> Arc<Self> {
        let quality = QualityDetector::new(Arc::clone(&bus), config.latency_spike_ms);
        Arc::new(Self {
            config,
            bus,
            quality,
            seq: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            failed_paths: Mutex::new(HashSet::new()),
            flush_notify: Notify::new(),
        })
    }

    /// Order-book `updateId` discontinuity check (§4.5), for callers that
    /// have the sequence number in hand before calling [`Self::append`].
    pub fn check_sequence(&self, key: &str, seq: u64) {
        self.quality.check_sequence(key, seq);
    }

    /// Trade duplicate check by `(tradeTs, tradeId)` (§4.5). Returns whether
    /// this record duplicates the immediately preceding trade for `key`.
    pub fn check_trade_duplicate(&self, key: &str, ts: i64, trade_id: Option<&str>) -> bool {
        self.quality.check_trade_duplicate(key, ts, trade_id)
    }

    pub fn partition_path(&self, stream_id: &str, symbol: &str, topic_dir: &str, tf: Option<&str>, ts_ingest_ms: i64) -> PathBuf {
        let date = Utc
            .timestamp_millis_opt(ts_ingest_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d");
        let mut path = self.config.base_dir.join(stream_id).join(symbol).join(topic_dir);
        if let Some(tf) = tf {
            path = path.join(tf);
        }
        path.join(&self.config.run_id).join(format!("{date}.jsonl"))
    }

    /// Enqueues one record. Synchronous — safe to call from a bus
    /// subscriber. Returns the `seq` assigned within this partition.
    #[allow(clippy::too_many_arguments)]
    pub fn append<T: Serialize>(
        &self,
        stream_id: &str,
        symbol: &str,
        topic: &str,
        topic_dir: &str,
        tf: Option<&str>,
        ts_ingest: i64,
        ts_exchange: Option<i64>,
        payload: &T,
    ) -> u64 {
        self.quality.check_timestamp(&format!("{topic}:{symbol}"), topic_dir, ts_exchange, ts_ingest);

        let path = self.partition_path(stream_id, symbol, topic_dir, tf, ts_ingest);
        let seq = {
            let mut seqs = self.seq.lock();
            let counter = seqs.entry(path.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let payload_value = serde_json::to_value(payload).unwrap_or(Value::Null);
        assert_raw_payload_is_clean(topic, &payload_value);

        let record = serde_json::json!({
            "seq": seq,
            "streamId": stream_id,
            "runId": self.config.run_id,
            "topic": topic,
            "symbol": symbol,
            "tsIngest": ts_ingest,
            "tsExchange": ts_exchange,
            "payload": payload_value,
        });
        let line = record.to_string();

        let should_flush_now = {
            let mut queue = self.queue.lock();
            queue.push_back((path, line));
            queue.len() >= self.config.max_batch_size
        };
        if should_flush_now {
            self.flush_notify.notify_one();
        }
        seq
    }

    /// Runs until cancelled; spawn with `tokio::spawn(writer.clone().run())`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.flush_notify.notified() => {}
            }
            self.flush_once().await;
        }
    }

    /// Drains and writes whatever is currently queued. Exposed for tests and
    /// for a clean shutdown flush.
    pub async fn flush_once(&self) {
        let batch: Vec<(PathBuf, String)> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        let mut grouped: HashMap<PathBuf, String> = HashMap::new();
        for (path, line) in batch {
            let entry = grouped.entry(path).or_default();
            entry.push_str(&line);
            entry.push('\n');
        }

        for (path, content) in grouped {
            match write_append(&path, &content).await {
                Ok(()) => {
                    self.failed_paths.lock().remove(&path);
                }
                Err(err) => self.report_write_failure(&path, &err),
            }
        }
    }

    fn report_write_failure(&self, path: &Path, err: &std::io::Error) {
        let mut failed = self.failed_paths.lock();
        let first_failure = failed.insert(path.to_path_buf());
        drop(failed);
        if first_failure {
            error!(path = %path.display(), error = %err, "journal write failed");
            self.bus.publish(
                "storage:writeFailed",
                WriteFailedEvent { path: path.display().to_string(), message: err.to_string() },
            );
        } else {
            warn!(path = %path.display(), error = %err, "journal write still failing");
        }
    }
}

async fn write_append(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(content.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Dummy {
        n: u32,
    }

    #[test]
    fn seq_increments_per_partition_starting_at_one() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let writer = JournalWriter::new(JournalConfig::new(dir.path(), "run-1"), bus);

        let seq1 = writer.append("s1", "BTCUSDT", "market:ticker", "market-ticker", None, 0, Some(0), &Dummy { n: 1 });
        let seq2 = writer.append("s1", "BTCUSDT", "market:ticker", "market-ticker", None, 1, Some(1), &Dummy { n: 2 });
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);

        let other = writer.append("s1", "ETHUSDT", "market:ticker", "market-ticker", None, 0, Some(0), &Dummy { n: 1 });
        assert_eq!(other, 1);
    }

    #[tokio::test]
    async fn flush_once_writes_queued_batch_to_disk() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let writer = JournalWriter::new(JournalConfig::new(dir.path(), "run-1"), bus);

        writer.append("s1", "BTCUSDT", "market:ticker", "market-ticker", None, 0, Some(0), &Dummy { n: 1 });
        writer.flush_once().await;

        let path = writer.partition_path("s1", "BTCUSDT", "market-ticker", None, 0);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"seq\":1"));
    }

    #[test]
    #[should_panic(expected = "aggregation field")]
    fn raw_topic_with_aggregation_field_panics() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let writer = JournalWriter::new(JournalConfig::new(dir.path(), "run-1"), bus);
        let dirty = serde_json::json!({"confidenceScore": 0.9});
        writer.append("s1", "BTCUSDT", "market:ticker_raw", "market-ticker", None, 0, Some(0), &dirty);
    }
}
