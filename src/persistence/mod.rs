//! Durable minute-aggregate storage: a bounded queue, a background batch
//! writer, and a merge-on-conflict UPSERT into SQLite. Grounded directly
//! in `backtest_v2::l2_storage::AsyncL2Recorder`'s message-driven flush
//! loop, with `rusqlite` swapped for a connection pool of `parking_lot`
//! guarded handles the way `backtest_v2` and `vault::vault_db` hold theirs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::PersistenceConfig;
use crate::model::OhlcvRecord;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS ohlcv_1min (
    symbol    TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    open      REAL NOT NULL,
    high      REAL NOT NULL,
    low       REAL NOT NULL,
    close     REAL NOT NULL,
    volume    INTEGER NOT NULL,
    PRIMARY KEY (symbol, timestamp)
);
"#;

/// Fixed-size pool of SQLite connections, guarded the way the teacher
/// guards its single `Mutex<Connection>` but extended to several handles
/// so the writer never blocks on a connection another task is using.
struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicU64,
}

impl ConnectionPool {
    fn open(db_path: &str, min_connections: usize, max_connections: usize) -> rusqlite::Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let count = max_connections.max(min_connections).max(1);
        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            let conn = Connection::open_with_flags(db_path, flags)?;
            conn.execute_batch(SCHEMA)?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicU64::new(0),
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % self.connections.len();
        let conn = self.connections[idx].lock();
        f(&conn)
    }
}

#[derive(Debug, Default)]
pub struct PersistenceStats {
    pub queued: AtomicU64,
    pub persisted: AtomicU64,
    pub batches: AtomicU64,
    pub errors: AtomicU64,
    pub connection_errors: AtomicU64,
}

impl PersistenceStats {
    pub fn snapshot(&self, started_at: Instant) -> PersistenceSnapshot {
        let persisted = self.persisted.load(Ordering::Relaxed);
        let uptime = started_at.elapsed().as_secs_f64().max(1e-9);
        PersistenceSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            persisted,
            batches: self.batches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            persistence_rate: persisted as f64 / uptime,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersistenceSnapshot {
    pub queued: u64,
    pub persisted: u64,
    pub batches: u64,
    pub errors: u64,
    pub connection_errors: u64,
    pub persistence_rate: f64,
}

enum Message {
    Record(OhlcvRecord),
    Shutdown,
}

/// Minute-keyed merge accumulator for one flush cycle: `open` is the first
/// non-zero open seen, `high`/`low` are running extremes, `close` is the
/// latest writer's close, `volume` accumulates.
fn merge(existing: Option<OhlcvRecord>, incoming: OhlcvRecord) -> OhlcvRecord {
    match existing {
        None => incoming,
        Some(mut acc) => {
            if acc.open == 0.0 && incoming.open != 0.0 {
                acc.open = incoming.open;
            }
            acc.high = acc.high.max(incoming.high);
            acc.low = acc.low.min(incoming.low);
            acc.close = incoming.close;
            acc.volume += incoming.volume;
            acc
        }
    }
}

pub struct OhlcvPersistence {
    tx: mpsc::Sender<Message>,
    stats: std::sync::Arc<PersistenceStats>,
    started_at: Instant,
}

impl OhlcvPersistence {
    pub fn spawn(config: PersistenceConfig) -> rusqlite::Result<std::sync::Arc<Self>> {
        let pool = ConnectionPool::open(&config.db_path, config.min_connections, config.max_connections)?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let stats = std::sync::Arc::new(PersistenceStats::default());
        let started_at = Instant::now();

        let worker_stats = stats.clone();
        let batch_size = config.batch_size;
        let flush_interval = Duration::from_secs(config.flush_interval_seconds);
        tokio::spawn(async move {
            run_writer(pool, rx, batch_size, flush_interval, worker_stats).await;
        });

        Ok(std::sync::Arc::new(Self { tx, stats, started_at }))
    }

    /// `submit(OHLCVRecord)`: non-blocking enqueue. Drops with a warning on
    /// a full queue rather than applying backpressure to the caller.
    pub fn submit(&self, record: OhlcvRecord) -> bool {
        match self.tx.try_send(Message::Record(record)) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                warn!("ohlcv persistence queue full, dropping record");
                false
            }
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown).await;
    }

    pub fn stats(&self) -> PersistenceSnapshot {
        self.stats.snapshot(self.started_at)
    }

    pub fn is_healthy(&self) -> bool {
        let snapshot = self.stats();
        snapshot.errors < 100
    }
}

async fn run_writer(
    pool: ConnectionPool,
    mut rx: mpsc::Receiver<Message>,
    batch_size: usize,
    flush_interval: Duration,
    stats: std::sync::Arc<PersistenceStats>,
) {
    let mut pending: Vec<OhlcvRecord> = Vec::with_capacity(batch_size);
    let mut last_flush = Instant::now();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(Message::Record(record)) => {
                        pending.push(record);
                        if pending.len() >= batch_size || last_flush.elapsed() >= flush_interval {
                            if let Some(retry) = flush(&pool, &mut pending, &stats).await {
                                requeue(&mut pending, retry, batch_size);
                            }
                            last_flush = Instant::now();
                        }
                    }
                    Some(Message::Shutdown) | None => {
                        flush(&pool, &mut pending, &stats).await;
                        info!("ohlcv persistence worker shutting down");
                        return;
                    }
                }
            }
            _ = tokio::time::sleep(flush_interval) => {
                if !pending.is_empty() {
                    if let Some(retry) = flush(&pool, &mut pending, &stats).await {
                        requeue(&mut pending, retry, batch_size);
                    }
                    last_flush = Instant::now();
                }
            }
        }
    }
}

/// Puts records dropped by a failed flush back at the front of the pending
/// buffer, bounded to `2 * batch_size` so a persistently failing store
/// can't grow the in-process buffer without limit.
fn requeue(pending: &mut Vec<OhlcvRecord>, mut retry: Vec<OhlcvRecord>, batch_size: usize) {
    let cap = batch_size * 2;
    let room = cap.saturating_sub(pending.len());
    if retry.len() > room {
        let dropped = retry.len() - room;
        warn!(dropped, "ohlcv persistence retry buffer full, dropping oldest records");
        retry.truncate(room);
    }
    retry.extend(std::mem::take(pending));
    *pending = retry;
}

/// Single merge-then-upsert pass: folds `pending` into one entry per
/// `(symbol, minute)` and issues exactly one UPSERT per distinct key.
/// Returns the records to retry on the next flush when the write fails.
async fn flush(
    pool: &ConnectionPool,
    pending: &mut Vec<OhlcvRecord>,
    stats: &PersistenceStats,
) -> Option<Vec<OhlcvRecord>> {
    if pending.is_empty() {
        return None;
    }

    let mut merged: HashMap<(String, i64), OhlcvRecord> = HashMap::new();
    for record in pending.drain(..) {
        let key = (record.ticker.clone(), record.minute_timestamp());
        let entry = merged.remove(&key);
        merged.insert(key, merge(entry, record));
    }

    let result = pool.with_connection(|conn| {
        let tx = conn.unchecked_transaction()?;
        for ((symbol, minute), record) in merged.iter() {
            tx.execute(
                "INSERT INTO ohlcv_1min (symbol, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(symbol, timestamp) DO UPDATE SET
                     high = MAX(high, excluded.high),
                     low = MIN(low, excluded.low),
                     close = excluded.close,
                     volume = volume + excluded.volume",
                params![symbol, minute, record.open, record.high, record.low, record.close, record.volume as i64],
            )?;
        }
        tx.commit()
    });

    match result {
        Ok(()) => {
            stats.persisted.fetch_add(merged.len() as u64, Ordering::Relaxed);
            stats.batches.fetch_add(1, Ordering::Relaxed);
            None
        }
        Err(err) => {
            warn!(error = %err, "ohlcv batch upsert failed");
            stats.errors.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Some(merged.into_values().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticker: &str, minute: f64, o: f64, h: f64, l: f64, c: f64, v: u64) -> OhlcvRecord {
        let mut r = OhlcvRecord::new(ticker, minute, o.max(0.01), h, l, c, v, v.max(1) as f64).unwrap();
        r.open = o;
        r
    }

    #[test]
    fn merge_rule_combines_extremes_and_sums_volume() {
        let first = record("MSFT", 60.0, 300.0, 301.0, 299.0, 300.0, 1000);
        let second = record("MSFT", 60.0, 0.0, 302.0, 298.0, 301.0, 500);
        let merged = merge(Some(first), second);
        assert_eq!(merged.open, 300.0);
        assert_eq!(merged.high, 302.0);
        assert_eq!(merged.low, 298.0);
        assert_eq!(merged.close, 301.0);
        assert_eq!(merged.volume, 1500);
    }

    #[tokio::test]
    async fn submit_and_flush_persists_merged_row() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_string_lossy().to_string();
        let config = PersistenceConfig {
            db_path,
            batch_size: 10,
            flush_interval_seconds: 3600,
            queue_capacity: 100,
            min_connections: 1,
            max_connections: 2,
            connect_timeout_seconds: 10,
        };
        let persistence = OhlcvPersistence::spawn(config).unwrap();

        persistence.submit(record("MSFT", 60.0, 300.0, 301.0, 299.0, 300.0, 1000));
        persistence.submit(record("MSFT", 60.0, 0.0, 302.0, 298.0, 301.0, 500));
        persistence.shutdown().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(persistence.stats().persisted, 1);
    }
}
