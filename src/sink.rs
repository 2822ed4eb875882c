// =============================================================================
// Version Sink — durable snapshots of parameter versions (SQLite)
// =============================================================================
//
// One table, upsert by version id. The sink is an optional collaborator: the
// agent writes through it off the hot path and treats failures as log lines,
// never as control flow.
// =============================================================================

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Snapshot of one version together with its latest simulation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub symbol: String,
    pub version_name: String,
    /// Serialised GraphConfig.
    pub config_json: String,
    pub score: f64,
    pub winrate: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub duration_seconds: i64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub is_active: bool,
    /// RFC 3339.
    pub created_at: String,
}

pub struct VersionSink {
    conn: Mutex<Connection>,
}

impl VersionSink {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open version sink at {path}"))?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.init()?;
        info!(path, "version sink opened");
        Ok(sink)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS versions (
                    id TEXT PRIMARY KEY,
                    symbol TEXT NOT NULL,
                    version_name TEXT NOT NULL,
                    config_json TEXT NOT NULL,
                    score REAL NOT NULL,
                    winrate REAL NOT NULL,
                    total_trades INTEGER NOT NULL,
                    winning_trades INTEGER NOT NULL,
                    losing_trades INTEGER NOT NULL,
                    total_pnl REAL NOT NULL,
                    total_pnl_percent REAL NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    initial_capital REAL NOT NULL,
                    final_capital REAL NOT NULL,
                    is_active INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_versions_symbol
                    ON versions (symbol, created_at);",
            )
            .context("failed to initialise version sink schema")?;
        Ok(())
    }

    /// Insert or update one version snapshot, keyed by id.
    pub fn upsert_version(&self, record: &VersionRecord) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO versions (
                    id, symbol, version_name, config_json, score, winrate,
                    total_trades, winning_trades, losing_trades, total_pnl,
                    total_pnl_percent, duration_seconds, initial_capital,
                    final_capital, is_active, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                ON CONFLICT(id) DO UPDATE SET
                    version_name = excluded.version_name,
                    config_json = excluded.config_json,
                    score = excluded.score,
                    winrate = excluded.winrate,
                    total_trades = excluded.total_trades,
                    winning_trades = excluded.winning_trades,
                    losing_trades = excluded.losing_trades,
                    total_pnl = excluded.total_pnl,
                    total_pnl_percent = excluded.total_pnl_percent,
                    duration_seconds = excluded.duration_seconds,
                    initial_capital = excluded.initial_capital,
                    final_capital = excluded.final_capital,
                    is_active = excluded.is_active",
                params![
                    record.id,
                    record.symbol,
                    record.version_name,
                    record.config_json,
                    record.score,
                    record.winrate,
                    record.total_trades,
                    record.winning_trades,
                    record.losing_trades,
                    record.total_pnl,
                    record.total_pnl_percent,
                    record.duration_seconds,
                    record.initial_capital,
                    record.final_capital,
                    record.is_active as i64,
                    record.created_at,
                ],
            )
            .context("failed to upsert version record")?;
        Ok(())
    }

    /// All stored versions for `symbol`, oldest first.
    pub fn load_all(&self, symbol: &str) -> Result<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, symbol, version_name, config_json, score, winrate,
                        total_trades, winning_trades, losing_trades, total_pnl,
                        total_pnl_percent, duration_seconds, initial_capital,
                        final_capital, is_active, created_at
                 FROM versions WHERE symbol = ?1 ORDER BY created_at ASC",
            )
            .context("failed to prepare version query")?;

        let rows = stmt
            .query_map(params![symbol], |row| {
                Ok(VersionRecord {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                    version_name: row.get(2)?,
                    config_json: row.get(3)?,
                    score: row.get(4)?,
                    winrate: row.get(5)?,
                    total_trades: row.get(6)?,
                    winning_trades: row.get(7)?,
                    losing_trades: row.get(8)?,
                    total_pnl: row.get(9)?,
                    total_pnl_percent: row.get(10)?,
                    duration_seconds: row.get(11)?,
                    initial_capital: row.get(12)?,
                    final_capital: row.get(13)?,
                    is_active: row.get::<_, i64>(14)? != 0,
                    created_at: row.get(15)?,
                })
            })
            .context("failed to read version records")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("corrupt version record")?);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for VersionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSink").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, score: f64) -> VersionRecord {
        VersionRecord {
            id: id.to_string(),
            symbol: "BTC-USD".to_string(),
            version_name: "v1_initial".to_string(),
            config_json: "{}".to_string(),
            score,
            winrate: 55.0,
            total_trades: 4,
            winning_trades: 3,
            losing_trades: 1,
            total_pnl: 1.25,
            total_pnl_percent: 0.125,
            duration_seconds: 30,
            initial_capital: 1000.0,
            final_capital: 1001.25,
            is_active: true,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn open_temp() -> (tempfile::TempDir, VersionSink) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.db");
        let sink = VersionSink::open(path.to_str().unwrap()).unwrap();
        (dir, sink)
    }

    #[test]
    fn roundtrip_single_record() {
        let (_dir, sink) = open_temp();
        sink.upsert_version(&record("aaa", 60.0)).unwrap();

        let loaded = sink.load_all("BTC-USD").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "aaa");
        assert!((loaded[0].score - 60.0).abs() < 1e-12);
        assert!(loaded[0].is_active);
    }

    #[test]
    fn upsert_overwrites_by_id() {
        let (_dir, sink) = open_temp();
        sink.upsert_version(&record("aaa", 60.0)).unwrap();
        sink.upsert_version(&record("aaa", 75.0)).unwrap();

        let loaded = sink.load_all("BTC-USD").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!((loaded[0].score - 75.0).abs() < 1e-12);
    }

    #[test]
    fn load_filters_by_symbol() {
        let (_dir, sink) = open_temp();
        sink.upsert_version(&record("aaa", 60.0)).unwrap();
        let mut other = record("bbb", 40.0);
        other.symbol = "ETH-USD".to_string();
        sink.upsert_version(&other).unwrap();

        assert_eq!(sink.load_all("BTC-USD").unwrap().len(), 1);
        assert_eq!(sink.load_all("ETH-USD").unwrap().len(), 1);
        assert!(sink.load_all("DOGE-USD").unwrap().is_empty());
    }

    #[test]
    fn load_orders_by_creation_time() {
        let (_dir, sink) = open_temp();
        let mut older = record("old", 50.0);
        older.created_at = "2026-01-01T00:00:00Z".to_string();
        let mut newer = record("new", 55.0);
        newer.created_at = "2026-01-02T00:00:00Z".to_string();
        sink.upsert_version(&newer).unwrap();
        sink.upsert_version(&older).unwrap();

        let loaded = sink.load_all("BTC-USD").unwrap();
        assert_eq!(loaded[0].id, "old");
        assert_eq!(loaded[1].id, "new");
    }
}
