//! SQLite persistence for daily bars.
//!
//! Three tables, one per asset class, keyed logically by `(ticker, date)`.
//! The tables carry no UNIQUE constraint on that key; the bulk upsert inserts
//! only rows whose key is absent and leaves existing rows alone.

use super::pool::ConnectionPool;
use super::store::TimeSeriesStore;
use crate::config::{AnomalyPolicy, StoreConfig};
use crate::error::StoreError;
use crate::types::{AssetClass, Bar, DateRange, InstrumentRef, NormalizedBatch, TableId};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use tracing::{debug, info, warn};

/// Rows per INSERT statement. Keeps bound parameters well under SQLite's limit.
const CHUNK_ROWS: usize = 500;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite store for OHLCV bars.
pub struct SqliteStore {
    pool: ConnectionPool,
    anomaly_policy: AnomalyPolicy,
}

impl SqliteStore {
    /// Open (creating if needed) the database and its tables.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self {
            pool: ConnectionPool::new(config)?,
            anomaly_policy: config.anomaly_policy,
        };
        store.pool.interact(init_schema).await?;

        info!(
            "SQLite store initialized at {} (pool size {}, anomaly policy {:?})",
            config.path.display(),
            store.pool.size(),
            store.anomaly_policy
        );
        Ok(store)
    }

    /// Close the connection pool. Later calls fail with `PoolClosed`.
    pub fn close(&self) {
        self.pool.close();
        debug!("SQLite store closed");
    }

    // ========== Read Methods ==========

    /// Distinct symbols stored for an asset class, sorted.
    pub async fn available_tickers(&self, asset_class: AssetClass) -> Result<Vec<String>, StoreError> {
        let table = asset_class.table();
        self.pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT ticker FROM {} ORDER BY ticker",
                    table.name()
                ))?;
                let tickers = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(tickers)
            })
            .await
    }

    /// Stored bars for one instrument within an inclusive window, ascending.
    pub async fn load_bars(
        &self,
        instrument: &InstrumentRef,
        window: DateRange,
    ) -> Result<Vec<Bar>, StoreError> {
        let table = instrument.table();
        let symbol = instrument.symbol.clone();

        self.pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM {} WHERE ticker = ?1 AND date BETWEEN ?2 AND ?3 ORDER BY date",
                    table.columns()[1..].join(", "),
                    table.name()
                ))?;

                let start = window.start().format(DATE_FORMAT).to_string();
                let end = window.end().format(DATE_FORMAT).to_string();
                let bars = stmt
                    .query_map(params![symbol, start, end], |row| {
                        Ok(Bar {
                            date: row.get::<_, NaiveDate>(0)?,
                            open: row.get::<_, Option<f64>>(1)?.unwrap_or_default(),
                            high: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                            low: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                            close: row.get(4)?,
                            volume: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                            dividends: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
                            stock_splits: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
                            capital_gains: if table.has_capital_gains() {
                                Some(row.get::<_, Option<f64>>(8)?.unwrap_or_default())
                            } else {
                                None
                            },
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(bars)
            })
            .await
    }

    /// Total rows in a table.
    pub async fn row_count(&self, table: TableId) -> Result<usize, StoreError> {
        self.pool
            .interact(move |conn| {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table.name()),
                    [],
                    |row| row.get(0),
                )?;
                Ok(count.max(0) as usize)
            })
            .await
    }

    fn check_anomalies(&self, batch: &NormalizedBatch) -> Result<(), StoreError> {
        let symbol = &batch.instrument().symbol;
        for bar in batch.bars() {
            if let Some(reason) = bar.anomaly() {
                match self.anomaly_policy {
                    AnomalyPolicy::Accept => {
                        debug!("Accepting anomalous bar {} {}: {}", symbol, bar.date, reason)
                    }
                    AnomalyPolicy::Reject => {
                        warn!("Rejecting batch for {}: {} {}", symbol, bar.date, reason);
                        return Err(StoreError::Rejected {
                            symbol: symbol.clone(),
                            date: bar.date,
                            reason,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for SqliteStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.pool
            .interact(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
    }

    async fn write(&self, batch: NormalizedBatch, table: TableId) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.check_anomalies(&batch)?;

        let (instrument, bars) = batch.into_parts();
        let inserted = self
            .pool
            .interact(move |conn| insert_missing(conn, table, &instrument.symbol, &bars))
            .await?;

        debug!("Wrote {} new rows to {}", inserted, table);
        Ok(inserted)
    }
}

fn init_schema(conn: &mut Connection) -> Result<(), StoreError> {
    for table in TableId::ALL {
        let capital_gains = if table.has_capital_gains() {
            ",\n                capital_gains REAL"
        } else {
            ""
        };

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                ticker TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL,
                high REAL,
                low REAL,
                close REAL NOT NULL,
                volume INTEGER,
                dividends REAL,
                stock_splits REAL{capital_gains}
            );
            CREATE INDEX IF NOT EXISTS idx_{name}_ticker_date ON {name}(ticker, date);",
            name = table.name(),
            capital_gains = capital_gains,
        ))?;
    }

    info!("SQLite schema initialized");
    Ok(())
}

/// `INSERT ... SELECT` over an inline VALUES list, skipping keys already
/// present in the table.
fn upsert_sql(table: TableId, rows: usize) -> String {
    let columns = table.columns();
    let column_list = columns.join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders; rows].join(", ");

    format!(
        "WITH incoming({cols}) AS (VALUES {values})
         INSERT INTO {table} ({cols})
         SELECT {cols} FROM incoming
         WHERE NOT EXISTS (
             SELECT 1 FROM {table} t
             WHERE t.ticker = incoming.ticker AND t.date = incoming.date
         )",
        cols = column_list,
        values = values,
        table = table.name(),
    )
}

fn row_values(symbol: &str, bar: &Bar, table: TableId) -> Vec<Value> {
    let mut values = vec![
        Value::Text(symbol.to_string()),
        Value::Text(bar.date.format(DATE_FORMAT).to_string()),
        Value::Real(bar.open),
        Value::Real(bar.high),
        Value::Real(bar.low),
        Value::Real(bar.close),
        Value::Integer(bar.volume),
        Value::Real(bar.dividends),
        Value::Real(bar.stock_splits),
    ];
    if table.has_capital_gains() {
        values.push(Value::Real(bar.capital_gains.unwrap_or(0.0)));
    }
    values
}

/// One IMMEDIATE transaction per batch: either every missing row lands or
/// none does.
fn insert_missing(
    conn: &mut Connection,
    table: TableId,
    symbol: &str,
    bars: &[Bar],
) -> Result<usize, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut inserted = 0;

    for chunk in bars.chunks(CHUNK_ROWS) {
        let params: Vec<Value> = chunk
            .iter()
            .flat_map(|bar| row_values(symbol, bar, table))
            .collect();
        inserted += tx.execute(&upsert_sql(table, chunk.len()), params_from_iter(params))?;
    }

    tx.commit()?;
    Ok(inserted)
}
