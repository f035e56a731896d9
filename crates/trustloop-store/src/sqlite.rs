//! SQLite store.
//!
//! The durable store the bot runs on. Every table lives in one database
//! file so that state survives restarts and outside writers (signal
//! generators, operators) can insert into `signals` directly:
//!
//! ```sql
//! INSERT INTO signals (instrument, period, timestamp_ms, reference_price, kind, strategy_group_id)
//! VALUES ('BTC-USDT-SWAP', '1m', 1700000000000, '50000', 'BREAKOUT_UP', 'breakout-v1');
//! ```
//!
//! Decimals are stored as TEXT so no precision is lost. Status changes are
//! conditional `UPDATE ... WHERE status = ?`, outcomes are unique per
//! trade and the candle cache is keyed by (instrument, interval, ts).

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, trace};
use trustloop_core::{
    Candle, ClientOrderId, FillState, GroupId, InstrumentId, Interval, NewSignal, NewTrade,
    OrderId, Price, Signal, SignalId, SignalStatus, Size, TradeId, TradeOutcome, TradeRecord,
    TrustWeightEntry, TrustWindow,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    CandleStore, OutcomeStore, SignalOrder, SignalStore, TradeStore, TrustWeightStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument TEXT NOT NULL,
    period TEXT NOT NULL DEFAULT '1m',
    timestamp_ms INTEGER NOT NULL,
    reference_price TEXT NOT NULL,
    reference_size TEXT NOT NULL DEFAULT '0',
    kind TEXT NOT NULL,
    strategy_group_id TEXT,
    status TEXT NOT NULL DEFAULT 'NEW',
    priority INTEGER NOT NULL DEFAULT 3,
    promotion_level INTEGER NOT NULL DEFAULT 0,
    expiry_ms INTEGER,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at_ms INTEGER NOT NULL DEFAULT 0,
    updated_at_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_signals_status
    ON signals(status, priority, promotion_level, timestamp_ms);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER NOT NULL,
    instrument TEXT NOT NULL,
    group_id TEXT NOT NULL,
    side TEXT NOT NULL,
    contracts TEXT NOT NULL,
    quantity TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    leverage INTEGER NOT NULL,
    budget TEXT NOT NULL,
    order_id TEXT NOT NULL,
    client_order_id TEXT NOT NULL,
    fill_state TEXT NOT NULL,
    stop_loss TEXT,
    take_profit TEXT,
    add_on_size TEXT,
    opened_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_group ON trades(group_id, opened_at_ms);

CREATE TABLE IF NOT EXISTS outcomes (
    trade_id INTEGER NOT NULL UNIQUE,
    instrument TEXT NOT NULL,
    group_id TEXT NOT NULL,
    side TEXT NOT NULL,
    open_ts_ms INTEGER NOT NULL,
    close_ts_ms INTEGER NOT NULL,
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    quantity TEXT NOT NULL,
    hold_duration_ms INTEGER NOT NULL,
    exit_reason TEXT NOT NULL,
    fees TEXT NOT NULL,
    pnl TEXT NOT NULL,
    pnl_pct TEXT NOT NULL,
    max_favorable_excursion TEXT NOT NULL,
    max_adverse_excursion TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outcomes_open ON outcomes(open_ts_ms);

CREATE TABLE IF NOT EXISTS trust_weights (
    group_id TEXT NOT NULL,
    window_days INTEGER NOT NULL,
    score TEXT NOT NULL,
    trade_count INTEGER NOT NULL,
    weight TEXT NOT NULL,
    source TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (group_id, window_days)
);

CREATE TABLE IF NOT EXISTS candles (
    instrument TEXT NOT NULL,
    interval TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    PRIMARY KEY (instrument, interval, ts_ms)
);
";

const SIGNAL_COLUMNS: &str = "id, instrument, period, timestamp_ms, reference_price, \
    reference_size, kind, strategy_group_id, status, priority, promotion_level, expiry_ms, \
    meta, created_at_ms, updated_at_ms";

const TRADE_COLUMNS: &str = "id, signal_id, instrument, group_id, side, contracts, quantity, \
    entry_price, leverage, budget, order_id, client_order_id, fill_state, stop_loss, \
    take_profit, add_on_size, opened_at_ms";

const OUTCOME_COLUMNS: &str = "trade_id, instrument, group_id, side, open_ts_ms, close_ts_ms, \
    entry_price, exit_price, quantity, hold_duration_ms, exit_reason, fees, pnl, pnl_pct, \
    max_favorable_excursion, max_adverse_excursion";

const TRUST_COLUMNS: &str =
    "group_id, window_days, score, trade_count, weight, source, updated_at_ms";

/// Connections kept for a database file.
const FILE_POOL_SIZE: u32 = 4;

/// Store backed by an SQLite database.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok(())
        });
        let pool = Pool::builder().max_size(FILE_POOL_SIZE).build(manager)?;
        let store = Self { pool };
        store.initialize_schema()?;
        info!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// Private in-memory database, for tests and throwaway paper runs.
    ///
    /// A single connection that is never recycled, since every new
    /// connection would see an empty database.
    pub fn in_memory() -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn signal_count(&self) -> StoreResult<usize> {
        self.count("SELECT COUNT(*) FROM signals")
    }

    pub fn outcome_count(&self) -> StoreResult<usize> {
        self.count("SELECT COUNT(*) FROM outcomes")
    }

    fn count(&self, sql: &str) -> StoreResult<usize> {
        Ok(self.conn()?.query_row(sql, [], |row| row.get(0))?)
    }

    /// Resolve a conditional update that changed no row: unknown id or lost race.
    fn unchanged(
        conn: &rusqlite::Connection,
        id: SignalId,
        expected: SignalStatus,
    ) -> StoreResult<bool> {
        let actual: Option<String> = conn
            .query_row(
                "SELECT status FROM signals WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        match actual {
            None => Err(StoreError::UnknownSignal(id)),
            Some(actual) => {
                debug!(signal_id = %id, expected = %expected, %actual, "Signal transition lost race");
                Ok(false)
            }
        }
    }
}

// ============================================================================
// Column conversions
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| Decimal::from_str(&text).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

/// Unit enum stored by its serde name (`buy`, `filled`, `take_profit`).
fn label_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(text))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn label<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(match serde_json::to_value(value)? {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<Signal> {
    let status: String = row.get(8)?;
    let meta: String = row.get(12)?;
    Ok(Signal {
        id: SignalId(row.get(0)?),
        instrument: InstrumentId::new(row.get::<_, String>(1)?),
        period: row.get(2)?,
        timestamp_ms: row.get(3)?,
        reference_price: Price::new(decimal_at(row, 4)?),
        reference_size: Size::new(decimal_at(row, 5)?),
        kind: row.get(6)?,
        strategy_group_id: row.get::<_, Option<String>>(7)?.map(GroupId::new),
        status: status
            .parse()
            .map_err(|e: trustloop_core::CoreError| conversion_error(8, e.to_string()))?,
        priority: row.get(9)?,
        promotion_level: row.get(10)?,
        expiry_ms: row.get(11)?,
        meta: serde_json::from_str(&meta).map_err(|e| conversion_error(12, e.to_string()))?,
        created_at_ms: row.get(13)?,
        updated_at_ms: row.get(14)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: TradeId(row.get(0)?),
        trade: NewTrade {
            signal_id: SignalId(row.get(1)?),
            instrument: InstrumentId::new(row.get::<_, String>(2)?),
            group_id: GroupId::new(row.get::<_, String>(3)?),
            side: label_at(row, 4)?,
            contracts: Size::new(decimal_at(row, 5)?),
            quantity: Size::new(decimal_at(row, 6)?),
            entry_price: Price::new(decimal_at(row, 7)?),
            leverage: row.get(8)?,
            budget: decimal_at(row, 9)?,
            order_id: OrderId::new(row.get::<_, String>(10)?),
            client_order_id: ClientOrderId::from_string(row.get(11)?),
            fill_state: label_at(row, 12)?,
            stop_loss: opt_decimal_at(row, 13)?.map(Price::new),
            take_profit: opt_decimal_at(row, 14)?.map(Price::new),
            add_on_size: opt_decimal_at(row, 15)?.map(Size::new),
            opened_at_ms: row.get(16)?,
        },
    })
}

fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<TradeOutcome> {
    Ok(TradeOutcome {
        trade_id: TradeId(row.get(0)?),
        instrument: InstrumentId::new(row.get::<_, String>(1)?),
        group_id: GroupId::new(row.get::<_, String>(2)?),
        side: label_at(row, 3)?,
        open_ts_ms: row.get(4)?,
        close_ts_ms: row.get(5)?,
        entry_price: Price::new(decimal_at(row, 6)?),
        exit_price: Price::new(decimal_at(row, 7)?),
        quantity: Size::new(decimal_at(row, 8)?),
        hold_duration_ms: row.get(9)?,
        exit_reason: label_at(row, 10)?,
        fees: decimal_at(row, 11)?,
        pnl: decimal_at(row, 12)?,
        pnl_pct: decimal_at(row, 13)?,
        max_favorable_excursion: decimal_at(row, 14)?,
        max_adverse_excursion: decimal_at(row, 15)?,
    })
}

fn trust_from_row(row: &Row<'_>) -> rusqlite::Result<TrustWeightEntry> {
    Ok(TrustWeightEntry {
        group_id: GroupId::new(row.get::<_, String>(0)?),
        window: TrustWindow(row.get(1)?),
        score: decimal_at(row, 2)?,
        trade_count: row.get(3)?,
        weight: decimal_at(row, 4)?,
        source: row.get(5)?,
        updated_at_ms: row.get(6)?,
    })
}

fn candle_from_row(row: &Row<'_>) -> rusqlite::Result<Candle> {
    Ok(Candle {
        ts_ms: row.get(0)?,
        open: Price::new(decimal_at(row, 1)?),
        high: Price::new(decimal_at(row, 2)?),
        low: Price::new(decimal_at(row, 3)?),
        close: Price::new(decimal_at(row, 4)?),
        volume: Size::new(decimal_at(row, 5)?),
    })
}

// ============================================================================
// Tables
// ============================================================================

impl SignalStore for SqliteStore {
    fn insert_signal(&self, signal: NewSignal, now_ms: u64) -> StoreResult<SignalId> {
        let meta = serde_json::to_string(&signal.meta)?;
        let id: u64 = self.conn()?.query_row(
            "INSERT INTO signals (instrument, period, timestamp_ms, reference_price, \
             reference_size, kind, strategy_group_id, status, priority, promotion_level, \
             expiry_ms, meta, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13) \
             RETURNING id",
            params![
                signal.instrument.as_str(),
                signal.period,
                signal.timestamp_ms,
                signal.reference_price.to_string(),
                signal.reference_size.to_string(),
                signal.kind,
                signal.strategy_group_id.as_ref().map(GroupId::as_str),
                SignalStatus::New.to_string(),
                signal.priority,
                signal.promotion_level,
                signal.expiry_ms,
                meta,
                now_ms,
            ],
            |row| row.get(0),
        )?;
        let id = SignalId(id);
        trace!(signal_id = %id, "Signal inserted");
        Ok(id)
    }

    fn get_signal(&self, id: SignalId) -> StoreResult<Option<Signal>> {
        let sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1");
        Ok(self
            .conn()?
            .query_row(&sql, params![id.0], signal_from_row)
            .optional()?)
    }

    fn signals_in_status(
        &self,
        status: SignalStatus,
        order: SignalOrder,
        limit: usize,
    ) -> StoreResult<Vec<Signal>> {
        let order_by = match order {
            SignalOrder::Oldest => "timestamp_ms ASC, id ASC",
            SignalOrder::Execution => {
                "priority ASC, promotion_level DESC, timestamp_ms ASC, id ASC"
            }
        };
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals WHERE status = ?1 ORDER BY {order_by} LIMIT ?2"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let signals = stmt
            .query_map(params![status.to_string(), sql_limit(limit)], signal_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(signals)
    }

    fn transition_signal(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        now_ms: u64,
    ) -> StoreResult<bool> {
        from.transition(to)?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE signals SET status = ?1, updated_at_ms = ?2 WHERE id = ?3 AND status = ?4",
            params![to.to_string(), now_ms, id.0, from.to_string()],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        Self::unchanged(&conn, id, from)
    }

    fn begin_rehearsal(&self, id: SignalId, expiry_ms: u64, now_ms: u64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE signals SET status = ?1, expiry_ms = COALESCE(expiry_ms, ?2), \
             updated_at_ms = ?3 WHERE id = ?4 AND status = ?5",
            params![
                SignalStatus::WaitRehearsal.to_string(),
                expiry_ms,
                now_ms,
                id.0,
                SignalStatus::New.to_string(),
            ],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        Self::unchanged(&conn, id, SignalStatus::New)
    }
}

impl TradeStore for SqliteStore {
    fn insert_trade(&self, trade: NewTrade) -> StoreResult<TradeId> {
        let id: u64 = self.conn()?.query_row(
            "INSERT INTO trades (signal_id, instrument, group_id, side, contracts, quantity, \
             entry_price, leverage, budget, order_id, client_order_id, fill_state, stop_loss, \
             take_profit, add_on_size, opened_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
             RETURNING id",
            params![
                trade.signal_id.0,
                trade.instrument.as_str(),
                trade.group_id.as_str(),
                label(&trade.side)?,
                trade.contracts.to_string(),
                trade.quantity.to_string(),
                trade.entry_price.to_string(),
                trade.leverage,
                trade.budget.to_string(),
                trade.order_id.as_str(),
                trade.client_order_id.as_str(),
                label(&trade.fill_state)?,
                trade.stop_loss.map(|p| p.to_string()),
                trade.take_profit.map(|p| p.to_string()),
                trade.add_on_size.map(|s| s.to_string()),
                trade.opened_at_ms,
            ],
            |row| row.get(0),
        )?;
        Ok(TradeId(id))
    }

    fn get_trade(&self, id: TradeId) -> StoreResult<Option<TradeRecord>> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?1");
        Ok(self
            .conn()?
            .query_row(&sql, params![id.0], trade_from_row)
            .optional()?)
    }

    fn trades_pending_outcome(&self, limit: usize) -> StoreResult<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE fill_state NOT IN (?1, ?2) \
             AND id NOT IN (SELECT trade_id FROM outcomes) \
             ORDER BY opened_at_ms ASC, id ASC LIMIT ?3"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let trades = stmt
            .query_map(
                params![
                    label(&FillState::Cancelled)?,
                    label(&FillState::Rejected)?,
                    sql_limit(limit),
                ],
                trade_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    fn count_trades_since(&self, group: &GroupId, since_ms: u64) -> StoreResult<u32> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM trades WHERE group_id = ?1 AND opened_at_ms >= ?2",
            params![group.as_str(), since_ms],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

impl OutcomeStore for SqliteStore {
    fn insert_outcome(&self, outcome: TradeOutcome) -> StoreResult<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO outcomes ({OUTCOME_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        );
        let inserted = self.conn()?.execute(
            &sql,
            params![
                outcome.trade_id.0,
                outcome.instrument.as_str(),
                outcome.group_id.as_str(),
                label(&outcome.side)?,
                outcome.open_ts_ms,
                outcome.close_ts_ms,
                outcome.entry_price.to_string(),
                outcome.exit_price.to_string(),
                outcome.quantity.to_string(),
                outcome.hold_duration_ms,
                label(&outcome.exit_reason)?,
                outcome.fees.to_string(),
                outcome.pnl.to_string(),
                outcome.pnl_pct.to_string(),
                outcome.max_favorable_excursion.to_string(),
                outcome.max_adverse_excursion.to_string(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn outcome_for_trade(&self, trade: TradeId) -> StoreResult<Option<TradeOutcome>> {
        let sql = format!("SELECT {OUTCOME_COLUMNS} FROM outcomes WHERE trade_id = ?1");
        Ok(self
            .conn()?
            .query_row(&sql, params![trade.0], outcome_from_row)
            .optional()?)
    }

    fn outcomes_since(&self, since_ms: u64) -> StoreResult<Vec<TradeOutcome>> {
        let sql = format!(
            "SELECT {OUTCOME_COLUMNS} FROM outcomes WHERE open_ts_ms >= ?1 ORDER BY trade_id"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let outcomes = stmt
            .query_map(params![since_ms], outcome_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outcomes)
    }
}

impl TrustWeightStore for SqliteStore {
    fn upsert_trust_weight(&self, entry: TrustWeightEntry) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO trust_weights ({TRUST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (group_id, window_days) DO UPDATE SET \
             score = excluded.score, trade_count = excluded.trade_count, \
             weight = excluded.weight, source = excluded.source, \
             updated_at_ms = excluded.updated_at_ms"
        );
        self.conn()?.execute(
            &sql,
            params![
                entry.group_id.as_str(),
                entry.window.days(),
                entry.score.to_string(),
                entry.trade_count,
                entry.weight.to_string(),
                entry.source,
                entry.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    fn trust_weight(
        &self,
        group: &GroupId,
        window: TrustWindow,
    ) -> StoreResult<Option<TrustWeightEntry>> {
        let sql = format!(
            "SELECT {TRUST_COLUMNS} FROM trust_weights WHERE group_id = ?1 AND window_days = ?2"
        );
        Ok(self
            .conn()?
            .query_row(&sql, params![group.as_str(), window.days()], trust_from_row)
            .optional()?)
    }

    fn trust_weights(&self, window: TrustWindow) -> StoreResult<Vec<TrustWeightEntry>> {
        let sql = format!(
            "SELECT {TRUST_COLUMNS} FROM trust_weights WHERE window_days = ?1 ORDER BY group_id"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![window.days()], trust_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl CandleStore for SqliteStore {
    fn cached_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        start_ms: u64,
        end_ms: u64,
    ) -> StoreResult<Vec<Candle>> {
        if start_ms > end_ms {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ts_ms, open, high, low, close, volume FROM candles \
             WHERE instrument = ?1 AND interval = ?2 AND ts_ms BETWEEN ?3 AND ?4 \
             ORDER BY ts_ms ASC",
        )?;
        let candles = stmt
            .query_map(
                params![instrument.as_str(), interval.as_str(), start_ms, end_ms],
                candle_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candles)
    }

    fn cache_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        candles: &[Candle],
    ) -> StoreResult<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO candles \
                 (instrument, interval, ts_ms, open, high, low, close, volume) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for candle in candles {
                inserted += stmt.execute(params![
                    instrument.as_str(),
                    interval.as_str(),
                    candle.ts_ms,
                    candle.open.to_string(),
                    candle.high.to_string(),
                    candle.low.to_string(),
                    candle.close.to_string(),
                    candle.volume.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}
