//! Postgres ledger.
//!
//! The ledger is the sole writer of positions and trades. Every multi-step
//! logical operation (open a trade, settle a trade) runs inside one
//! transaction so no request ever observes a half-written position/trade
//! pair; duplicate-position prevention under concurrent order placement is
//! the `UNIQUE (user_id, instrument)` constraint plus an upsert reopen.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use options_desk_core::error::TradingError;
use options_desk_core::traits::LedgerStore;
use options_desk_core::types::{
    NewTrade, OrderSide, Position, PositionStatus, SettledTrade, Trade, TradeStatus,
};

pub struct PgLedger {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> TradingError {
    TradingError::Persistence(anyhow::Error::new(e))
}

fn position_from_row(row: &PgRow) -> Result<Position, TradingError> {
    let status_raw: String = row.get("status");
    let status = PositionStatus::parse(&status_raw)
        .ok_or_else(|| TradingError::Persistence(anyhow!("unknown position status {status_raw:?}")))?;
    Ok(Position {
        id: row.get("position_id"),
        user_id: row.get("user_id"),
        strategy_name: row.get("strategy_name"),
        instrument: row.get("instrument"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status,
        total_pnl: row.get("total_pnl"),
    })
}

fn trade_from_row(row: &PgRow) -> Result<Trade, TradingError> {
    let side_raw: String = row.get("order_type");
    let side = OrderSide::parse(&side_raw)
        .ok_or_else(|| TradingError::Persistence(anyhow!("unknown order_type {side_raw:?}")))?;
    let status_raw: String = row.get("status");
    let status = TradeStatus::parse(&status_raw)
        .ok_or_else(|| TradingError::Persistence(anyhow!("unknown trade status {status_raw:?}")))?;
    Ok(Trade {
        id: row.get("trade_id"),
        position_id: row.get("position_id"),
        user_id: row.get("user_id"),
        side,
        entry_time: row.get("entry_time"),
        entry_price: row.get("entry_price"),
        exit_time: row.get("exit_time"),
        exit_price: row.get("exit_price"),
        quantity: row.get("quantity"),
        pnl: row.get("pnl"),
        status,
        trading_symbol: row.get("trading_symbol"),
    })
}

const UPSERT_POSITION: &str = r"
    INSERT INTO positions (user_id, strategy_name, instrument, start_time, status)
    VALUES ($1, $2, $3, NOW(), 'OPEN')
    ON CONFLICT ON CONSTRAINT positions_user_instrument_key DO UPDATE
    SET status = 'OPEN', start_time = NOW(), end_time = NULL, total_pnl = NULL
    RETURNING position_id, user_id, strategy_name, instrument,
              start_time, end_time, status, total_pnl
";

const INSERT_TRADE: &str = r"
    INSERT INTO trades
        (position_id, user_id, order_type, entry_time, entry_price,
         quantity, status, trading_symbol)
    VALUES ($1, $2, $3, $4, $5, $6, 'OPEN', $7)
    RETURNING trade_id, position_id, user_id, order_type, entry_time, exit_time,
              entry_price, exit_price, quantity, pnl, status, trading_symbol
";

const CLOSE_TRADE: &str = r"
    UPDATE trades
    SET exit_price = $2, exit_time = $3, pnl = $4, status = 'CLOSED'
    WHERE trade_id = $1 AND status = 'OPEN'
    RETURNING trade_id, position_id, user_id, order_type, entry_time, exit_time,
              entry_price, exit_price, quantity, pnl, status, trading_symbol
";

// Closes the position only when no OPEN trade remains under it; total_pnl
// is the sum of child pnl values, nulls excluded.
const MAYBE_CLOSE_POSITION: &str = r"
    UPDATE positions p
    SET status = 'CLOSED', end_time = NOW(),
        total_pnl = (SELECT COALESCE(SUM(t.pnl), 0) FROM trades t
                     WHERE t.position_id = p.position_id AND t.pnl IS NOT NULL)
    WHERE p.position_id = $1
      AND p.status = 'OPEN'
      AND NOT EXISTS (SELECT 1 FROM trades t
                      WHERE t.position_id = p.position_id AND t.status = 'OPEN')
    RETURNING p.total_pnl
";

impl PgLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    ///
    /// # Errors
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TradingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| TradingError::Persistence(anyhow::Error::new(e)))?;
        info!("Ledger connected and migrated");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Distinguish `NotFound` from `AlreadyClosed` after a guarded close
    /// matched no row.
    async fn explain_close_miss(&self, trade_id: i64) -> TradingError {
        match sqlx::query_scalar::<_, String>("SELECT status FROM trades WHERE trade_id = $1")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => TradingError::AlreadyClosed { trade_id },
            Ok(None) => TradingError::NotFound {
                entity: "trade",
                id: trade_id,
            },
            Err(e) => db_err(e),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn find_open_position(
        &self,
        user_id: i64,
        instrument: &str,
    ) -> Result<Option<Position>, TradingError> {
        let row = sqlx::query(
            r"
            SELECT position_id, user_id, strategy_name, instrument,
                   start_time, end_time, status, total_pnl
            FROM positions
            WHERE user_id = $1 AND instrument = $2 AND status = 'OPEN'
            ",
        )
        .bind(user_id)
        .bind(instrument)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn find_or_create_position(
        &self,
        user_id: i64,
        instrument: &str,
        strategy_name: &str,
    ) -> Result<Position, TradingError> {
        let row = sqlx::query(UPSERT_POSITION)
            .bind(user_id)
            .bind(strategy_name)
            .bind(instrument)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        position_from_row(&row)
    }

    async fn record_trade(&self, position_id: i64, new: NewTrade) -> Result<Trade, TradingError> {
        let row = sqlx::query(INSERT_TRADE)
            .bind(position_id)
            .bind(new.user_id)
            .bind(new.side.as_str())
            .bind(new.entry_time)
            .bind(new.entry_price)
            .bind(new.quantity)
            .bind(&new.trading_symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        trade_from_row(&row)
    }

    async fn open_trade(
        &self,
        instrument: &str,
        strategy_name: &str,
        new: NewTrade,
    ) -> Result<(Position, Trade), TradingError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let position_row = sqlx::query(UPSERT_POSITION)
            .bind(new.user_id)
            .bind(strategy_name)
            .bind(instrument)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let position = position_from_row(&position_row)?;

        let trade_row = sqlx::query(INSERT_TRADE)
            .bind(position.id)
            .bind(new.user_id)
            .bind(new.side.as_str())
            .bind(new.entry_time)
            .bind(new.entry_price)
            .bind(new.quantity)
            .bind(&new.trading_symbol)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let trade = trade_from_row(&trade_row)?;

        tx.commit().await.map_err(db_err)?;
        debug!(
            position_id = position.id,
            trade_id = trade.id,
            symbol = trade.trading_symbol,
            "Trade recorded"
        );
        Ok((position, trade))
    }

    async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<Trade, TradingError> {
        let row = sqlx::query(CLOSE_TRADE)
            .bind(trade_id)
            .bind(exit_price)
            .bind(exit_time)
            .bind(pnl)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => trade_from_row(&row),
            None => Err(self.explain_close_miss(trade_id).await),
        }
    }

    async fn mark_trade_closed(&self, trade_id: i64) -> Result<(), TradingError> {
        sqlx::query("UPDATE trades SET status = 'CLOSED' WHERE trade_id = $1 AND status = 'OPEN'")
            .bind(trade_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn maybe_close_position(&self, position_id: i64) -> Result<bool, TradingError> {
        let closed = sqlx::query(MAYBE_CLOSE_POSITION)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(closed.is_some())
    }

    async fn settle_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<SettledTrade, TradingError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(CLOSE_TRADE)
            .bind(trade_id)
            .bind(exit_price)
            .bind(exit_time)
            .bind(pnl)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            tx.rollback().await.map_err(db_err)?;
            return Err(self.explain_close_miss(trade_id).await);
        };
        let trade = trade_from_row(&row)?;

        let closed = sqlx::query(MAYBE_CLOSE_POSITION)
            .bind(trade.position_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let position_total_pnl: Option<Decimal> = closed.as_ref().map(|r| r.get("total_pnl"));

        tx.commit().await.map_err(db_err)?;
        Ok(SettledTrade {
            position_closed: position_total_pnl.is_some(),
            position_total_pnl,
            trade,
        })
    }

    async fn trade(&self, trade_id: i64) -> Result<Option<Trade>, TradingError> {
        let row = sqlx::query(
            r"
            SELECT trade_id, position_id, user_id, order_type, entry_time, exit_time,
                   entry_price, exit_price, quantity, pnl, status, trading_symbol
            FROM trades
            WHERE trade_id = $1
            ",
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(trade_from_row).transpose()
    }

    async fn open_trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>, TradingError> {
        let rows = sqlx::query(
            r"
            SELECT trade_id, position_id, user_id, order_type, entry_time, exit_time,
                   entry_price, exit_price, quantity, pnl, status, trading_symbol
            FROM trades
            WHERE user_id = $1 AND status = 'OPEN'
            ORDER BY trade_id ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn open_trades_among(&self, trade_ids: &[i64]) -> Result<Vec<Trade>, TradingError> {
        let rows = sqlx::query(
            r"
            SELECT trade_id, position_id, user_id, order_type, entry_time, exit_time,
                   entry_price, exit_price, quantity, pnl, status, trading_symbol
            FROM trades
            WHERE trade_id = ANY($1) AND status = 'OPEN'
            ORDER BY trade_id ASC
            ",
        )
        .bind(trade_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn open_positions_for_user(&self, user_id: i64) -> Result<Vec<Position>, TradingError> {
        let rows = sqlx::query(
            r"
            SELECT position_id, user_id, strategy_name, instrument,
                   start_time, end_time, status, total_pnl
            FROM positions
            WHERE user_id = $1 AND status = 'OPEN'
            ORDER BY position_id ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(position_from_row).collect()
    }

    async fn open_trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>, TradingError> {
        let rows = sqlx::query(
            r"
            SELECT trade_id, position_id, user_id, order_type, entry_time, exit_time,
                   entry_price, exit_price, quantity, pnl, status, trading_symbol
            FROM trades
            WHERE position_id = $1 AND status = 'OPEN'
            ORDER BY trade_id ASC
            ",
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn closed_pnl_in_open_book(&self, user_id: i64) -> Result<Decimal, TradingError> {
        let sum: Option<Decimal> = sqlx::query_scalar(
            r"
            SELECT SUM(t.pnl)
            FROM trades t
            JOIN positions p ON p.position_id = t.position_id
            WHERE t.user_id = $1 AND t.status = 'CLOSED' AND p.status = 'OPEN'
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(sum.unwrap_or_default())
    }
}
