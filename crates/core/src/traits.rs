//! Traits at the seams: the broker capability and the ledger store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::TradingError;
use crate::types::{
    Exchange, InstrumentRecord, LivePosition, NewTrade, OrderRequest, PlacedOrder, Position,
    Quote, SettledTrade, Trade,
};

/// The broker capability: quotes, live positions, order placement, the
/// order book, and the per-exchange instruments dump. Implemented by the
/// Kite REST client and by the paper broker used in tests and dry runs.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Last-traded-price quotes for a batch of `"EXCHANGE:SYMBOL"` keys.
    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, Quote>, TradingError>;

    /// Net positions as the broker currently reports them.
    async fn positions(&self) -> Result<Vec<LivePosition>, TradingError>;

    /// Place an order; returns the broker order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, TradingError>;

    /// Today's order book, used to look up fill average prices.
    async fn orders(&self) -> Result<Vec<PlacedOrder>, TradingError>;

    /// Instruments dump for an exchange segment.
    async fn instruments(&self, exchange: Exchange) -> Result<Vec<InstrumentRecord>, TradingError>;
}

/// The persisted position/trade store. The ledger is the sole writer of
/// both entities; a position exclusively owns its trades.
///
/// `open_trade` and `settle_trade` exist so that one logical operation is
/// one transaction scope in the Postgres implementation — a position write
/// and its trade write are never observable half-done.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Exact match on (user_id, instrument, status = OPEN).
    async fn find_open_position(
        &self,
        user_id: i64,
        instrument: &str,
    ) -> Result<Option<Position>, TradingError>;

    /// Reuse-and-reopen: a row existing for (user_id, instrument) in any
    /// status is reopened (start_time reset, end_time and total_pnl
    /// cleared) instead of duplicated. Atomic under concurrent calls for
    /// the same key — exactly one row ever results.
    async fn find_or_create_position(
        &self,
        user_id: i64,
        instrument: &str,
        strategy_name: &str,
    ) -> Result<Position, TradingError>;

    /// Append a new OPEN trade under a position.
    async fn record_trade(&self, position_id: i64, new: NewTrade) -> Result<Trade, TradingError>;

    /// find_or_create_position + record_trade in one transaction.
    async fn open_trade(
        &self,
        instrument: &str,
        strategy_name: &str,
        new: NewTrade,
    ) -> Result<(Position, Trade), TradingError>;

    /// One-shot OPEN → CLOSED with exit data. `AlreadyClosed` on a second
    /// call, with no mutation.
    async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<Trade, TradingError>;

    /// Close a trade with no exit data available — the reconciliation path
    /// for legs the broker no longer reports.
    async fn mark_trade_closed(&self, trade_id: i64) -> Result<(), TradingError>;

    /// If every trade under the position is CLOSED, close the position and
    /// set total_pnl to the sum of non-null trade pnl. Returns whether the
    /// position closed.
    async fn maybe_close_position(&self, position_id: i64) -> Result<bool, TradingError>;

    /// close_trade + maybe_close_position in one transaction.
    async fn settle_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<SettledTrade, TradingError>;

    async fn trade(&self, trade_id: i64) -> Result<Option<Trade>, TradingError>;

    async fn open_trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>, TradingError>;

    /// The OPEN subset of the given trade ids.
    async fn open_trades_among(&self, trade_ids: &[i64]) -> Result<Vec<Trade>, TradingError>;

    async fn open_positions_for_user(&self, user_id: i64) -> Result<Vec<Position>, TradingError>;

    async fn open_trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>, TradingError>;

    /// Sum of pnl over CLOSED trades that sit inside the user's
    /// currently-OPEN positions (realized P&L within the open book).
    async fn closed_pnl_in_open_book(&self, user_id: i64) -> Result<Decimal, TradingError>;
}
