//! In-memory ledger.
//!
//! Same contract as `PgLedger`, backed by a mutex-guarded map. Used for
//! paper trading and for exercising the engine without a database. The
//! mutex gives the same serialization the Postgres unique constraint gives:
//! concurrent find-or-create calls for one (user, instrument) observe each
//! other and never produce two rows.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use options_desk_core::error::TradingError;
use options_desk_core::traits::LedgerStore;
use options_desk_core::types::{
    NewTrade, Position, PositionStatus, SettledTrade, Trade, TradeStatus,
};

#[derive(Default)]
struct Inner {
    positions: BTreeMap<i64, Position>,
    trades: BTreeMap<i64, Trade>,
    next_position_id: i64,
    next_trade_id: i64,
}

impl Inner {
    fn upsert_position(&mut self, user_id: i64, instrument: &str, strategy_name: &str) -> Position {
        if let Some(existing) = self
            .positions
            .values_mut()
            .find(|p| p.user_id == user_id && p.instrument == instrument)
        {
            // Reuse-and-reopen: strategy_name stays as first recorded.
            existing.status = PositionStatus::Open;
            existing.start_time = Utc::now();
            existing.end_time = None;
            existing.total_pnl = None;
            return existing.clone();
        }

        self.next_position_id += 1;
        let position = Position {
            id: self.next_position_id,
            user_id,
            strategy_name: strategy_name.to_string(),
            instrument: instrument.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: PositionStatus::Open,
            total_pnl: None,
        };
        self.positions.insert(position.id, position.clone());
        position
    }

    fn insert_trade(&mut self, position_id: i64, new: NewTrade) -> Trade {
        self.next_trade_id += 1;
        let trade = Trade {
            id: self.next_trade_id,
            position_id,
            user_id: new.user_id,
            side: new.side,
            entry_time: new.entry_time,
            entry_price: new.entry_price,
            exit_time: None,
            exit_price: None,
            quantity: new.quantity,
            pnl: None,
            status: TradeStatus::Open,
            trading_symbol: new.trading_symbol,
        };
        self.trades.insert(trade.id, trade.clone());
        trade
    }

    fn close_open_trade(
        &mut self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<Trade, TradingError> {
        let trade = self.trades.get_mut(&trade_id).ok_or(TradingError::NotFound {
            entity: "trade",
            id: trade_id,
        })?;
        if trade.status == TradeStatus::Closed {
            return Err(TradingError::AlreadyClosed { trade_id });
        }
        trade.exit_price = Some(exit_price);
        trade.exit_time = Some(exit_time);
        trade.pnl = Some(pnl);
        trade.status = TradeStatus::Closed;
        Ok(trade.clone())
    }

    fn maybe_close(&mut self, position_id: i64) -> Option<Decimal> {
        let all_closed = self
            .trades
            .values()
            .filter(|t| t.position_id == position_id)
            .all(|t| t.status == TradeStatus::Closed);
        let position = self.positions.get_mut(&position_id)?;
        if position.status != PositionStatus::Open || !all_closed {
            return None;
        }

        let total: Decimal = self
            .trades
            .values()
            .filter(|t| t.position_id == position_id)
            .filter_map(|t| t.pnl)
            .sum();
        position.status = PositionStatus::Closed;
        position.end_time = Some(Utc::now());
        position.total_pnl = Some(total);
        Some(total)
    }
}

/// Mutex-guarded in-memory ledger.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of position rows, for duplicate-prevention assertions.
    #[must_use]
    pub fn position_count(&self) -> usize {
        self.inner.lock().positions.len()
    }

    /// Fetch a position by id.
    #[must_use]
    pub fn position(&self, position_id: i64) -> Option<Position> {
        self.inner.lock().positions.get(&position_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn find_open_position(
        &self,
        user_id: i64,
        instrument: &str,
    ) -> Result<Option<Position>, TradingError> {
        Ok(self
            .inner
            .lock()
            .positions
            .values()
            .find(|p| {
                p.user_id == user_id
                    && p.instrument == instrument
                    && p.status == PositionStatus::Open
            })
            .cloned())
    }

    async fn find_or_create_position(
        &self,
        user_id: i64,
        instrument: &str,
        strategy_name: &str,
    ) -> Result<Position, TradingError> {
        Ok(self
            .inner
            .lock()
            .upsert_position(user_id, instrument, strategy_name))
    }

    async fn record_trade(&self, position_id: i64, new: NewTrade) -> Result<Trade, TradingError> {
        let mut inner = self.inner.lock();
        if !inner.positions.contains_key(&position_id) {
            return Err(TradingError::NotFound {
                entity: "position",
                id: position_id,
            });
        }
        Ok(inner.insert_trade(position_id, new))
    }

    async fn open_trade(
        &self,
        instrument: &str,
        strategy_name: &str,
        new: NewTrade,
    ) -> Result<(Position, Trade), TradingError> {
        let mut inner = self.inner.lock();
        let position = inner.upsert_position(new.user_id, instrument, strategy_name);
        let trade = inner.insert_trade(position.id, new);
        Ok((position, trade))
    }

    async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<Trade, TradingError> {
        self.inner
            .lock()
            .close_open_trade(trade_id, exit_price, exit_time, pnl)
    }

    async fn mark_trade_closed(&self, trade_id: i64) -> Result<(), TradingError> {
        let mut inner = self.inner.lock();
        if let Some(trade) = inner.trades.get_mut(&trade_id) {
            if trade.status == TradeStatus::Open {
                trade.status = TradeStatus::Closed;
            }
        }
        Ok(())
    }

    async fn maybe_close_position(&self, position_id: i64) -> Result<bool, TradingError> {
        Ok(self.inner.lock().maybe_close(position_id).is_some())
    }

    async fn settle_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Result<SettledTrade, TradingError> {
        let mut inner = self.inner.lock();
        let trade = inner.close_open_trade(trade_id, exit_price, exit_time, pnl)?;
        let position_total_pnl = inner.maybe_close(trade.position_id);
        Ok(SettledTrade {
            position_closed: position_total_pnl.is_some(),
            position_total_pnl,
            trade,
        })
    }

    async fn trade(&self, trade_id: i64) -> Result<Option<Trade>, TradingError> {
        Ok(self.inner.lock().trades.get(&trade_id).cloned())
    }

    async fn open_trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>, TradingError> {
        Ok(self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| t.user_id == user_id && t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn open_trades_among(&self, trade_ids: &[i64]) -> Result<Vec<Trade>, TradingError> {
        let inner = self.inner.lock();
        Ok(trade_ids
            .iter()
            .filter_map(|id| inner.trades.get(id))
            .filter(|t| t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn open_positions_for_user(&self, user_id: i64) -> Result<Vec<Position>, TradingError> {
        Ok(self
            .inner
            .lock()
            .positions
            .values()
            .filter(|p| p.user_id == user_id && p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn open_trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>, TradingError> {
        Ok(self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| t.position_id == position_id && t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn closed_pnl_in_open_book(&self, user_id: i64) -> Result<Decimal, TradingError> {
        let inner = self.inner.lock();
        let open_positions: Vec<i64> = inner
            .positions
            .values()
            .filter(|p| p.user_id == user_id && p.status == PositionStatus::Open)
            .map(|p| p.id)
            .collect();
        Ok(inner
            .trades
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.status == TradeStatus::Closed
                    && open_positions.contains(&t.position_id)
            })
            .filter_map(|t| t.pnl)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use options_desk_core::types::OrderSide;
    use rust_decimal_macros::dec;

    fn leg(user_id: i64, symbol: &str, side: OrderSide, price: Decimal, qty: i32) -> NewTrade {
        NewTrade {
            user_id,
            side,
            entry_time: Utc::now(),
            entry_price: price,
            quantity: qty,
            trading_symbol: symbol.to_string(),
        }
    }

    #[tokio::test]
    async fn find_or_create_reuses_one_row() {
        let ledger = MemoryLedger::new();
        let first = ledger
            .find_or_create_position(1, "NIFTY24D19", "Custom")
            .await
            .unwrap();
        let second = ledger
            .find_or_create_position(1, "NIFTY24D19", "Straddle")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(ledger.position_count(), 1);
        // The first recorded strategy survives a reopen.
        assert_eq!(second.strategy_name, "Custom");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_find_or_create_yields_one_row() {
        use std::sync::Arc;

        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .find_or_create_position(1, "NIFTY24D19", "Custom")
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::with_capacity(handles.len());
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(ledger.position_count(), 1);
    }

    #[tokio::test]
    async fn find_open_position_scopes_to_open_rows() {
        let ledger = MemoryLedger::new();
        assert!(ledger
            .find_open_position(1, "NIFTY24D19")
            .await
            .unwrap()
            .is_none());

        let (position, trade) = ledger
            .open_trade(
                "NIFTY24D19",
                "Custom",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();

        let found = ledger
            .find_open_position(1, "NIFTY24D19")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, position.id);
        // Exact match on the user too.
        assert!(ledger
            .find_open_position(2, "NIFTY24D19")
            .await
            .unwrap()
            .is_none());

        // Settling the only leg closes the position; CLOSED rows no longer
        // match.
        ledger
            .settle_trade(trade.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();
        assert!(ledger
            .find_open_position(1, "NIFTY24D19")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reopen_clears_end_time_and_total_pnl() {
        let ledger = MemoryLedger::new();
        let (position, trade) = ledger
            .open_trade(
                "NIFTY24D19",
                "Custom",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();
        let settled = ledger
            .settle_trade(trade.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();
        assert!(settled.position_closed);

        let reopened = ledger
            .find_or_create_position(1, "NIFTY24D19", "Custom")
            .await
            .unwrap();
        assert_eq!(reopened.id, position.id);
        assert_eq!(reopened.status, PositionStatus::Open);
        assert!(reopened.end_time.is_none());
        assert!(reopened.total_pnl.is_none());
    }

    #[tokio::test]
    async fn close_trade_is_one_shot() {
        let ledger = MemoryLedger::new();
        let (_, trade) = ledger
            .open_trade(
                "NIFTY24D19",
                "Custom",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();

        ledger
            .close_trade(trade.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();
        let err = ledger
            .close_trade(trade.id, dec!(200), Utc::now(), dec!(2500))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "already_closed");

        // No mutation on the second call.
        let stored = ledger.trade(trade.id).await.unwrap().unwrap();
        assert_eq!(stored.exit_price, Some(dec!(180)));
        assert_eq!(stored.pnl, Some(dec!(1500)));
    }

    #[tokio::test]
    async fn position_closes_only_after_the_last_leg() {
        let ledger = MemoryLedger::new();
        let (position, first) = ledger
            .open_trade(
                "NIFTY24D19",
                "Strangle",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();
        let second = ledger
            .record_trade(
                position.id,
                leg(1, "NIFTY24D1923000PE", OrderSide::Sell, dec!(80), 50),
            )
            .await
            .unwrap();

        let partial = ledger
            .settle_trade(first.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();
        assert!(!partial.position_closed);

        let full = ledger
            .settle_trade(second.id, dec!(60), Utc::now(), dec!(1000))
            .await
            .unwrap();
        assert!(full.position_closed);
        assert_eq!(full.position_total_pnl, Some(dec!(2500)));

        let stored = ledger.position(position.id).unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
        assert_eq!(stored.total_pnl, Some(dec!(2500)));
        assert!(stored.end_time.is_some());
    }

    #[tokio::test]
    async fn total_pnl_excludes_null_entries() {
        let ledger = MemoryLedger::new();
        let (position, priced) = ledger
            .open_trade(
                "NIFTY24D19",
                "Custom",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();
        let unpriced = ledger
            .record_trade(
                position.id,
                leg(1, "NIFTY24D1923000PE", OrderSide::Sell, dec!(80), 50),
            )
            .await
            .unwrap();

        ledger
            .close_trade(priced.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();
        // Reconciliation-style close: no exit data, pnl stays null.
        ledger.mark_trade_closed(unpriced.id).await.unwrap();

        assert!(ledger.maybe_close_position(position.id).await.unwrap());
        let stored = ledger.position(position.id).unwrap();
        assert_eq!(stored.total_pnl, Some(dec!(1500)));
    }

    #[tokio::test]
    async fn closed_pnl_scopes_to_the_open_book() {
        let ledger = MemoryLedger::new();

        // Open position with one closed leg and one open leg.
        let (open_book, closed_leg) = ledger
            .open_trade(
                "NIFTY24D19",
                "Custom",
                leg(1, "NIFTY24D1924000CE", OrderSide::Buy, dec!(150), 50),
            )
            .await
            .unwrap();
        ledger
            .record_trade(
                open_book.id,
                leg(1, "NIFTY24D1923000PE", OrderSide::Sell, dec!(80), 50),
            )
            .await
            .unwrap();
        ledger
            .close_trade(closed_leg.id, dec!(180), Utc::now(), dec!(1500))
            .await
            .unwrap();

        // Fully closed position elsewhere must not count.
        let (_, other) = ledger
            .open_trade(
                "BANKNIFTY24D18",
                "Custom",
                leg(1, "BANKNIFTY24D1851000CE", OrderSide::Buy, dec!(300), 15),
            )
            .await
            .unwrap();
        ledger
            .settle_trade(other.id, dec!(250), Utc::now(), dec!(-750))
            .await
            .unwrap();

        assert_eq!(
            ledger.closed_pnl_in_open_book(1).await.unwrap(),
            dec!(1500)
        );
    }
}
