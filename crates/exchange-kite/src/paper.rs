//! Paper trading broker shim.
//!
//! Simulates the broker capability in memory without touching the exchange.
//! Useful for exercising the full order/reconciliation pipeline before a
//! live session exists, and for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use options_desk_core::error::TradingError;
use options_desk_core::symbol;
use options_desk_core::traits::Broker;
use options_desk_core::types::{
    Exchange, InstrumentRecord, LivePosition, OrderRequest, PlacedOrder, Quote,
};

/// In-memory broker. Quotes are keyed `"EXCHANGE:SYMBOL"` like the real
/// quote API; fills use the quoted last price, falling back to zero the way
/// the live flow falls back when the order book has no average price yet.
#[derive(Default)]
pub struct PaperBroker {
    quotes: Mutex<HashMap<String, Quote>>,
    live: Mutex<Vec<LivePosition>>,
    instruments: Mutex<HashMap<Exchange, Vec<InstrumentRecord>>>,
    order_book: Mutex<Vec<PlacedOrder>>,
    placements: Mutex<Vec<OrderRequest>>,
    reject_symbols: Mutex<HashSet<String>>,
    next_order: AtomicU64,
    reject_orders: AtomicBool,
    fail_quotes: AtomicBool,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Quote a symbol; stored under its `"EXCHANGE:SYMBOL"` key.
    pub fn set_quote(&self, trading_symbol: &str, last_price: Decimal) {
        self.quotes
            .lock()
            .insert(symbol::quote_key(trading_symbol), Quote { last_price });
    }

    pub fn remove_quote(&self, trading_symbol: &str) {
        self.quotes.lock().remove(&symbol::quote_key(trading_symbol));
    }

    /// Make every quote call fail, exercising the degrade paths.
    pub fn fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    /// Make every placement come back rejected.
    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// Reject placements for one trading symbol only.
    pub fn reject_orders_for(&self, trading_symbol: &str) {
        self.reject_symbols.lock().insert(trading_symbol.to_string());
    }

    /// Add a leg to the simulated net position report.
    pub fn push_live_position(&self, position: LivePosition) {
        self.live.lock().push(position);
    }

    pub fn clear_live_positions(&self) {
        self.live.lock().clear();
    }

    pub fn set_instruments(&self, exchange: Exchange, records: Vec<InstrumentRecord>) {
        self.instruments.lock().insert(exchange, records);
    }

    /// Every order placed so far, in placement order.
    #[must_use]
    pub fn placements(&self) -> Vec<OrderRequest> {
        self.placements.lock().clone()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, Quote>, TradingError> {
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(TradingError::QuoteUnavailable {
                symbol: keys.join(","),
            });
        }
        let quotes = self.quotes.lock();
        Ok(keys
            .iter()
            .filter_map(|k| quotes.get(k).map(|q| (k.clone(), *q)))
            .collect())
    }

    async fn positions(&self) -> Result<Vec<LivePosition>, TradingError> {
        Ok(self.live.lock().clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, TradingError> {
        if self.reject_orders.load(Ordering::SeqCst)
            || self.reject_symbols.lock().contains(&order.trading_symbol)
        {
            return Err(TradingError::BrokerRejected {
                reason: "paper broker configured to reject".to_string(),
            });
        }

        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("PAPER-{n}");
        let fill_price = self
            .quotes
            .lock()
            .get(&symbol::quote_key(&order.trading_symbol))
            .map(|q| q.last_price);

        self.order_book.lock().push(PlacedOrder {
            order_id: order_id.clone(),
            average_price: fill_price,
            status: Some("COMPLETE".to_string()),
        });
        self.placements.lock().push(order.clone());

        info!(
            order_id,
            symbol = order.trading_symbol,
            side = %order.side,
            quantity = order.quantity,
            "Paper fill simulated"
        );
        Ok(order_id)
    }

    async fn orders(&self) -> Result<Vec<PlacedOrder>, TradingError> {
        Ok(self.order_book.lock().clone())
    }

    async fn instruments(&self, exchange: Exchange) -> Result<Vec<InstrumentRecord>, TradingError> {
        Ok(self
            .instruments
            .lock()
            .get(&exchange)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use options_desk_core::types::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn fills_at_the_quoted_price() {
        let broker = PaperBroker::new();
        broker.set_quote("NIFTY24D1924000CE", dec!(151.25));

        let order = OrderRequest::market(
            "NIFTY24D1924000CE".to_string(),
            Exchange::Nfo,
            OrderSide::Buy,
            50,
        );
        let order_id = broker.place_order(&order).await.unwrap();

        let book = broker.orders().await.unwrap();
        let placed = book.iter().find(|o| o.order_id == order_id).unwrap();
        assert_eq!(placed.average_price, Some(dec!(151.25)));
    }

    #[tokio::test]
    async fn rejection_maps_to_broker_rejected() {
        let broker = PaperBroker::new();
        broker.reject_orders(true);
        let order = OrderRequest::market(
            "NIFTY24D1924000CE".to_string(),
            Exchange::Nfo,
            OrderSide::Buy,
            50,
        );
        let err = broker.place_order(&order).await.unwrap_err();
        assert_eq!(err.kind(), "broker_rejected");
    }

    #[tokio::test]
    async fn failed_quotes_surface_quote_unavailable() {
        let broker = PaperBroker::new();
        broker.fail_quotes(true);
        let err = broker
            .quote(&["NFO:NIFTY24D1924000CE".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "quote_unavailable");
    }
}
