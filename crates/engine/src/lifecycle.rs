//! Order lifecycle orchestration: open, square-off, bulk exits.
//!
//! Every flow places the broker order BEFORE touching the ledger, so a
//! broker failure leaves the ledger untouched and a ledger failure after a
//! successful order is surfaced distinctly (the order is live on the
//! exchange; operators must reconcile manually — retrying the write is
//! fine, retrying the order is not).
//!
//! Exit-price sourcing differs deliberately between the two close paths:
//! single square-off prices the exit from a dedicated quote, bulk exits
//! price it from the order-fill average. Unifying them would change
//! observable P&L, so both stay as explicitly separate paths.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use options_desk_core::error::TradingError;
use options_desk_core::pnl::close_trade_pnl;
use options_desk_core::symbol;
use options_desk_core::traits::{Broker, LedgerStore};
use options_desk_core::types::{NewTrade, OrderRequest, OrderSide, Trade, TradeStatus};

use crate::requests::{
    AbortedExit, BulkExitReport, OpenTradeReceipt, OpenTradeRequest, PlaceOrderReceipt,
    PlaceOrderRequest, SquareOffOutcome, SquareOffReceipt, DEFAULT_STRATEGY,
};

pub struct TradingService {
    ledger: Arc<dyn LedgerStore>,
    broker: Arc<dyn Broker>,
}

impl TradingService {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, broker: Arc<dyn Broker>) -> Self {
        Self { ledger, broker }
    }

    /// Record a fill that already happened (manual entry). No broker call;
    /// the position is found-or-created from the symbol's instrument key
    /// and the trade appended in the same transaction.
    pub async fn open_trade(
        &self,
        req: OpenTradeRequest,
    ) -> Result<OpenTradeReceipt, TradingError> {
        let instrument = symbol::instrument_key(&req.trading_symbol)?.to_string();
        let strategy = req.strategy_name.as_deref().unwrap_or(DEFAULT_STRATEGY);

        let (position, trade) = self
            .ledger
            .open_trade(
                &instrument,
                strategy,
                NewTrade {
                    user_id: req.user_id,
                    side: req.order_type,
                    entry_time: Utc::now(),
                    entry_price: req.entry_price,
                    quantity: req.quantity,
                    trading_symbol: req.trading_symbol,
                },
            )
            .await?;

        info!(
            user_id = req.user_id,
            position_id = position.id,
            trade_id = trade.id,
            instrument,
            "Trade opened"
        );
        Ok(OpenTradeReceipt {
            trade_id: trade.id,
            position_id: position.id,
        })
    }

    /// Full order flow: resolve the nearest expiry for the underlying,
    /// build the trading symbol, place the order, record the leg at its
    /// fill price.
    pub async fn place_order(
        &self,
        req: PlaceOrderRequest,
    ) -> Result<PlaceOrderReceipt, TradingError> {
        let exchange = symbol::exchange_for(&req.symbol);

        let instruments = self.broker.instruments(exchange).await?;
        let expiry = instruments
            .iter()
            .filter(|i| {
                i.name == req.symbol && matches!(i.instrument_type.as_str(), "CE" | "PE")
            })
            .map(|i| i.expiry)
            .min()
            .ok_or_else(|| TradingError::BrokerUnavailable {
                endpoint: "instruments",
                reason: format!("no option instruments for {}", req.symbol),
            })?;

        let instrument = format!("{}{}", req.symbol, symbol::weekly_expiry_code(expiry));
        let trading_symbol =
            symbol::build_trading_symbol(&instrument, req.strike, req.option_type);
        let quantity = req.quantity * req.lot_size;

        let order = OrderRequest::market(
            trading_symbol.clone(),
            exchange,
            req.action,
            i64::from(quantity),
        );
        let order_id = self.broker.place_order(&order).await?;
        let entry_price = self.fill_price(&order_id).await;

        let strategy = req.strategy_name.as_deref().unwrap_or(DEFAULT_STRATEGY);
        let result = self
            .ledger
            .open_trade(
                &instrument,
                strategy,
                NewTrade {
                    user_id: req.user_id,
                    side: req.action,
                    entry_time: Utc::now(),
                    entry_price,
                    quantity,
                    trading_symbol: trading_symbol.clone(),
                },
            )
            .await;

        let (position, trade) = match result {
            Ok(pair) => pair,
            Err(e) => {
                // The order already executed on the exchange. This must not
                // be folded into a generic failure.
                error!(
                    order_id,
                    symbol = trading_symbol,
                    error = %e,
                    "Ledger write failed AFTER a successful broker order; manual reconciliation required"
                );
                return Err(e);
            }
        };

        info!(
            order_id,
            symbol = trading_symbol,
            position_id = position.id,
            trade_id = trade.id,
            entry_price = %entry_price,
            "Order placed and recorded"
        );
        Ok(PlaceOrderReceipt {
            order_id,
            trading_symbol,
            position_id: position.id,
            trade_id: trade.id,
        })
    }

    /// Close one leg: opposite-side market order, exit priced from a
    /// dedicated quote.
    pub async fn square_off(&self, trade_id: i64) -> Result<SquareOffReceipt, TradingError> {
        let trade = self
            .ledger
            .trade(trade_id)
            .await?
            .ok_or(TradingError::NotFound {
                entity: "trade",
                id: trade_id,
            })?;
        if trade.status == TradeStatus::Closed {
            return Err(TradingError::AlreadyClosed { trade_id });
        }

        let exchange = symbol::exchange_for(&trade.trading_symbol);
        let order = OrderRequest::market(
            trade.trading_symbol.clone(),
            exchange,
            trade.side.opposite(),
            i64::from(trade.quantity),
        );
        let order_id = self.broker.place_order(&order).await?;

        let exit_price = self.quoted_price(&trade.trading_symbol).await;
        let pnl = close_trade_pnl(trade.side, trade.entry_price, exit_price, trade.quantity);
        let settled = self
            .ledger
            .settle_trade(trade.id, exit_price, Utc::now(), pnl)
            .await?;

        info!(
            trade_id,
            order_id,
            exit_price = %exit_price,
            pnl = %pnl,
            position_closed = settled.position_closed,
            "Trade squared off"
        );
        Ok(SquareOffReceipt {
            order_id,
            pnl,
            exit_price,
        })
    }

    /// Close the given trades (the OPEN ones belonging to the user).
    pub async fn exit_selected(
        &self,
        user_id: i64,
        trade_ids: &[i64],
    ) -> Result<BulkExitReport, TradingError> {
        let trades: Vec<Trade> = self
            .ledger
            .open_trades_among(trade_ids)
            .await?
            .into_iter()
            .filter(|t| t.user_id == user_id)
            .collect();
        self.bulk_exit(trades).await
    }

    /// Close every open trade the user has.
    pub async fn exit_all(&self, user_id: i64) -> Result<BulkExitReport, TradingError> {
        let trades = self.ledger.open_trades_for_user(user_id).await?;
        self.bulk_exit(trades).await
    }

    /// Bulk close: all SELL legs first, then all BUY legs. Each leg is one
    /// logical operation (its own transaction); a failed leg aborts the
    /// remainder, and the report still carries every leg that settled
    /// before the abort — already-closed legs stay closed.
    async fn bulk_exit(&self, trades: Vec<Trade>) -> Result<BulkExitReport, TradingError> {
        let (sells, buys): (Vec<Trade>, Vec<Trade>) = trades
            .into_iter()
            .partition(|t| t.side == OrderSide::Sell);

        let mut closed = Vec::new();
        for trade in sells.into_iter().chain(buys) {
            match self.exit_leg(&trade).await {
                Ok(outcome) => closed.push(outcome),
                Err(e) => {
                    warn!(
                        trade_id = trade.id,
                        closed = closed.len(),
                        error = %e,
                        "Bulk exit aborted mid-way"
                    );
                    return Ok(BulkExitReport {
                        closed,
                        aborted: Some(AbortedExit {
                            trade_id: trade.id,
                            error_kind: e.kind().to_string(),
                            message: e.to_string(),
                        }),
                    });
                }
            }
        }
        Ok(BulkExitReport {
            closed,
            aborted: None,
        })
    }

    /// Close one leg inside a bulk exit: exit priced from the order-fill
    /// average, not a quote.
    async fn exit_leg(&self, trade: &Trade) -> Result<SquareOffOutcome, TradingError> {
        let exchange = symbol::exchange_for(&trade.trading_symbol);
        let order = OrderRequest::market(
            trade.trading_symbol.clone(),
            exchange,
            trade.side.opposite(),
            i64::from(trade.quantity),
        );
        let order_id = self.broker.place_order(&order).await?;

        let exit_price = self.fill_price(&order_id).await;
        let pnl = close_trade_pnl(trade.side, trade.entry_price, exit_price, trade.quantity);
        let settled = self
            .ledger
            .settle_trade(trade.id, exit_price, Utc::now(), pnl)
            .await?;

        info!(
            trade_id = trade.id,
            order_id,
            exit_price = %exit_price,
            pnl = %pnl,
            "Leg exited"
        );
        Ok(SquareOffOutcome {
            trade_id: trade.id,
            order_id,
            exit_price,
            pnl,
            position_closed: settled.position_closed,
        })
    }

    /// Average fill price for an order from the order book; zero when the
    /// book has no price yet (degrade, logged).
    async fn fill_price(&self, order_id: &str) -> Decimal {
        match self.broker.orders().await {
            Ok(book) => match book
                .iter()
                .find(|o| o.order_id == order_id)
                .and_then(|o| o.average_price)
            {
                Some(price) => price,
                None => {
                    warn!(order_id, "No average price in order book; recording 0");
                    Decimal::ZERO
                }
            },
            Err(e) => {
                warn!(order_id, error = %e, "Order book fetch failed; recording 0");
                Decimal::ZERO
            }
        }
    }

    /// Dedicated last-traded-price quote; zero when unavailable (degrade,
    /// logged — quote failures are never fatal).
    async fn quoted_price(&self, trading_symbol: &str) -> Decimal {
        let key = symbol::quote_key(trading_symbol);
        match self.broker.quote(std::slice::from_ref(&key)).await {
            Ok(quotes) => match quotes.get(&key) {
                Some(quote) => quote.last_price,
                None => {
                    warn!(symbol = trading_symbol, "Quote response missing symbol; using 0");
                    Decimal::ZERO
                }
            },
            Err(e) => {
                warn!(symbol = trading_symbol, error = %e, "Quote failed; using 0");
                Decimal::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use options_desk_core::types::{Exchange, InstrumentRecord, OptionType, PositionStatus};
    use options_desk_kite::PaperBroker;
    use options_desk_ledger::MemoryLedger;
    use rust_decimal_macros::dec;

    fn service() -> (Arc<MemoryLedger>, Arc<PaperBroker>, TradingService) {
        let ledger = Arc::new(MemoryLedger::new());
        let broker = Arc::new(PaperBroker::new());
        let service = TradingService::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&broker) as Arc<dyn Broker>,
        );
        (ledger, broker, service)
    }

    fn nifty_option(trading_symbol: &str, strike: u32, option_type: &str) -> InstrumentRecord {
        InstrumentRecord {
            name: "NIFTY".to_string(),
            instrument_type: option_type.to_string(),
            expiry: NaiveDate::from_ymd_opt(2024, 12, 19).unwrap(),
            strike: Decimal::from(strike),
            instrument_token: 1,
            trading_symbol: trading_symbol.to_string(),
        }
    }

    #[tokio::test]
    async fn open_then_square_off_scenario() {
        let (ledger, broker, service) = service();

        let receipt = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "NIFTY24D1924000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();

        let position = ledger.position(receipt.position_id).unwrap();
        assert_eq!(position.instrument, "NIFTY24D19");
        assert_eq!(position.status, PositionStatus::Open);

        broker.set_quote("NIFTY24D1924000CE", dec!(180));
        let closed = service.square_off(receipt.trade_id).await.unwrap();
        assert_eq!(closed.exit_price, dec!(180));
        assert_eq!(closed.pnl, dec!(1500));

        let trade = ledger.trade(receipt.trade_id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        let position = ledger.position(receipt.position_id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.total_pnl, Some(dec!(1500)));

        // The square-off placed the opposite side.
        let placements = broker.placements();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].side, OrderSide::Sell);
        assert_eq!(placements[0].quantity, 50);
    }

    #[tokio::test]
    async fn second_square_off_fails_without_mutation() {
        let (ledger, broker, service) = service();
        let receipt = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "NIFTY24D1924000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();

        broker.set_quote("NIFTY24D1924000CE", dec!(180));
        service.square_off(receipt.trade_id).await.unwrap();

        let err = service.square_off(receipt.trade_id).await.unwrap_err();
        assert_eq!(err.kind(), "already_closed");

        // No second order went out and the stored exit is unchanged.
        assert_eq!(broker.placements().len(), 1);
        let trade = ledger.trade(receipt.trade_id).await.unwrap().unwrap();
        assert_eq!(trade.exit_price, Some(dec!(180)));
    }

    #[tokio::test]
    async fn square_off_unknown_trade_is_not_found() {
        let (_, _, service) = service();
        let err = service.square_off(999).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn place_order_builds_symbol_from_nearest_expiry() {
        let (ledger, broker, service) = service();
        broker.set_instruments(
            Exchange::Nfo,
            vec![
                nifty_option("NIFTY24L1924000CE", 24000, "CE"),
                nifty_option("NIFTY24L1924000PE", 24000, "PE"),
            ],
        );
        broker.set_quote("NIFTY24L1924000CE", dec!(151.5));

        let receipt = service
            .place_order(PlaceOrderRequest {
                user_id: 1,
                symbol: "NIFTY".to_string(),
                strike: 24000,
                option_type: OptionType::Ce,
                action: OrderSide::Buy,
                quantity: 2,
                lot_size: 25,
                strategy_name: Some("Breakout".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(receipt.trading_symbol, "NIFTY24L1924000CE");
        let trade = ledger.trade(receipt.trade_id).await.unwrap().unwrap();
        assert_eq!(trade.quantity, 50);
        // Entry price came from the simulated fill.
        assert_eq!(trade.entry_price, dec!(151.5));

        let position = ledger.position(receipt.position_id).unwrap();
        assert_eq!(position.instrument, "NIFTY24L19");
        assert_eq!(position.strategy_name, "Breakout");
    }

    #[tokio::test]
    async fn place_order_missing_fill_price_records_zero() {
        let (ledger, broker, service) = service();
        broker.set_instruments(
            Exchange::Nfo,
            vec![nifty_option("NIFTY24L1924000CE", 24000, "CE")],
        );
        // No quote: the paper book has no average price for the fill.

        let receipt = service
            .place_order(PlaceOrderRequest {
                user_id: 1,
                symbol: "NIFTY".to_string(),
                strike: 24000,
                option_type: OptionType::Ce,
                action: OrderSide::Buy,
                quantity: 1,
                lot_size: 25,
                strategy_name: None,
            })
            .await
            .unwrap();

        let trade = ledger.trade(receipt.trade_id).await.unwrap().unwrap();
        assert_eq!(trade.entry_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn rejected_order_leaves_the_ledger_untouched() {
        let (ledger, broker, service) = service();
        broker.set_instruments(
            Exchange::Nfo,
            vec![nifty_option("NIFTY24L1924000CE", 24000, "CE")],
        );
        broker.reject_orders(true);

        let err = service
            .place_order(PlaceOrderRequest {
                user_id: 1,
                symbol: "NIFTY".to_string(),
                strike: 24000,
                option_type: OptionType::Ce,
                action: OrderSide::Buy,
                quantity: 1,
                lot_size: 25,
                strategy_name: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "broker_rejected");
        assert_eq!(ledger.position_count(), 0);
    }

    #[tokio::test]
    async fn bulk_exit_processes_sell_legs_before_buy_legs() {
        let (ledger, broker, service) = service();

        let buy = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "NIFTY24D1924000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();
        let sell = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Sell,
                entry_price: dec!(80),
                quantity: 50,
                trading_symbol: "NIFTY24D1923000PE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();

        broker.set_quote("NIFTY24D1924000CE", dec!(160));
        broker.set_quote("NIFTY24D1923000PE", dec!(70));

        let report = service.exit_all(1).await.unwrap();
        assert_eq!(report.closed.len(), 2);
        assert!(report.aborted.is_none());

        // The short leg is covered first: a BUY order for the PE symbol.
        let placements = broker.placements();
        assert_eq!(placements[0].trading_symbol, "NIFTY24D1923000PE");
        assert_eq!(placements[0].side, OrderSide::Buy);
        assert_eq!(placements[1].trading_symbol, "NIFTY24D1924000CE");
        assert_eq!(placements[1].side, OrderSide::Sell);

        // Exit prices came from the order-fill average (the paper fill).
        let sell_outcome = report
            .closed
            .iter()
            .find(|o| o.trade_id == sell.trade_id)
            .unwrap();
        assert_eq!(sell_outcome.exit_price, dec!(70));
        assert_eq!(sell_outcome.pnl, dec!(500));
        let buy_outcome = report
            .closed
            .iter()
            .find(|o| o.trade_id == buy.trade_id)
            .unwrap();
        assert_eq!(buy_outcome.pnl, dec!(500));

        assert!(ledger.open_trades_for_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exit_selected_ignores_other_users_trades() {
        let (ledger, broker, service) = service();

        let mine = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "NIFTY24D1924000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();
        let theirs = service
            .open_trade(OpenTradeRequest {
                user_id: 2,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "BANKNIFTY24D1851000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();

        broker.set_quote("NIFTY24D1924000CE", dec!(160));
        let report = service
            .exit_selected(1, &[mine.trade_id, theirs.trade_id])
            .await
            .unwrap();

        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].trade_id, mine.trade_id);
        let other = ledger.trade(theirs.trade_id).await.unwrap().unwrap();
        assert_eq!(other.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn bulk_exit_reports_partial_progress_on_a_failed_leg() {
        let (ledger, broker, service) = service();

        let buy = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Buy,
                entry_price: dec!(150),
                quantity: 50,
                trading_symbol: "NIFTY24D1924000CE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();
        let sell = service
            .open_trade(OpenTradeRequest {
                user_id: 1,
                order_type: OrderSide::Sell,
                entry_price: dec!(80),
                quantity: 50,
                trading_symbol: "NIFTY24D1923000PE".to_string(),
                strategy_name: None,
            })
            .await
            .unwrap();

        broker.set_quote("NIFTY24D1923000PE", dec!(70));
        // The SELL leg covers first; the BUY leg's exit order then bounces.
        broker.reject_orders_for("NIFTY24D1924000CE");

        let report = service.exit_all(1).await.unwrap();
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].trade_id, sell.trade_id);

        let aborted = report.aborted.unwrap();
        assert_eq!(aborted.trade_id, buy.trade_id);
        assert_eq!(aborted.error_kind, "broker_rejected");

        // The settled leg stays settled, the failed leg stays open.
        let settled = ledger.trade(sell.trade_id).await.unwrap().unwrap();
        assert_eq!(settled.status, TradeStatus::Closed);
        let open = ledger.trade(buy.trade_id).await.unwrap().unwrap();
        assert_eq!(open.status, TradeStatus::Open);
    }
}
