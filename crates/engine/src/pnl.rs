//! Aggregate P&L across a user's book.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;

use options_desk_core::error::TradingError;
use options_desk_core::pnl::{close_trade_pnl, round_money};
use options_desk_core::symbol::quote_key;
use options_desk_core::traits::{Broker, LedgerStore};

/// Total P&L for a user's open book: realized pnl of CLOSED trades inside
/// currently-OPEN positions, plus mark-to-market of every OPEN trade using
/// a live quote as the hypothetical exit price.
///
/// A missing quote excludes that leg's contribution (logged, never fatal).
pub async fn aggregate_user_pnl(
    ledger: &dyn LedgerStore,
    broker: &dyn Broker,
    user_id: i64,
) -> Result<Decimal, TradingError> {
    let mut total = ledger.closed_pnl_in_open_book(user_id).await?;

    let open_trades = ledger.open_trades_for_user(user_id).await?;
    if open_trades.is_empty() {
        return Ok(round_money(total));
    }

    let keys: Vec<String> = open_trades
        .iter()
        .map(|t| quote_key(&t.trading_symbol))
        .collect();
    let quotes = match broker.quote(&keys).await {
        Ok(quotes) => quotes,
        Err(e) => {
            warn!(user_id, error = %e, "Quote batch failed; open legs excluded from aggregate");
            HashMap::new()
        }
    };

    for trade in &open_trades {
        match quotes.get(&quote_key(&trade.trading_symbol)) {
            Some(quote) => {
                total += close_trade_pnl(
                    trade.side,
                    trade.entry_price,
                    quote.last_price,
                    trade.quantity,
                );
            }
            None => {
                warn!(
                    trade_id = trade.id,
                    symbol = trade.trading_symbol,
                    "No quote for open leg; skipping its P&L contribution"
                );
            }
        }
    }

    Ok(round_money(total))
}
