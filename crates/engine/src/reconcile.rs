//! Broker/ledger reconciliation.
//!
//! The broker's net position report is the authority on what is actually
//! open; the ledger is the authority on trade identity and entry data. The
//! positions view cross-references the two on the instrument key and heals
//! drift: a ledger trade whose instrument the broker no longer reports at
//! all was closed outside this system, so it is marked closed here (with no
//! exit data — the fill price is unknown). An instrument the broker still
//! reports, just not this exact leg's symbol, is ambiguous and left alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use options_desk_core::error::TradingError;
use options_desk_core::symbol::{instrument_key, quote_key};
use options_desk_core::traits::{Broker, LedgerStore};
use options_desk_core::types::LivePosition;

use crate::pnl::aggregate_user_pnl;
use crate::requests::{PositionRow, PositionsView};

pub struct ReconciliationEngine {
    ledger: Arc<dyn LedgerStore>,
    broker: Arc<dyn Broker>,
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, broker: Arc<dyn Broker>) -> Self {
        Self { ledger, broker }
    }

    /// The reconciled view of the user's open book.
    ///
    /// Each row merges a broker-reported leg (quantity, average price, pnl)
    /// with the ledger trade it belongs to (trade id, side) and a live
    /// quote. Trades whose instrument vanished from the broker report are
    /// closed as a side effect, and their positions settled when that was
    /// the last open leg. Fails only when the broker position report itself
    /// is unreachable; quote failures degrade to a zero current price.
    pub async fn positions_view(&self, user_id: i64) -> Result<PositionsView, TradingError> {
        let live = self.broker.positions().await?;
        let live_by_instrument = group_by_instrument(&live);

        let open_positions = self.ledger.open_positions_for_user(user_id).await?;
        let mut book = Vec::with_capacity(open_positions.len());
        for position in open_positions {
            let trades = self.ledger.open_trades_for_position(position.id).await?;
            if !trades.is_empty() {
                book.push((position, trades));
            }
        }

        // One batched quote for every open leg in the book.
        let keys: Vec<String> = book
            .iter()
            .flat_map(|(_, trades)| trades.iter())
            .map(|t| quote_key(&t.trading_symbol))
            .collect();
        let quotes = if keys.is_empty() {
            HashMap::new()
        } else {
            match self.broker.quote(&keys).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    warn!(user_id, error = %e, "Quote batch failed; view rows carry zero prices");
                    HashMap::new()
                }
            }
        };

        let mut rows = Vec::new();
        for (position, trades) in &book {
            let mut drifted = false;
            for trade in trades {
                let Some(legs) = live_by_instrument.get(position.instrument.as_str()) else {
                    // The broker reports nothing for this instrument: the
                    // whole position was flattened outside this system.
                    info!(
                        trade_id = trade.id,
                        symbol = trade.trading_symbol,
                        "Broker no longer reports this instrument; closing trade without exit data"
                    );
                    self.ledger.mark_trade_closed(trade.id).await?;
                    drifted = true;
                    continue;
                };

                match legs.iter().find(|l| l.trading_symbol == trade.trading_symbol) {
                    Some(leg) => {
                        let current_price = quotes
                            .get(&quote_key(&trade.trading_symbol))
                            .map_or(Decimal::ZERO, |q| q.last_price);
                        rows.push(PositionRow {
                            trading_symbol: trade.trading_symbol.clone(),
                            quantity: leg.quantity,
                            average_price: leg.average_price,
                            pnl: leg.pnl,
                            trade_id: trade.id,
                            order_type: trade.side,
                            current_price,
                        });
                    }
                    None => {
                        // The instrument is still live but this exact leg is
                        // not in the report. Could be a strike the broker
                        // netted out mid-refresh; not enough evidence to
                        // close, so the trade stays open and gets no row.
                        warn!(
                            trade_id = trade.id,
                            symbol = trade.trading_symbol,
                            instrument = position.instrument,
                            "Instrument live at broker but this leg is missing; leaving trade open"
                        );
                    }
                }
            }

            if drifted && self.ledger.maybe_close_position(position.id).await? {
                info!(
                    position_id = position.id,
                    instrument = position.instrument,
                    "Position settled after reconciliation closed its last open leg"
                );
            }
        }

        let total_pnl = aggregate_user_pnl(self.ledger.as_ref(), self.broker.as_ref(), user_id)
            .await?;

        Ok(PositionsView {
            net: rows,
            total_pnl,
        })
    }
}

/// Group non-flat broker legs by instrument key. Legs whose symbol does not
/// carry the strike + option-type suffix (equity hedges, futures) cannot be
/// keyed and are skipped.
fn group_by_instrument(live: &[LivePosition]) -> HashMap<&str, Vec<&LivePosition>> {
    let mut grouped: HashMap<&str, Vec<&LivePosition>> = HashMap::new();
    let mut skipped: HashSet<&str> = HashSet::new();
    for leg in live {
        if leg.quantity == 0 {
            continue;
        }
        match instrument_key(&leg.trading_symbol) {
            Ok(key) => grouped.entry(key).or_default().push(leg),
            Err(_) => {
                if skipped.insert(leg.trading_symbol.as_str()) {
                    warn!(
                        symbol = leg.trading_symbol,
                        "Broker leg without an option suffix; excluded from reconciliation"
                    );
                }
            }
        }
    }
    grouped
}
