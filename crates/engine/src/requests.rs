//! Request/response structures for the trading operations.
//!
//! Explicit, validated shapes — the boundary never passes loose maps
//! around. These serialize as the JSON bodies the HTTP layer exchanges.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use options_desk_core::types::{OptionType, OrderSide};

/// Default strategy tag when the caller does not supply one.
pub const DEFAULT_STRATEGY: &str = "Custom";

/// Manual trade entry: the fill already happened, record it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTradeRequest {
    pub user_id: i64,
    pub order_type: OrderSide,
    pub entry_price: Decimal,
    pub quantity: i32,
    pub trading_symbol: String,
    #[serde(default)]
    pub strategy_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTradeReceipt {
    pub trade_id: i64,
    pub position_id: i64,
}

/// Place a fresh order with the broker and record the resulting leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: i64,
    /// Underlying symbol, e.g. `NIFTY` or `SENSEX`.
    pub symbol: String,
    pub strike: u32,
    pub option_type: OptionType,
    pub action: OrderSide,
    pub quantity: i32,
    pub lot_size: i32,
    #[serde(default)]
    pub strategy_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderReceipt {
    pub order_id: String,
    pub trading_symbol: String,
    pub position_id: i64,
    pub trade_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareOffReceipt {
    pub order_id: String,
    pub pnl: Decimal,
    pub exit_price: Decimal,
}

/// One closed leg of a bulk exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareOffOutcome {
    pub trade_id: i64,
    pub order_id: String,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub position_closed: bool,
}

/// The leg a bulk exit stopped on; legs after it were not attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortedExit {
    pub trade_id: i64,
    pub error_kind: String,
    pub message: String,
}

/// What a bulk exit accomplished. `closed` lists the settled legs even when
/// the run aborted part-way; `aborted` carries the leg it stopped on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkExitReport {
    pub closed: Vec<SquareOffOutcome>,
    #[serde(default)]
    pub aborted: Option<AbortedExit>,
}

/// One row of the reconciled positions view: broker-reported quantity,
/// average price and pnl merged with the ledger's trade identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRow {
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
    pub quantity: i64,
    pub average_price: Decimal,
    pub pnl: Decimal,
    pub trade_id: i64,
    pub order_type: OrderSide,
    pub current_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsView {
    pub net: Vec<PositionRow>,
    pub total_pnl: Decimal,
}
