//! Domain model: positions, trades, and the broker-facing wire types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade leg. Quantity is always a positive count; the
/// direction lives here, never in a signed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that squares off this one.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Parse the persisted form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Option contract type as it appears in the trading-symbol suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ce => "CE",
            Self::Pe => "PE",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CE" => Some(Self::Ce),
            "PE" => Some(Self::Pe),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exchange segment an order is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// NSE futures & options.
    Nfo,
    /// BSE futures & options.
    Bfo,
}

impl Exchange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nfo => "NFO",
            Self::Bfo => "BFO",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade lifecycle state. The transition is one-shot: OPEN → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Position lifecycle state. A closed position may be reopened by a new
/// order against the same instrument (reuse-and-reopen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// A logical grouping of trade legs against one instrument (underlying +
/// expiry) for one user and strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub user_id: i64,
    pub strategy_name: String,
    /// Grouping key derived from the trading symbol, not the full symbol.
    pub instrument: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    /// Set only when the position is CLOSED: sum of child trade pnl
    /// values, null entries excluded.
    pub total_pnl: Option<Decimal>,
}

/// One executed fill (leg) belonging to exactly one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub position_id: i64,
    pub user_id: i64,
    pub side: OrderSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    /// Unsigned leg size; direction is carried by `side`.
    pub quantity: i32,
    pub pnl: Option<Decimal>,
    pub status: TradeStatus,
    /// Full exchange symbol: instrument key + strike + option type.
    pub trading_symbol: String,
}

/// Fields for appending a new OPEN trade under a position.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: i64,
    pub side: OrderSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub quantity: i32,
    pub trading_symbol: String,
}

/// Result of closing a trade and settling its position in one operation.
#[derive(Debug, Clone)]
pub struct SettledTrade {
    pub trade: Trade,
    /// True when this was the last open leg and the position closed too.
    pub position_closed: bool,
    /// Position total pnl when it closed.
    pub position_total_pnl: Option<Decimal>,
}

// =============================================================================
// Broker-facing types
// =============================================================================

/// A last-traded-price quote for one trading symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub last_price: Decimal,
}

/// One leg of the broker's net position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePosition {
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
    /// Signed net quantity as the broker reports it; zero means flat.
    pub quantity: i64,
    pub average_price: Decimal,
    pub pnl: Decimal,
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

/// Product type for order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Overnight (normal) margin product.
    Nrml,
}

impl Product {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nrml => "NRML",
        }
    }
}

/// Execution style for order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
}

impl OrderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
        }
    }
}

/// Order variety for order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variety {
    Regular,
}

impl Variety {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
        }
    }
}

/// An order to place with the broker.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub trading_symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    /// Contracts, already multiplied by lot size.
    pub quantity: i64,
    pub product: Product,
    pub order_kind: OrderKind,
    pub variety: Variety,
}

impl OrderRequest {
    /// A regular NRML market order, the only shape the desk places.
    #[must_use]
    pub fn market(trading_symbol: String, exchange: Exchange, side: OrderSide, quantity: i64) -> Self {
        Self {
            trading_symbol,
            exchange,
            side,
            quantity,
            product: Product::Nrml,
            order_kind: OrderKind::Market,
            variety: Variety::Regular,
        }
    }
}

/// One entry from the broker's order book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    #[serde(default)]
    pub average_price: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One row of the broker's instruments dump for an exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub name: String,
    pub instrument_type: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub instrument_token: i64,
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
}
