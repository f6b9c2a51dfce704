//! Error taxonomy shared across the desk.

use thiserror::Error;

/// Every failure kind a trading operation can surface.
///
/// `QuoteUnavailable` is the one degrade-only kind: callers absorb it with a
/// documented fallback (zero price or a skipped P&L contribution) and it
/// never reaches the API boundary. Everything else aborts the operation and
/// rolls back any in-flight transaction.
#[derive(Error, Debug)]
pub enum TradingError {
    /// The trading symbol cannot carry a strike + option-type suffix.
    #[error("malformed trading symbol {symbol:?}: {reason}")]
    MalformedSymbol { symbol: String, reason: &'static str },

    /// A trade or position the caller named does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The trade already went through its one OPEN → CLOSED transition.
    #[error("trade {trade_id} is already closed")]
    AlreadyClosed { trade_id: i64 },

    /// The exchange refused the order.
    #[error("broker rejected order: {reason}")]
    BrokerRejected { reason: String },

    /// Order placement timed out: the order may or may not have been
    /// accepted. Never blind-retried — a duplicate market fill is worse
    /// than a manual check.
    #[error("order placement timed out; exchange state is ambiguous")]
    AmbiguousOrderState,

    /// A quote lookup failed. Degrade-only, never surfaced to callers.
    #[error("quote unavailable for {symbol}")]
    QuoteUnavailable { symbol: String },

    /// A broker read endpoint (positions, orders, instruments) failed.
    /// Distinct from `BrokerRejected`, which means the exchange refused an
    /// order we asked it to place.
    #[error("broker {endpoint} call failed: {reason}")]
    BrokerUnavailable { endpoint: &'static str, reason: String },

    /// The ledger store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl TradingError {
    /// Stable kind tag for structured logs and API error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSymbol { .. } => "malformed_symbol",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyClosed { .. } => "already_closed",
            Self::BrokerRejected { .. } => "broker_rejected",
            Self::AmbiguousOrderState => "ambiguous_order_state",
            Self::QuoteUnavailable { .. } => "quote_unavailable",
            Self::BrokerUnavailable { .. } => "broker_unavailable",
            Self::Persistence(_) => "persistence",
        }
    }
}
