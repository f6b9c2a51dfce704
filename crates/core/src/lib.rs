//! Core types, traits, and pure logic for the options desk.
//!
//! Everything here is broker- and database-agnostic: the domain model
//! (positions, trades), the symbol codec that derives instrument keys from
//! trading symbols, per-trade P&L math, the error taxonomy, and the traits
//! the `exchange-kite` and `ledger` crates implement.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod pnl;
pub mod symbol;
pub mod traits;
pub mod types;

pub use config::{AppConfig, BrokerConfig, DatabaseConfig};
pub use error::TradingError;
pub use traits::{Broker, LedgerStore};
pub use types::{
    Exchange, InstrumentRecord, LivePosition, NewTrade, OptionType, OrderKind, OrderRequest,
    OrderSide, PlacedOrder, Position, PositionStatus, Product, Quote, SettledTrade, Trade,
    TradeStatus, Variety,
};
