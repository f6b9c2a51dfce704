//! Order lifecycle and reconciliation engine.
//!
//! This crate is the surface the (out-of-scope) HTTP layer calls:
//! `TradingService` for open / place-order / square-off / bulk exits, and
//! `ReconciliationEngine` for the authoritative "what is actually open
//! right now" view that cross-references the broker's live positions
//! against the ledger and heals drift.

pub mod lifecycle;
pub mod pnl;
pub mod reconcile;
pub mod requests;

pub use lifecycle::TradingService;
pub use reconcile::ReconciliationEngine;
pub use requests::{
    AbortedExit, BulkExitReport, OpenTradeReceipt, OpenTradeRequest, PlaceOrderReceipt,
    PlaceOrderRequest, PositionRow, PositionsView, SquareOffOutcome, SquareOffReceipt,
};
