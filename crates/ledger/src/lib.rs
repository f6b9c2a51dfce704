//! Position/trade ledger for the options desk.
//!
//! `PgLedger` is the production store (Postgres via sqlx); `MemoryLedger`
//! implements the same contract in memory for paper trading and tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;
