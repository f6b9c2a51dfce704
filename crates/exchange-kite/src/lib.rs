//! Kite Connect broker integration for the options desk.
//!
//! Provides the REST client implementing the `Broker` capability (quotes,
//! net positions, order placement, order book, instruments dump), the
//! session token store, and a paper-trading broker shim for tests and dry
//! runs.

pub mod client;
pub mod paper;
pub mod token;

pub use client::{KiteClient, KiteConfig};
pub use paper::PaperBroker;
pub use token::TokenStore;
