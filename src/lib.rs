//! Client-side execution engine for GMX V2 perpetual futures.
//!
//! Builds `ExchangeRouter` multicall transactions (orders, SLTP bundles,
//! GM-pool liquidity), estimates keeper execution fees, gates submission
//! behind a gas-balance circuit breaker, and reconciles two-phase order
//! execution from the indexer or a chunked on-chain log scan.

pub mod blocking;
pub mod cache;
pub mod client;
pub mod config;
pub mod contracts;
pub mod domain;
pub mod errors;
pub mod fees;
pub mod logging;
pub mod market;
pub mod monitor;
pub mod numeric;
pub mod orders;
pub mod reconcile;
pub mod wallet;

pub use errors::{EngineError, EngineResult};
