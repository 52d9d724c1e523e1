//! pricesync core: price bars, batching, fetch-with-retry, dedupe, and the
//! store / export / upload adapters the sync pipeline drives.
//!
//! - Domain types (`PriceBar`, `ExistingRowKey`)
//! - Batcher and ticker-list loading
//! - `FetchClient` with explicit transient/permanent outcomes and backoff
//! - Tiingo price source
//! - Dedupe filter
//! - `PriceStore` (Notion, in-memory), `JsonExporter`, `Uploader` (Drive)

pub mod data;
pub mod domain;
pub mod error;
pub mod export;
pub mod store;
pub mod upload;

pub use error::ConfigError;
