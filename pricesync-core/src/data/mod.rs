//! Price acquisition: batching, the upstream source, retrying fetch, dedupe.

pub mod batch;
pub mod dedupe;
pub mod fetch;
pub mod provider;
pub mod tickers;
pub mod tiingo;

pub use batch::{batches, Batch};
pub use dedupe::filter_new;
pub use fetch::{FetchClient, RetryPolicy};
pub use provider::{Attempt, FetchCause, FetchError, PriceSource};
pub use tickers::{load_tickers, parse_tickers, TickerListError};
pub use tiingo::{TiingoSource, TIINGO_DAILY_URL};
