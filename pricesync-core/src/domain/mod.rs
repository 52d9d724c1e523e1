//! Domain types shared by every stage of a sync run.

pub mod price_bar;

pub use price_bar::{ExistingRowKey, PriceBar, ValidationError};
