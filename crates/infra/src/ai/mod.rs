//! Data adapters feeding the model backends.

pub mod price_history;

pub use price_history::PostgresPriceHistory;
