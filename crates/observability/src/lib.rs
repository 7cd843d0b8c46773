//! `typhoon-observability`
//!
//! **Responsibility:** process-wide tracing setup for Typhoon binaries.

/// Tracing configuration (filters, formatter).
pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init_with_default};

/// Initialize process-wide tracing with the default filter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init_with_default(DEFAULT_FILTER);
}
