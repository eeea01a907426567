//! Error handling foundation for callrelay.
//!
//! Only the `Result` alias lives here. Each crate keeps its own error enums
//! in its `error` module and wraps them in a rootcause `Report` on the
//! outer, fallible setup paths.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
