//! Error handling foundation for the lead-intake platform.
//!
//! Only the `Result` alias lives here. Each crate owns its error enums and
//! wraps lower-level reports with rootcause's `.context()` on the way up, so
//! a report reads from the failed operation down to the collaborator that
//! caused it.

use rootcause::Report;

/// A Result whose error is a rootcause report with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
