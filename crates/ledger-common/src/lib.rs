//! Ledger Common Library
//!
//! Shared value handling, error types and logging setup for the ledger batch
//! workspace.
//!
//! # Overview
//!
//! - **Money**: amount cleaning, exact decimal parsing and half-up rounding to cents
//! - **Dates**: multi-pattern calendar date parsing and `YYYY-MM` periods
//! - **Logging**: `tracing` subscriber initialisation driven by `LOG_*` variables
//! - **Errors**: the [`LedgerError`] type returned by the helpers above
//!
//! # Example
//!
//! ```no_run
//! use ledger_common::{dates, money, Result};
//!
//! fn parse_line(amount: &str, date: &str) -> Result<()> {
//!     let amount = money::parse_amount(amount)?;
//!     let date = dates::parse_date(date)?;
//!     tracing::info!(%amount, %date, "parsed");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod dates;
pub mod error;
pub mod logging;
pub mod money;

pub use error::{LedgerError, Result};
