//! `hrefscan` crate (library surface).
//!
//! The primary entrypoint for end users is the `hrefscan` binary. The driver
//! lives here so it can be embedded and exercised without a subprocess.

pub use hrefscan_core as core;

mod driver;
pub mod logging;

pub use driver::{run, Report, ResponseSummary, RunOptions};
