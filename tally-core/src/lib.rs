//! Reporting core of the tally accounting engine
//!
//! This crate owns the journal model (sessions, journals, entries,
//! postings, the account tree) and the report pipeline that walks it:
//! a chain of posting handlers assembled in a canonical order from a
//! report configuration, plus the account-aggregation pass used by
//! balance-style reports. Arithmetic lives in `tally-math`; expression
//! evaluation, price lookup and rendering are pluggable interfaces.

#![warn(clippy::all)]
#![warn(missing_docs)]

/// Module for the hierarchical account structure
pub mod account;

/// Module for entry representation
pub mod entry;

/// Module for expression interfaces and the basic query language
pub mod expr;

/// Module for recurring report periods
pub mod interval;

/// Module for journal and session containers
pub mod journal;

/// Module for the handler pipeline
pub mod pipeline;

/// Module for posting representation
pub mod posting;

/// Module for commodity price sources
pub mod prices;

/// Module for report assembly and execution
pub mod report;

pub use account::{Account, AccountRef, AccountXData};
pub use entry::{Entry, State, UnbalancedEntry};
pub use journal::{Journal, Session};
pub use pipeline::{
    AccountHandler, Collector, PostHandler, PostId, PostInfo, PostPool, ReportError, ReportResult,
};
pub use posting::{PostXData, Posting};
pub use report::{Report, ReportOptions};
