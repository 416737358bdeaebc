//! Commodity-aware arithmetic for the tally reporting engine
//!
//! This crate provides the numeric foundation of the reporting core:
//! exact decimal amounts annotated with commodities, multi-commodity
//! balances, and the `Value` type that report handlers accumulate.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod amount;
pub mod balance;
pub mod commodity;
pub mod value;

// Re-export main types
pub use amount::{Amount, AmountError, AmountResult};
pub use balance::Balance;
pub use commodity::{null_commodity, Commodity, CommodityFlags, CommodityRef};
pub use value::Value;

// Re-export for convenience
pub use rust_decimal::Decimal;
