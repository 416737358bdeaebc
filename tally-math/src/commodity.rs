//! Commodity definitions and handling
//!
//! A commodity is the unit an amount is denominated in: a currency, a
//! security ticker, hours, shares. Commodities are shared behind `Arc`
//! and compared by symbol, so two independently created "USD" handles
//! behave as the same commodity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Shared commodity handle used throughout the engine
pub type CommodityRef = Arc<Commodity>;

bitflags::bitflags! {
    /// Flags describing commodity behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommodityFlags: u8 {
        /// Commodity was declared rather than inferred from an amount
        const KNOWN = 0x01;
        /// Commodity is the report's reference commodity
        const PRIMARY = 0x02;
        /// Commodity never has a market price
        const NO_MARKET = 0x04;
    }
}

/// A unit of denomination for amounts
#[derive(Debug, Clone)]
pub struct Commodity {
    symbol: String,
    precision: u16,
    flags: CommodityFlags,
}

impl Commodity {
    /// Create a commodity from its symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), precision: 0, flags: CommodityFlags::empty() }
    }

    /// Create a commodity with a display precision
    pub fn with_precision(symbol: impl Into<String>, precision: u16) -> Self {
        Self { symbol: symbol.into(), precision, flags: CommodityFlags::empty() }
    }

    /// Get the commodity symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Get the display precision
    pub fn precision(&self) -> u16 {
        self.precision
    }

    /// Get the commodity flags
    pub fn flags(&self) -> CommodityFlags {
        self.flags
    }

    /// Check whether specific flags are set
    pub fn has_flags(&self, flags: CommodityFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Add flags to this commodity
    pub fn add_flags(&mut self, flags: CommodityFlags) {
        self.flags.insert(flags);
    }

    /// Check whether this is the null (empty-symbol) commodity
    pub fn is_null(&self) -> bool {
        self.symbol.is_empty()
    }
}

impl PartialEq for Commodity {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl Eq for Commodity {}

impl Hash for Commodity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

static NULL_COMMODITY: Lazy<CommodityRef> = Lazy::new(|| Arc::new(Commodity::new("")));

/// The shared null commodity, used to key untyped amounts
pub fn null_commodity() -> CommodityRef {
    NULL_COMMODITY.clone()
}
