//! Amount arithmetic with commodity support
//!
//! An `Amount` pairs an exact decimal quantity with an optional
//! commodity. Arithmetic between amounts of different commodities is an
//! error at this level; mixing commodities is the job of [`Balance`]
//! and [`Value`](crate::value::Value).

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::commodity::{Commodity, CommodityRef};

/// Errors that can occur during amount operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// Arithmetic across two different commodities
    #[error("cannot combine amounts with different commodities")]
    CommodityMismatch,
    /// Division by an exactly-zero amount
    #[error("division by zero")]
    DivisionByZero,
    /// String could not be parsed as an amount
    #[error("cannot parse amount from string: {0}")]
    ParseError(String),
}

/// Result type for amount operations
pub type AmountResult<T> = Result<T, AmountError>;

/// An exact decimal quantity with an optional commodity annotation
#[derive(Clone, PartialEq, Eq)]
pub struct Amount {
    quantity: Decimal,
    commodity: Option<CommodityRef>,
}

impl Amount {
    /// Create an amount from a quantity and an optional commodity
    pub fn new(quantity: Decimal, commodity: Option<CommodityRef>) -> Self {
        Self { quantity, commodity }
    }

    /// Create a commodity-less zero amount
    pub fn zero() -> Self {
        Self { quantity: Decimal::ZERO, commodity: None }
    }

    /// Create a commodity-less amount from an integer
    pub fn from_i64(value: i64) -> Self {
        Self { quantity: Decimal::from(value), commodity: None }
    }

    /// Create an amount denominated in the given commodity
    pub fn with_commodity(quantity: Decimal, commodity: CommodityRef) -> Self {
        Self { quantity, commodity: Some(commodity) }
    }

    /// Get the quantity
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Get the commodity, if any
    pub fn commodity(&self) -> Option<&CommodityRef> {
        self.commodity.as_ref()
    }

    /// Get the commodity symbol, or the empty string for untyped amounts
    pub fn symbol(&self) -> &str {
        self.commodity.as_ref().map(|c| c.symbol()).unwrap_or("")
    }

    /// Check whether this amount is exactly zero
    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Check whether this amount is non-zero
    pub fn is_nonzero(&self) -> bool {
        !self.is_zero()
    }

    /// Get the sign of this amount: -1, 0, or 1
    pub fn sign(&self) -> i32 {
        if self.quantity.is_zero() {
            0
        } else if self.quantity.is_sign_positive() {
            1
        } else {
            -1
        }
    }

    /// Absolute value, keeping the commodity
    pub fn abs(&self) -> Amount {
        Self { quantity: self.quantity.abs(), commodity: self.commodity.clone() }
    }

    /// Check whether two amounts share a commodity
    pub fn same_commodity(&self, other: &Amount) -> bool {
        match (&self.commodity, &other.commodity) {
            (None, None) => true,
            (Some(a), Some(b)) => a.symbol() == b.symbol(),
            _ => false,
        }
    }

    /// Scale the quantity by a bare decimal factor, keeping the commodity
    pub fn scaled_by(&self, factor: Decimal) -> Amount {
        Self { quantity: self.quantity * factor, commodity: self.commodity.clone() }
    }
}

impl Add for Amount {
    type Output = AmountResult<Amount>;

    fn add(self, rhs: Amount) -> Self::Output {
        if !self.same_commodity(&rhs) {
            return Err(AmountError::CommodityMismatch);
        }
        Ok(Amount { quantity: self.quantity + rhs.quantity, commodity: self.commodity })
    }
}

impl Sub for Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, rhs: Amount) -> Self::Output {
        if !self.same_commodity(&rhs) {
            return Err(AmountError::CommodityMismatch);
        }
        Ok(Amount { quantity: self.quantity - rhs.quantity, commodity: self.commodity })
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount { quantity: -self.quantity, commodity: self.commodity }
    }
}

impl Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount { quantity: -self.quantity, commodity: self.commodity.clone() }
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.same_commodity(other) {
            self.quantity.partial_cmp(&other.quantity)
        } else {
            None
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse `10`, `10.50 USD` or `USD 10.50`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let first = parts.next().ok_or_else(|| AmountError::ParseError(s.to_string()))?;
        let second = parts.next();
        if parts.next().is_some() {
            return Err(AmountError::ParseError(s.to_string()));
        }

        let (quantity, symbol) = match (Decimal::from_str(first), second) {
            (Ok(q), sym) => (q, sym),
            (Err(_), Some(num)) => {
                let q =
                    Decimal::from_str(num).map_err(|_| AmountError::ParseError(s.to_string()))?;
                (q, Some(first))
            }
            (Err(_), None) => return Err(AmountError::ParseError(s.to_string())),
        };

        let commodity = match symbol {
            Some(sym) if !sym.is_empty() => Some(Arc::new(Commodity::new(sym))),
            _ => None,
        };
        Ok(Amount { quantity, commodity })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.commodity {
            Some(c) if !c.is_null() => write!(f, "{} {}", self.quantity, c.symbol()),
            _ => write!(f, "{}", self.quantity),
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

impl serde::Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
