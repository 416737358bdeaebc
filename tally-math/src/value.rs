//! The `Value` type accumulated by report handlers
//!
//! A value is either null, a single amount, or a multi-commodity
//! balance. Adding within one commodity stays an amount; adding across
//! commodities promotes to a balance. Null is the additive identity.
//!
//! Values order totally for use as sort keys: the held quantities are
//! compared per commodity, lexicographically, with the null commodity
//! sorting before named commodities and names comparing by symbol. A
//! commodity absent from one side compares as zero.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::balance::Balance;

/// A possibly multi-commodity signed quantity
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// The null value, additive identity
    #[default]
    Null,
    /// A single-commodity quantity
    Amount(Amount),
    /// A multi-commodity quantity
    Balance(Balance),
}

impl Value {
    /// Check whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check whether the value sums to zero (null counts as zero)
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Amount(a) => a.is_zero(),
            Value::Balance(b) => b.is_zero(),
        }
    }

    /// Add an amount in place, promoting to a balance when commodities mix
    pub fn add_amount(&mut self, amount: &Amount) {
        match self {
            Value::Null => *self = Value::Amount(amount.clone()),
            Value::Amount(existing) if existing.same_commodity(amount) => {
                *existing = Amount::new(
                    existing.quantity() + amount.quantity(),
                    existing.commodity().cloned(),
                );
            }
            Value::Amount(existing) => {
                let mut balance = Balance::from_amount(existing);
                balance.add_amount(amount);
                *self = Value::Balance(balance);
            }
            Value::Balance(balance) => balance.add_amount(amount),
        }
    }

    /// A new value holding the sum of `self` and `other`
    pub fn add(&self, other: &Value) -> Value {
        let mut result = self.clone();
        match other {
            Value::Null => {}
            Value::Amount(a) => result.add_amount(a),
            Value::Balance(b) => {
                for amount in b.amounts() {
                    result.add_amount(amount);
                }
            }
        }
        result
    }

    /// A new value holding `self` minus `other`
    pub fn sub(&self, other: &Value) -> Value {
        self.add(&other.negated())
    }

    /// A new value with every component negated
    pub fn negated(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Amount(a) => Value::Amount(-a),
            Value::Balance(b) => Value::Balance(b.negated()),
        }
    }

    /// Per-commodity decomposition, in the value's own order
    pub fn amounts(&self) -> Vec<Amount> {
        match self {
            Value::Null => Vec::new(),
            Value::Amount(a) => vec![a.clone()],
            Value::Balance(b) => b.amounts().cloned().collect(),
        }
    }

    /// Demote to the simplest representation holding the same quantities
    pub fn simplified(&self) -> Value {
        match self {
            Value::Balance(b) if b.is_empty() => Value::Null,
            Value::Balance(b) if b.single_amount() => match b.to_amount() {
                Some(a) => Value::Amount(a),
                None => Value::Null,
            },
            other => other.clone(),
        }
    }

    /// Sort-key ordering over values; see the module docs for the rule
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let mut symbols: Vec<String> = Vec::new();
        for amount in self.amounts().into_iter().chain(other.amounts()) {
            let sym = amount.symbol().to_string();
            if !symbols.contains(&sym) {
                symbols.push(sym);
            }
        }
        // null commodity first, then named commodities by symbol
        symbols.sort_by(|a, b| match (a.is_empty(), b.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.cmp(b),
        });

        for sym in &symbols {
            let qa = self.quantity_of(sym);
            let qb = other.quantity_of(sym);
            match qa.cmp(&qb) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }

    fn quantity_of(&self, symbol: &str) -> Decimal {
        self.amounts()
            .iter()
            .find(|a| a.symbol() == symbol)
            .map(|a| a.quantity())
            .unwrap_or(Decimal::ZERO)
    }
}

impl From<Amount> for Value {
    fn from(amount: Amount) -> Self {
        Value::Amount(amount)
    }
}

impl From<Balance> for Value {
    fn from(balance: Balance) -> Self {
        Value::Balance(balance)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "0"),
            Value::Amount(a) => write!(f, "{}", a),
            Value::Balance(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self)
    }
}
