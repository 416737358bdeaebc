//! Multi-commodity balance container
//!
//! A `Balance` holds one amount per commodity, in the order commodities
//! were first seen. Insertion order is observable: subtotal-style
//! reports emit a balance's commodities in that order.

use std::fmt;
use std::ops::Neg;

use indexmap::IndexMap;

use crate::amount::Amount;
use crate::commodity::{null_commodity, CommodityRef};

/// Per-commodity amounts, keyed by commodity in first-seen order
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Balance {
    amounts: IndexMap<CommodityRef, Amount>,
}

impl Balance {
    /// Create a new empty balance
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a balance holding a single amount
    pub fn from_amount(amount: &Amount) -> Self {
        let mut balance = Self::new();
        balance.add_amount(amount);
        balance
    }

    /// Check if the balance holds no amounts at all
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Check if every held amount is zero (an empty balance is zero)
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(Amount::is_zero)
    }

    /// Check if the balance holds exactly one amount
    pub fn single_amount(&self) -> bool {
        self.amounts.len() == 1
    }

    /// Number of distinct commodities held
    pub fn commodity_count(&self) -> usize {
        self.amounts.len()
    }

    /// Get the held amount for a commodity, if present
    pub fn commodity_amount(&self, commodity: &CommodityRef) -> Option<&Amount> {
        self.amounts.get(commodity)
    }

    /// Convert to a single amount; `None` unless exactly one is held
    pub fn to_amount(&self) -> Option<Amount> {
        if self.single_amount() {
            self.amounts.values().next().cloned()
        } else {
            None
        }
    }

    /// Add an amount to the balance, pruning components that reach zero
    pub fn add_amount(&mut self, amount: &Amount) {
        if amount.is_zero() {
            return;
        }
        let key = amount.commodity().cloned().unwrap_or_else(null_commodity);
        let summed = match self.amounts.get(&key) {
            Some(existing) => Amount::new(
                existing.quantity() + amount.quantity(),
                existing.commodity().cloned(),
            ),
            None => amount.clone(),
        };
        if summed.is_zero() {
            self.amounts.shift_remove(&key);
        } else {
            // inserting over an existing key keeps its position
            self.amounts.insert(key, summed);
        }
    }

    /// Subtract an amount from the balance
    pub fn subtract_amount(&mut self, amount: &Amount) {
        self.add_amount(&-amount);
    }

    /// Add every component of another balance
    pub fn add_balance(&mut self, other: &Balance) {
        for amount in other.amounts.values() {
            self.add_amount(amount);
        }
    }

    /// A new balance with every component negated
    pub fn negated(&self) -> Balance {
        let mut result = Balance::new();
        for (commodity, amount) in &self.amounts {
            result.amounts.insert(commodity.clone(), -amount);
        }
        result
    }

    /// Iterate over (commodity, amount) pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&CommodityRef, &Amount)> {
        self.amounts.iter()
    }

    /// Iterate over held amounts in insertion order
    pub fn amounts(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.values()
    }
}

impl Neg for Balance {
    type Output = Balance;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "0");
        }
        let mut first = true;
        for amount in self.amounts.values() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", amount)?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Balance({})", self)
    }
}

impl serde::Serialize for Balance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.amounts.len()))?;
        for (commodity, amount) in &self.amounts {
            map.serialize_entry(commodity.symbol(), &amount.quantity())?;
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for Balance {
    fn deserialize<D>(deserializer: D) -> Result<Balance, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::sync::Arc;

        use serde::de::{MapAccess, Visitor};

        use crate::commodity::Commodity;

        struct BalanceVisitor;

        impl<'de> Visitor<'de> for BalanceVisitor {
            type Value = Balance;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of commodity symbols to quantities")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut balance = Balance::new();
                while let Some((symbol, quantity)) =
                    access.next_entry::<String, rust_decimal::Decimal>()?
                {
                    let commodity = if symbol.is_empty() {
                        None
                    } else {
                        Some(Arc::new(Commodity::new(symbol)))
                    };
                    balance.add_amount(&Amount::new(quantity, commodity));
                }
                Ok(balance)
            }
        }

        deserializer.deserialize_map(BalanceVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::commodity::Commodity;

    fn amt(q: i64, sym: &str) -> Amount {
        Amount::with_commodity(Decimal::from(q), Arc::new(Commodity::new(sym)))
    }

    #[test]
    fn test_empty_balance() {
        let balance = Balance::new();
        assert!(balance.is_empty());
        assert!(balance.is_zero());
        assert_eq!(balance.commodity_count(), 0);
        assert_eq!(balance.to_amount(), None);
    }

    #[test]
    fn test_accumulation_per_commodity() {
        let mut balance = Balance::new();
        balance.add_amount(&amt(100, "USD"));
        balance.add_amount(&amt(-25, "USD"));
        balance.add_amount(&amt(7, "EUR"));

        assert_eq!(balance.commodity_count(), 2);
        let usd = Arc::new(Commodity::new("USD"));
        assert_eq!(balance.commodity_amount(&usd), Some(&amt(75, "USD")));
    }

    #[test]
    fn test_zero_components_are_pruned() {
        let mut balance = Balance::new();
        balance.add_amount(&amt(100, "USD"));
        balance.subtract_amount(&amt(100, "USD"));
        assert!(balance.is_empty());
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut balance = Balance::new();
        balance.add_amount(&amt(1, "STK"));
        balance.add_amount(&amt(2, "USD"));
        balance.add_amount(&amt(3, "STK"));

        let symbols: Vec<&str> = balance.iter().map(|(c, _)| c.symbol()).collect();
        assert_eq!(symbols, vec!["STK", "USD"]);
    }

    #[test]
    fn test_equality_ignores_order() {
        let mut a = Balance::new();
        a.add_amount(&amt(1, "USD"));
        a.add_amount(&amt(2, "EUR"));

        let mut b = Balance::new();
        b.add_amount(&amt(2, "EUR"));
        b.add_amount(&amt(1, "USD"));

        assert_eq!(a, b);
    }

    #[test]
    fn test_negation() {
        let mut balance = Balance::new();
        balance.add_amount(&amt(10, "USD"));
        balance.add_amount(&amt(-3, "EUR"));
        let negated = balance.negated();
        let usd = Arc::new(Commodity::new("USD"));
        assert_eq!(negated.commodity_amount(&usd), Some(&amt(-10, "USD")));
    }

    #[test]
    fn test_untyped_amounts_share_a_slot() {
        let mut balance = Balance::new();
        balance.add_amount(&Amount::from_i64(4));
        balance.add_amount(&Amount::from_i64(6));
        assert!(balance.single_amount());
        assert_eq!(balance.to_amount(), Some(Amount::from_i64(10)));
    }
}
