//! Commodity price sources
//!
//! The changed-value stage needs to know a commodity's market price on
//! a given date and, just as importantly, *when* prices moved between
//! two dates. Both queries are captured by [`PriceSource`];
//! [`MemoryPrices`] is the built-in in-memory history.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use chrono::NaiveDate;
use tally_math::{Amount, CommodityRef, Value};

/// A queryable source of commodity prices
pub trait PriceSource {
    /// Price of one unit of `commodity` on `date` (the latest quote on
    /// or before the date), expressed in a reference commodity
    fn price(&self, commodity: &CommodityRef, date: NaiveDate) -> Option<Amount>;

    /// Price-change points strictly after `after` and up to and
    /// including `upto`, in date order
    fn changes_between(
        &self,
        commodity: &CommodityRef,
        after: NaiveDate,
        upto: NaiveDate,
    ) -> Vec<(NaiveDate, Amount)>;
}

/// An in-memory price history keyed by commodity symbol
#[derive(Debug, Default)]
pub struct MemoryPrices {
    history: HashMap<String, BTreeMap<NaiveDate, Amount>>,
}

impl MemoryPrices {
    /// Create an empty price history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that one unit of `symbol` was worth `price` on `date`
    pub fn insert(&mut self, symbol: &str, date: NaiveDate, price: Amount) {
        self.history.entry(symbol.to_string()).or_default().insert(date, price);
    }
}

impl PriceSource for MemoryPrices {
    fn price(&self, commodity: &CommodityRef, date: NaiveDate) -> Option<Amount> {
        self.history
            .get(commodity.symbol())?
            .range(..=date)
            .next_back()
            .map(|(_, price)| price.clone())
    }

    fn changes_between(
        &self,
        commodity: &CommodityRef,
        after: NaiveDate,
        upto: NaiveDate,
    ) -> Vec<(NaiveDate, Amount)> {
        if after >= upto {
            return Vec::new();
        }
        match self.history.get(commodity.symbol()) {
            Some(quotes) => quotes
                .range((Bound::Excluded(after), Bound::Included(upto)))
                .map(|(date, price)| (*date, price.clone()))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Market value of a possibly multi-commodity value at `date`.
/// Commodities without a known price contribute their face amount.
pub fn market_value(source: &dyn PriceSource, value: &Value, date: NaiveDate) -> Value {
    let mut out = Value::Null;
    for amount in value.amounts() {
        let priced = amount.commodity().and_then(|c| source.price(c, date));
        match priced {
            Some(price) => out.add_amount(&price.scaled_by(amount.quantity())),
            None => out.add_amount(&amount),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tally_math::Commodity;

    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, m, d).unwrap()
    }

    fn stk() -> CommodityRef {
        Arc::new(Commodity::new("STK"))
    }

    #[test]
    fn test_price_uses_latest_on_or_before() {
        let mut prices = MemoryPrices::new();
        prices.insert("STK", date(1, 1), "2 USD".parse().unwrap());
        prices.insert("STK", date(1, 10), "3 USD".parse().unwrap());

        assert_eq!(prices.price(&stk(), date(1, 5)), Some("2 USD".parse().unwrap()));
        assert_eq!(prices.price(&stk(), date(1, 10)), Some("3 USD".parse().unwrap()));
        assert_eq!(prices.price(&stk(), date(2, 1)), Some("3 USD".parse().unwrap()));
        assert_eq!(prices.price(&Arc::new(Commodity::new("XYZ")), date(1, 5)), None);
    }

    #[test]
    fn test_changes_between_bounds() {
        let mut prices = MemoryPrices::new();
        prices.insert("STK", date(1, 1), "2 USD".parse().unwrap());
        prices.insert("STK", date(1, 10), "3 USD".parse().unwrap());
        prices.insert("STK", date(1, 20), "4 USD".parse().unwrap());

        let changes = prices.changes_between(&stk(), date(1, 1), date(1, 20));
        let dates: Vec<NaiveDate> = changes.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![date(1, 10), date(1, 20)]);

        assert!(prices.changes_between(&stk(), date(1, 20), date(1, 20)).is_empty());
        assert!(prices.changes_between(&stk(), date(1, 25), date(1, 2)).is_empty());
    }

    #[test]
    fn test_market_value_prices_known_commodities() {
        let mut prices = MemoryPrices::new();
        prices.insert("STK", date(1, 1), "2 USD".parse().unwrap());

        let mut held = Value::Null;
        held.add_amount(&"10 STK".parse().unwrap());
        held.add_amount(&"5 EUR".parse().unwrap());

        let valued = market_value(&prices, &held, date(1, 2));
        let amounts = valued.amounts();
        assert!(amounts.contains(&"20 USD".parse().unwrap()));
        // EUR has no quote and passes through at face value
        assert!(amounts.contains(&"5 EUR".parse().unwrap()));
    }
}
