//! Posting representation and per-posting report scratch
//!
//! A posting is one account-side of an entry. The journal's postings
//! are never mutated by reports; everything a report needs to scribble
//! (running totals, amount overrides, sort keys) lives in [`PostXData`]
//! records held in a side table owned by the report's posting pool.

use chrono::NaiveDate;
use smallvec::SmallVec;
use tally_math::{Amount, Value};

use crate::account::AccountRef;
use crate::entry::State;
use crate::pipeline::PostId;

/// One account-side of an entry
#[derive(Debug, Clone)]
pub struct Posting {
    /// Account this posting touches
    pub account: AccountRef,
    /// Posted amount
    pub amount: Amount,
    /// Optional total cost, for lot pricing; carries the amount's sign
    pub cost: Option<Amount>,
    /// Clearing state
    pub state: State,
    /// Optional posting-level date override
    pub date: Option<NaiveDate>,
    /// Optional posting-level payee override
    pub payee: Option<String>,
}

impl Posting {
    /// Create a posting against the given account
    pub fn new(account: AccountRef, amount: Amount) -> Self {
        Self { account, amount, cost: None, state: State::default(), date: None, payee: None }
    }

    /// Set the cost, builder style
    pub fn with_cost(mut self, cost: Amount) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Set the clearing state, builder style
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Set a posting-level date, builder style
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Set a posting-level payee, builder style
    pub fn with_payee(mut self, payee: impl Into<String>) -> Self {
        self.payee = Some(payee.into());
        self
    }

    /// What this posting contributes to its entry's balance: the cost
    /// when one is recorded, the amount otherwise.
    pub fn contribution(&self) -> &Amount {
        self.cost.as_ref().unwrap_or(&self.amount)
    }
}

bitflags::bitflags! {
    /// Flags tracked on posting xdata
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PostFlags: u16 {
        /// Posting was fabricated by a report handler
        const SYNTHETIC = 0x01;
        /// Posting passed a filter predicate
        const MATCHED = 0x02;
        /// Posting has been written by the terminal handler
        const DISPLAYED = 0x04;
        /// Posting is an aggregate carrying component references
        const COMPOUND = 0x08;
    }
}

/// Per-posting report scratch
#[derive(Debug, Clone)]
pub struct PostXData {
    /// Effective-amount override, set by handlers such as invert
    pub amount: Option<Amount>,
    /// Running-total snapshot taken by the calc stage
    pub total: Value,
    /// Position of this posting in the calc stage's sequence
    pub count: usize,
    /// Date override
    pub date: Option<NaiveDate>,
    /// Payee override
    pub payee: Option<String>,
    /// Sort key computed for this posting
    pub sort_key: Option<Value>,
    /// Postings aggregated into this one, when components are kept
    pub components: SmallVec<[PostId; 4]>,
    /// State flags
    pub flags: PostFlags,
}

impl Default for PostXData {
    fn default() -> Self {
        Self {
            amount: None,
            total: Value::Null,
            count: 0,
            date: None,
            payee: None,
            sort_key: None,
            components: SmallVec::new(),
            flags: PostFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Session;

    #[test]
    fn test_contribution_prefers_cost() {
        let mut session = Session::new();
        let plain = Posting::new(session.account("A"), "10 STK".parse().unwrap());
        assert_eq!(plain.contribution(), &plain.amount);

        let priced = Posting::new(session.account("A"), "10 STK".parse().unwrap())
            .with_cost("500 USD".parse().unwrap());
        assert_eq!(priced.contribution(), &"500 USD".parse::<Amount>().unwrap());
    }

    #[test]
    fn test_xdata_starts_clean() {
        let xdata = PostXData::default();
        assert!(xdata.amount.is_none());
        assert!(xdata.total.is_null());
        assert!(xdata.components.is_empty());
        assert_eq!(xdata.flags, PostFlags::empty());
    }
}
