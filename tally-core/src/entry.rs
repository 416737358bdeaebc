//! Entry representation
//!
//! An entry is one dated transaction: a header plus two or more
//! postings that balance to zero per commodity. Handlers may fabricate
//! entries of their own (subtotals, revaluations); those carry the
//! `GENERATED` flag and are exempt from balance verification.

use chrono::NaiveDate;
use tally_math::Balance;
use thiserror::Error;

use crate::posting::Posting;

bitflags::bitflags! {
    /// Entry provenance flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Entry was fabricated by a report handler
        const GENERATED = 0x01;
        /// Entry is temporary and not attached to a journal
        const TEMP = 0x02;
    }
}

/// Clearing state shared by entries and postings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Not yet cleared
    #[default]
    Uncleared,
    /// Cleared (`*`)
    Cleared,
    /// Pending (`!`)
    Pending,
}

/// Error raised when an entry's postings do not sum to zero
#[derive(Debug, Clone, Error)]
#[error("entry `{payee}` on {date} does not balance: off by {remainder}")]
pub struct UnbalancedEntry {
    /// Entry date
    pub date: NaiveDate,
    /// Entry payee
    pub payee: String,
    /// The nonzero per-commodity remainder
    pub remainder: Balance,
}

/// A dated transaction holding two or more postings
#[derive(Debug, Clone)]
pub struct Entry {
    /// Primary date
    pub date: NaiveDate,
    /// Optional effective date
    pub effective_date: Option<NaiveDate>,
    /// Optional code (check number, reference)
    pub code: Option<String>,
    /// Payee or description
    pub payee: String,
    /// Clearing state
    pub state: State,
    /// Postings, in journal order
    pub postings: Vec<Posting>,
    /// Provenance flags
    pub flags: EntryFlags,
    /// Position within the owning journal
    pub sequence: usize,
}

impl Entry {
    /// Create an entry with the given date and payee
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Self {
            date,
            effective_date: None,
            code: None,
            payee: payee.into(),
            state: State::default(),
            postings: Vec::new(),
            flags: EntryFlags::empty(),
            sequence: 0,
        }
    }

    /// Set the code, builder style
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the effective date, builder style
    pub fn with_effective_date(mut self, date: NaiveDate) -> Self {
        self.effective_date = Some(date);
        self
    }

    /// Append a posting
    pub fn add_posting(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    /// The effective date, falling back to the primary date
    pub fn effective(&self) -> NaiveDate {
        self.effective_date.unwrap_or(self.date)
    }

    /// Check whether this entry was fabricated by a handler
    pub fn is_generated(&self) -> bool {
        self.flags.contains(EntryFlags::GENERATED)
    }

    /// Verify the double-entry invariant: postings sum to zero per
    /// commodity, a posting with a cost contributing its cost.
    pub fn verify_balance(&self) -> Result<(), UnbalancedEntry> {
        let mut remainder = Balance::new();
        for posting in &self.postings {
            remainder.add_amount(posting.contribution());
        }
        if remainder.is_zero() {
            Ok(())
        } else {
            Err(UnbalancedEntry { date: self.date, payee: self.payee.clone(), remainder })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use tally_math::Amount;

    use super::*;
    use crate::journal::Session;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    #[test]
    fn test_balanced_entry_verifies() {
        let mut session = Session::new();
        let mut entry = Entry::new(date("2020-01-01"), "Groceries");
        entry.add_posting(Posting::new(
            session.account("Expenses:Food"),
            "10 USD".parse().unwrap(),
        ));
        entry.add_posting(Posting::new(session.account("Assets:Cash"), "-10 USD".parse().unwrap()));
        assert!(entry.verify_balance().is_ok());
    }

    #[test]
    fn test_unbalanced_entry_is_rejected() {
        let mut session = Session::new();
        let mut entry = Entry::new(date("2020-01-01"), "Oops");
        entry.add_posting(Posting::new(session.account("Expenses:Food"), "10 USD".parse().unwrap()));
        entry.add_posting(Posting::new(session.account("Assets:Cash"), "-9 USD".parse().unwrap()));
        let err = entry.verify_balance().unwrap_err();
        let usd = Amount::from_str("1 USD").unwrap();
        assert_eq!(err.remainder.commodity_amount(usd.commodity().unwrap()), Some(&usd));
    }

    #[test]
    fn test_cost_balances_a_lot_purchase() {
        let mut session = Session::new();
        let mut entry = Entry::new(date("2020-01-01"), "Buy stock");
        entry.add_posting(
            Posting::new(session.account("Assets:Broker"), "10 STK".parse().unwrap())
                .with_cost("500 USD".parse().unwrap()),
        );
        entry.add_posting(
            Posting::new(session.account("Assets:Cash"), "-500 USD".parse().unwrap()),
        );
        assert!(entry.verify_balance().is_ok());
    }

    #[test]
    fn test_effective_date_fallback() {
        let entry = Entry::new(date("2020-01-01"), "x");
        assert_eq!(entry.effective(), date("2020-01-01"));
        let entry = entry.with_effective_date(date("2020-02-01"));
        assert_eq!(entry.effective(), date("2020-02-01"));
    }
}
