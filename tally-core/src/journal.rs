//! Journal and session containers
//!
//! A journal is an ordered list of entries; a session owns the account
//! tree shared by one or more journals, and is what reports walk.
//! Entries are verified to balance when added, so everything reaching
//! the pipeline already satisfies the double-entry invariant.

use crate::account::{Account, AccountRef};
use crate::entry::{Entry, UnbalancedEntry};

/// An ordered collection of entries
#[derive(Debug, Default)]
pub struct Journal {
    /// Entries in source order
    pub entries: Vec<Entry>,
}

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, verifying that it balances
    pub fn add_entry(&mut self, mut entry: Entry) -> Result<(), UnbalancedEntry> {
        if !entry.is_generated() {
            entry.verify_balance()?;
        }
        entry.sequence = self.entries.len();
        self.entries.push(entry);
        Ok(())
    }

    /// Number of entries held
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// A reporting session: the master account tree plus its journals
#[derive(Debug)]
pub struct Session {
    /// Root of the account tree
    pub master: AccountRef,
    /// Journals in the order they were read
    pub journals: Vec<Journal>,
    next_account_id: usize,
}

impl Session {
    /// Create a session with an empty account tree
    pub fn new() -> Self {
        Self { master: Account::root(), journals: Vec::new(), next_account_id: 1 }
    }

    /// Find or create the account at `path`, creating intermediate
    /// accounts as needed
    pub fn account(&mut self, path: &str) -> AccountRef {
        let mut current = self.master.clone();
        for segment in path.split(crate::account::SEPARATOR).filter(|s| !s.is_empty()) {
            let existing = current.borrow().child(segment);
            current = match existing {
                Some(child) => child,
                None => {
                    let id = self.next_account_id;
                    self.next_account_id += 1;
                    let child = std::rc::Rc::new(std::cell::RefCell::new(Account::new(
                        segment.into(),
                        Some(std::rc::Rc::downgrade(&current)),
                        id,
                    )));
                    current.borrow_mut().add_child(child.clone());
                    child
                }
            };
        }
        current
    }

    /// Find an existing account by full path
    pub fn find_account(&self, path: &str) -> Option<AccountRef> {
        let mut current = self.master.clone();
        for segment in path.split(crate::account::SEPARATOR).filter(|s| !s.is_empty()) {
            let child = current.borrow().child(segment)?;
            current = child;
        }
        Some(current)
    }

    /// Append a journal to the session
    pub fn add_journal(&mut self, journal: Journal) {
        self.journals.push(journal);
    }

    /// Add an entry to the session's last journal, creating a journal
    /// if none exists yet
    pub fn add_entry(&mut self, entry: Entry) -> Result<(), UnbalancedEntry> {
        if self.journals.is_empty() {
            self.journals.push(Journal::new());
        }
        self.journals.last_mut().expect("journal just ensured").add_entry(entry)
    }

    /// Total number of postings across all journals
    pub fn posting_count(&self) -> usize {
        self.journals
            .iter()
            .flat_map(|j| j.entries.iter())
            .map(|e| e.postings.len())
            .sum()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::posting::Posting;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_add_entry_verifies_balance() {
        let mut session = Session::new();
        let mut good = Entry::new(date(2020, 1, 1), "ok");
        good.add_posting(Posting::new(session.account("A"), "10 USD".parse().unwrap()));
        good.add_posting(Posting::new(session.account("B"), "-10 USD".parse().unwrap()));
        assert!(session.add_entry(good).is_ok());

        let mut bad = Entry::new(date(2020, 1, 2), "bad");
        bad.add_posting(Posting::new(session.account("A"), "10 USD".parse().unwrap()));
        bad.add_posting(Posting::new(session.account("B"), "-7 USD".parse().unwrap()));
        assert!(session.add_entry(bad).is_err());

        assert_eq!(session.journals[0].entry_count(), 1);
        assert_eq!(session.posting_count(), 2);
    }

    #[test]
    fn test_entries_are_sequenced() {
        let mut session = Session::new();
        for day in 1..=3 {
            let mut entry = Entry::new(date(2020, 1, day), "e");
            entry.add_posting(Posting::new(session.account("A"), "1 USD".parse().unwrap()));
            entry.add_posting(Posting::new(session.account("B"), "-1 USD".parse().unwrap()));
            session.add_entry(entry).unwrap();
        }
        let sequences: Vec<usize> =
            session.journals[0].entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_find_account() {
        let mut session = Session::new();
        session.account("Assets:Bank");
        assert!(session.find_account("Assets:Bank").is_some());
        assert!(session.find_account("Assets:Missing").is_none());
    }
}
