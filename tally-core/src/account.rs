//! Hierarchical account structure
//!
//! Accounts form a tree below a single unnamed root ("master"). Parents
//! are held through weak references so the tree never cycles; children
//! keep their insertion order, with a name-sorted view available for
//! reports that want it. The full name of an account is its path from
//! the root, joined with `:`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use compact_str::CompactString;
use indexmap::IndexMap;
use tally_math::Value;

/// Separator between account path segments
pub const SEPARATOR: char = ':';

/// Shared account handle
pub type AccountRef = Rc<RefCell<Account>>;
/// Weak account handle, used for parent back-references
pub type WeakAccountRef = Weak<RefCell<Account>>;

// Ids for detached placeholder accounts live far above any id a session
// will hand out.
static NEXT_TEMP_ID: AtomicUsize = AtomicUsize::new(usize::MAX / 2);

bitflags::bitflags! {
    /// Flags indicating account provenance
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccountFlags: u8 {
        /// Account was declared rather than inferred from a posting
        const KNOWN = 0x01;
        /// Detached placeholder not attached to the tree (`<Total>`)
        const TEMP = 0x02;
        /// Account was created by a report handler
        const GENERATED = 0x04;
    }
}

/// A node in the account hierarchy
#[derive(Debug)]
pub struct Account {
    /// Last path segment of the account name
    pub name: CompactString,
    /// Parent account, absent only on the root
    pub parent: Option<WeakAccountRef>,
    /// Child accounts in insertion order
    children: IndexMap<CompactString, AccountRef>,
    /// Depth below the root (root is 0)
    pub depth: usize,
    /// Unique account identifier
    pub id: usize,
    /// Provenance flags
    pub flags: AccountFlags,
    cached_fullname: Option<String>,
}

impl Account {
    /// Create an account with the given name, parent and id
    pub fn new(name: CompactString, parent: Option<WeakAccountRef>, id: usize) -> Self {
        let depth = parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p.borrow().depth + 1)
            .unwrap_or(0);
        Self {
            name,
            parent,
            children: IndexMap::new(),
            depth,
            id,
            flags: AccountFlags::empty(),
            cached_fullname: None,
        }
    }

    /// Create the unnamed root account
    pub fn root() -> AccountRef {
        Rc::new(RefCell::new(Account::new(CompactString::default(), None, 0)))
    }

    /// Create a detached placeholder account such as `<Total>`
    pub fn temp(name: &str) -> AccountRef {
        let id = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
        let mut account = Account::new(name.into(), None, id);
        account.flags = AccountFlags::TEMP | AccountFlags::GENERATED;
        Rc::new(RefCell::new(account))
    }

    /// Check whether this is a detached placeholder
    pub fn is_temp(&self) -> bool {
        self.flags.contains(AccountFlags::TEMP)
    }

    /// Look up a direct child by name
    pub fn child(&self, name: &str) -> Option<AccountRef> {
        self.children.get(name).cloned()
    }

    /// Attach a child account
    pub fn add_child(&mut self, child: AccountRef) {
        let name = child.borrow().name.clone();
        self.children.insert(name, child);
    }

    /// Direct children in insertion order
    pub fn child_accounts(&self) -> Vec<AccountRef> {
        self.children.values().cloned().collect()
    }

    /// Direct children sorted by name
    pub fn child_accounts_sorted(&self) -> Vec<AccountRef> {
        let mut children: Vec<(CompactString, AccountRef)> =
            self.children.iter().map(|(n, c)| (n.clone(), c.clone())).collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children.into_iter().map(|(_, c)| c).collect()
    }

    /// Full account name, cached after the first call
    pub fn fullname(&mut self) -> String {
        if let Some(cached) = &self.cached_fullname {
            return cached.clone();
        }
        let fullname = self.fullname_immutable();
        self.cached_fullname = Some(fullname.clone());
        fullname
    }

    /// Full account name, computed without touching the cache
    pub fn fullname_immutable(&self) -> String {
        let mut segments: Vec<CompactString> = Vec::with_capacity(self.depth + 1);
        if !self.name.is_empty() {
            segments.push(self.name.clone());
        }
        let mut parent = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(account) = parent {
            let account = account.borrow();
            if !account.name.is_empty() {
                segments.push(account.name.clone());
            }
            parent = account.parent.as_ref().and_then(Weak::upgrade);
        }
        segments.reverse();
        let mut out = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(segment);
        }
        out
    }
}

/// Visit `account` and every descendant in depth-first, insertion order
pub fn walk_preorder(account: &AccountRef, visit: &mut impl FnMut(&AccountRef)) {
    visit(account);
    for child in account.borrow().child_accounts() {
        walk_preorder(&child, visit);
    }
}

bitflags::bitflags! {
    /// Display flags tracked on account xdata
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccountXDataFlags: u8 {
        /// The account has been written by the terminal handler
        const DISPLAYED = 0x01;
        /// The account matched a report predicate
        const MATCHED = 0x02;
        /// The account is scheduled for display
        const TO_DISPLAY = 0x04;
    }
}

/// Per-account report scratch, kept in a side table owned by the report
#[derive(Debug, Clone)]
pub struct AccountXData {
    /// Sum of the account's own postings seen by the report
    pub value: Value,
    /// `value` plus the recursively summed totals of all children
    pub total: Value,
    /// Sum of the postings actually displayed
    pub displayed: Value,
    /// Number of postings that contributed to `value`
    pub count: usize,
    /// Display flags
    pub flags: AccountXDataFlags,
}

impl Default for AccountXData {
    fn default() -> Self {
        Self {
            value: Value::Null,
            total: Value::Null,
            displayed: Value::Null,
            count: 0,
            flags: AccountXDataFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Session;

    #[test]
    fn test_fullname_joins_path_segments() {
        let mut session = Session::new();
        let checking = session.account("Assets:Bank:Checking");
        assert_eq!(checking.borrow().fullname_immutable(), "Assets:Bank:Checking");
        assert_eq!(checking.borrow().depth, 3);
        // cached variant agrees
        assert_eq!(checking.borrow_mut().fullname(), "Assets:Bank:Checking");
    }

    #[test]
    fn test_fullname_equals_parent_plus_name() {
        let mut session = Session::new();
        let child = session.account("Expenses:Food");
        let parent = child.borrow().parent.as_ref().and_then(Weak::upgrade).unwrap();
        let expected =
            format!("{}{}{}", parent.borrow().fullname_immutable(), SEPARATOR, child.borrow().name);
        assert_eq!(child.borrow().fullname_immutable(), expected);
    }

    #[test]
    fn test_siblings_are_unique_by_name() {
        let mut session = Session::new();
        let a = session.account("Assets:Cash");
        let b = session.account("Assets:Cash");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().id, b.borrow().id);
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut session = Session::new();
        session.account("Assets:Zebra");
        session.account("Assets:Apple");
        let assets = session.account("Assets");
        let names: Vec<String> =
            assets.borrow().child_accounts().iter().map(|c| c.borrow().name.to_string()).collect();
        assert_eq!(names, vec!["Zebra", "Apple"]);
        let sorted: Vec<String> = assets
            .borrow()
            .child_accounts_sorted()
            .iter()
            .map(|c| c.borrow().name.to_string())
            .collect();
        assert_eq!(sorted, vec!["Apple", "Zebra"]);
    }

    #[test]
    fn test_temp_accounts_are_detached() {
        let total = Account::temp("<Total>");
        assert!(total.borrow().is_temp());
        assert_eq!(total.borrow().fullname_immutable(), "<Total>");
        let other = Account::temp("<Revalued>");
        assert_ne!(total.borrow().id, other.borrow().id);
    }

    #[test]
    fn test_walk_preorder_order() {
        let mut session = Session::new();
        session.account("Assets:Bank");
        session.account("Assets:Cash");
        session.account("Expenses");
        let mut names = Vec::new();
        walk_preorder(&session.master.clone(), &mut |account| {
            names.push(account.borrow().fullname_immutable());
        });
        assert_eq!(names, vec!["", "Assets", "Assets:Bank", "Assets:Cash", "Expenses"]);
    }
}
