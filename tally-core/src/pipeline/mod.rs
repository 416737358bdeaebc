//! Handler-chain primitives for the posting pipeline
//!
//! Reports run by driving every posting of a session through a chain of
//! [`PostHandler`]s. Each handler owns its downstream as a boxed trait
//! object, so a chain is a single line of ownership from head to tail;
//! chains are assembled tail-first by the report's chain builder.
//!
//! Postings are addressed by [`PostId`] indices into a [`PostPool`],
//! which registers journal postings by reference, owns every synthetic
//! entry a handler fabricates, and keeps the per-posting and
//! per-account scratch tables. Dropping the pool releases all report
//! state; journal objects are never written to.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::NaiveDate;
use smallvec::SmallVec;
use tally_math::{Amount, Value};
use thiserror::Error;

use crate::account::{AccountRef, AccountXData, AccountXDataFlags};
use crate::entry::Entry;
use crate::journal::Session;
use crate::posting::{PostFlags, PostXData, Posting};

pub mod components;
pub mod filters;
pub mod reconcile;
pub mod revalue;
pub mod sort;
pub mod totals;

/// Errors surfaced by report construction and execution
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report configuration cannot be turned into a chain
    #[error("invalid report configuration: {0}")]
    Configuration(String),
    /// No subset of in-scope postings sums to the reconcile target
    #[error("cannot reconcile to {target} as of {cutoff}")]
    Reconciliation {
        /// The requested target balance
        target: String,
        /// The reconciliation cutoff date
        cutoff: NaiveDate,
    },
    /// An expression failed while the pipeline was running
    #[error("expression `{expr}` failed on {post}: {reason}")]
    Evaluation {
        /// The offending expression
        expr: String,
        /// Description of the posting being evaluated
        post: String,
        /// What went wrong
        reason: String,
    },
    /// An internal invariant was broken; treated as a bug
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Index of a posting within a report's [`PostPool`]
///
/// Ids are handed out in registration order, so ordering two ids
/// recovers the original journal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostId(usize);

/// One stage of the posting pipeline
pub trait PostHandler {
    /// Consume one posting, forwarding zero or more downstream. May
    /// write to the posting's xdata; must not touch journal objects.
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()>;

    /// Signal end of input: emit buffered output, then flush downstream
    /// exactly once. A second call is a no-op.
    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()>;
}

/// One stage of the account-report pass
pub trait AccountHandler {
    /// Consume one account
    fn accept(&mut self, pool: &PostPool<'_>, account: &AccountRef) -> ReportResult<()>;

    /// Signal end of input
    fn flush(&mut self, pool: &PostPool<'_>) -> ReportResult<()>;
}

enum PostRec<'j> {
    Journal { entry: &'j Entry, index: usize },
    Synthetic { entry: Rc<Entry>, index: usize },
}

/// Per-report posting table and scratch storage
///
/// Borrows the session read-only for the lifetime of one report.
pub struct PostPool<'j> {
    session: &'j Session,
    posts: Vec<PostRec<'j>>,
    xdata: Vec<PostXData>,
    by_entry: HashMap<usize, SmallVec<[PostId; 4]>>,
    account_xdata: HashMap<usize, AccountXData>,
}

impl<'j> PostPool<'j> {
    /// Create an empty pool over a session
    pub fn new(session: &'j Session) -> Self {
        Self {
            session,
            posts: Vec::new(),
            xdata: Vec::new(),
            by_entry: HashMap::new(),
            account_xdata: HashMap::new(),
        }
    }

    /// The root of the session's account tree
    pub fn master(&self) -> AccountRef {
        self.session.master.clone()
    }

    /// Register every posting of every entry of every journal, in
    /// journal then entry then posting order
    pub fn session_posts(&mut self) -> Vec<PostId> {
        let session = self.session;
        let mut ids = Vec::with_capacity(session.posting_count());
        for journal in &session.journals {
            for entry in &journal.entries {
                ids.extend(self.register_entry(entry));
            }
        }
        ids
    }

    /// Register the postings of a single entry
    pub fn entry_posts(&mut self, entry: &'j Entry) -> Vec<PostId> {
        self.register_entry(entry).into_vec()
    }

    fn register_entry(&mut self, entry: &'j Entry) -> SmallVec<[PostId; 4]> {
        let key = entry as *const Entry as usize;
        let mut ids = SmallVec::new();
        for index in 0..entry.postings.len() {
            let id = PostId(self.posts.len());
            self.posts.push(PostRec::Journal { entry, index });
            self.xdata.push(PostXData::default());
            self.by_entry.entry(key).or_default().push(id);
            ids.push(id);
        }
        ids
    }

    /// Take ownership of a handler-fabricated entry, registering its
    /// postings with the `SYNTHETIC` flag set
    pub fn add_synthetic(&mut self, entry: Entry) -> SmallVec<[PostId; 4]> {
        let entry = Rc::new(entry);
        let key = Rc::as_ptr(&entry) as usize;
        let mut ids = SmallVec::new();
        for index in 0..entry.postings.len() {
            let id = PostId(self.posts.len());
            self.posts.push(PostRec::Synthetic { entry: entry.clone(), index });
            let mut xdata = PostXData::default();
            xdata.flags.insert(PostFlags::SYNTHETIC);
            self.xdata.push(xdata);
            self.by_entry.entry(key).or_default().push(id);
            ids.push(id);
        }
        ids
    }

    /// The entry a posting belongs to
    pub fn entry(&self, post: PostId) -> &Entry {
        match &self.posts[post.0] {
            PostRec::Journal { entry, .. } => entry,
            PostRec::Synthetic { entry, .. } => entry,
        }
    }

    /// The posting itself
    pub fn posting(&self, post: PostId) -> &Posting {
        match &self.posts[post.0] {
            PostRec::Journal { entry, index } => &entry.postings[*index],
            PostRec::Synthetic { entry, index } => &entry.postings[*index],
        }
    }

    /// Opaque identity of the owning entry, for grouping
    pub fn entry_key(&self, post: PostId) -> usize {
        match &self.posts[post.0] {
            PostRec::Journal { entry, .. } => *entry as *const Entry as usize,
            PostRec::Synthetic { entry, .. } => Rc::as_ptr(entry) as usize,
        }
    }

    /// Every registered posting of the entry identified by `key`
    pub fn entry_posts_of(&self, key: usize) -> &[PostId] {
        self.by_entry.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Read a posting's scratch record
    pub fn xdata(&self, post: PostId) -> &PostXData {
        &self.xdata[post.0]
    }

    /// Write a posting's scratch record
    pub fn xdata_mut(&mut self, post: PostId) -> &mut PostXData {
        &mut self.xdata[post.0]
    }

    /// The effective amount: the xdata override when present, the
    /// journal amount otherwise
    pub fn amount(&self, post: PostId) -> Amount {
        if let Some(amount) = &self.xdata[post.0].amount {
            return amount.clone();
        }
        self.posting(post).amount.clone()
    }

    /// The effective date: xdata override, then the posting's own date,
    /// then the entry's effective date, then the entry's primary date
    pub fn effective_date(&self, post: PostId) -> NaiveDate {
        if let Some(date) = self.xdata[post.0].date {
            return date;
        }
        if let Some(date) = self.posting(post).date {
            return date;
        }
        self.entry(post).effective()
    }

    /// The effective payee: xdata override, then the posting's own
    /// payee, then the entry's payee
    pub fn payee(&self, post: PostId) -> String {
        if let Some(payee) = &self.xdata[post.0].payee {
            return payee.clone();
        }
        if let Some(payee) = &self.posting(post).payee {
            return payee.clone();
        }
        self.entry(post).payee.clone()
    }

    /// Whether the posting was fabricated by a handler
    pub fn is_synthetic(&self, post: PostId) -> bool {
        self.xdata[post.0].flags.contains(PostFlags::SYNTHETIC)
    }

    /// Human-readable posting description for diagnostics
    pub fn describe(&self, post: PostId) -> String {
        format!(
            "posting to {} on {}",
            self.posting(post).account.borrow().fullname_immutable(),
            self.effective_date(post)
        )
    }

    /// Read an account's scratch record, if one exists
    pub fn account_xdata_of(&self, account: &AccountRef) -> Option<&AccountXData> {
        self.account_xdata.get(&account.borrow().id)
    }

    /// Write an account's scratch record, creating it on first touch
    pub fn account_xdata_mut(&mut self, account: &AccountRef) -> &mut AccountXData {
        self.account_xdata.entry(account.borrow().id).or_default()
    }
}

/// Drive postings into a chain; on an `accept` error the chain is still
/// flushed (best effort) to release buffered state, then the original
/// error is returned. No partial output is guaranteed on error.
pub fn pass_down_posts<I>(
    handler: &mut dyn PostHandler,
    pool: &mut PostPool<'_>,
    posts: I,
) -> ReportResult<()>
where
    I: IntoIterator<Item = PostId>,
{
    for post in posts {
        if let Err(err) = handler.accept(pool, post) {
            let _ = handler.flush(pool);
            return Err(err);
        }
    }
    handler.flush(pool)
}

/// Drive accounts into an account handler, flushing at the end
pub fn pass_down_accounts<I>(
    handler: &mut dyn AccountHandler,
    pool: &PostPool<'_>,
    accounts: I,
) -> ReportResult<()>
where
    I: IntoIterator<Item = AccountRef>,
{
    for account in accounts {
        handler.accept(pool, &account)?;
    }
    handler.flush(pool)
}

/// A snapshot of one emitted posting, taken by [`Collector`]
#[derive(Debug, Clone)]
pub struct PostInfo {
    /// Pool id of the emitted posting
    pub id: PostId,
    /// Full account name
    pub account: String,
    /// Effective payee
    pub payee: String,
    /// Effective date
    pub date: NaiveDate,
    /// Effective amount
    pub amount: Amount,
    /// Running-total snapshot at emission time
    pub total: Value,
    /// Position assigned by the calc stage
    pub count: usize,
    /// Whether the posting was handler-fabricated
    pub synthetic: bool,
}

/// Terminal handler that snapshots everything it receives into a shared
/// buffer; the simplest possible renderer, also used by the test suite
pub struct Collector {
    out: Rc<RefCell<Vec<PostInfo>>>,
    flushed: bool,
}

impl Collector {
    /// Create a collector writing into the given shared buffer
    pub fn new(out: Rc<RefCell<Vec<PostInfo>>>) -> Self {
        Self { out, flushed: false }
    }
}

impl PostHandler for Collector {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let xdata = pool.xdata(post);
        let info = PostInfo {
            id: post,
            account: pool.posting(post).account.borrow().fullname_immutable(),
            payee: pool.payee(post),
            date: pool.effective_date(post),
            amount: pool.amount(post),
            total: xdata.total.clone(),
            count: xdata.count,
            synthetic: pool.is_synthetic(post),
        };
        let account = pool.posting(post).account.clone();
        let account_xdata = pool.account_xdata_mut(&account);
        account_xdata.displayed.add_amount(&info.amount);
        account_xdata.flags.insert(AccountXDataFlags::DISPLAYED);
        pool.xdata_mut(post).flags.insert(PostFlags::DISPLAYED);
        self.out.borrow_mut().push(info);
        Ok(())
    }

    fn flush(&mut self, _pool: &mut PostPool<'_>) -> ReportResult<()> {
        self.flushed = true;
        Ok(())
    }
}
