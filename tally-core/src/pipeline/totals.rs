//! Accumulating handlers built around per-account totals
//!
//! The running-total stage ([`CalcPosts`]) and the whole subtotal
//! family live here. Subtotal, interval, day-of-week and by-payee
//! reports all aggregate postings per (account, commodity) and emit the
//! sums as postings of a synthetic entry; that shared behavior is
//! [`SubtotalBuffer`].

use chrono::{Datelike, NaiveDate, Weekday};
use indexmap::IndexMap;
use smallvec::SmallVec;
use tally_math::{Amount, Balance, Value};

use crate::account::{walk_preorder, Account, AccountRef};
use crate::entry::{Entry, EntryFlags};
use crate::interval::ReportInterval;
use crate::pipeline::{PostHandler, PostId, PostPool, ReportResult};
use crate::posting::{PostFlags, Posting};

/// Maintains the running total and snapshots it into each posting's
/// xdata before forwarding. Where this stage sits in the chain decides
/// whether filtered-out postings still move the total.
pub struct CalcPosts {
    next: Box<dyn PostHandler>,
    total: Value,
    count: usize,
    flushed: bool,
}

impl CalcPosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>) -> Self {
        Self { next, total: Value::Null, count: 0, flushed: false }
    }
}

impl PostHandler for CalcPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let amount = pool.amount(post);
        self.total.add_amount(&amount);
        self.count += 1;
        let xdata = pool.xdata_mut(post);
        xdata.total = self.total.clone();
        xdata.count = self.count;
        self.next.accept(pool, post)
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.next.flush(pool)
    }
}

struct AccountBucket {
    account: AccountRef,
    balance: Balance,
    posts: SmallVec<[PostId; 8]>,
}

/// Per-(account, commodity) accumulation shared by the subtotal family
pub(crate) struct SubtotalBuffer {
    values: IndexMap<usize, AccountBucket>,
    start: Option<NaiveDate>,
    finish: Option<NaiveDate>,
    remember: bool,
}

impl SubtotalBuffer {
    pub(crate) fn new(remember: bool) -> Self {
        Self { values: IndexMap::new(), start: None, finish: None, remember }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub(crate) fn finish(&self) -> Option<NaiveDate> {
        self.finish
    }

    pub(crate) fn add(&mut self, pool: &PostPool<'_>, post: PostId) {
        let amount = pool.amount(post);
        let date = pool.effective_date(post);
        let account = pool.posting(post).account.clone();
        let id = account.borrow().id;
        let bucket = self.values.entry(id).or_insert_with(|| AccountBucket {
            account,
            balance: Balance::new(),
            posts: SmallVec::new(),
        });
        bucket.balance.add_amount(&amount);
        if self.remember {
            bucket.posts.push(post);
        }
        self.start = Some(self.start.map_or(date, |d| d.min(date)));
        self.finish = Some(self.finish.map_or(date, |d| d.max(date)));
    }

    /// Emit one synthetic entry holding a posting per (account,
    /// commodity) sum. Accounts come out in depth-first tree order,
    /// commodities in first-seen order within an account; placeholder
    /// accounts not attached to the tree trail in first-seen order.
    pub(crate) fn report(
        &mut self,
        pool: &mut PostPool<'_>,
        next: &mut dyn PostHandler,
        date: NaiveDate,
        payee: String,
    ) -> ReportResult<()> {
        if self.values.is_empty() {
            return Ok(());
        }
        let values = std::mem::take(&mut self.values);
        self.start = None;
        self.finish = None;

        let mut order: Vec<usize> = Vec::with_capacity(values.len());
        walk_preorder(&pool.master(), &mut |account| {
            let id = account.borrow().id;
            if values.contains_key(&id) {
                order.push(id);
            }
        });
        for id in values.keys() {
            if !order.contains(id) {
                order.push(*id);
            }
        }

        let mut entry = Entry::new(date, payee);
        entry.flags.insert(EntryFlags::GENERATED);
        let mut components: Vec<SmallVec<[PostId; 4]>> = Vec::new();
        for id in &order {
            let bucket = &values[id];
            for (_, amount) in bucket.balance.iter() {
                if self.remember {
                    let matching = bucket
                        .posts
                        .iter()
                        .copied()
                        .filter(|p| pool.amount(*p).symbol() == amount.symbol())
                        .collect();
                    components.push(matching);
                }
                entry.add_posting(Posting::new(bucket.account.clone(), amount.clone()));
            }
        }

        let ids = pool.add_synthetic(entry);
        if self.remember {
            for (id, matching) in ids.iter().zip(components) {
                let xdata = pool.xdata_mut(*id);
                xdata.components = matching;
                xdata.flags.insert(PostFlags::COMPOUND);
            }
        }
        for id in ids {
            next.accept(pool, id)?;
        }
        Ok(())
    }
}

/// Combines everything received into one subtotal entry on flush
pub struct SubtotalPosts {
    next: Box<dyn PostHandler>,
    buffer: SubtotalBuffer,
    flushed: bool,
}

impl SubtotalPosts {
    /// Wrap `next`; `remember` keeps component references on the
    /// emitted aggregates for later expansion
    pub fn new(next: Box<dyn PostHandler>, remember: bool) -> Self {
        Self { next, buffer: SubtotalBuffer::new(remember), flushed: false }
    }
}

impl PostHandler for SubtotalPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        self.buffer.add(pool, post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let (Some(date), Some(finish)) = (self.buffer.start(), self.buffer.finish()) {
            self.buffer.report(pool, self.next.as_mut(), date, format!("- {}", finish))?;
        }
        self.next.flush(pool)
    }
}

/// Collapses each multi-posting entry into one synthetic posting per
/// commodity against a `<Total>` placeholder (or the entry's single
/// account); single-posting entries pass through unchanged
pub struct CollapsePosts {
    next: Box<dyn PostHandler>,
    current: Option<usize>,
    posts: Vec<PostId>,
    totals_account: AccountRef,
    flushed: bool,
}

impl CollapsePosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>) -> Self {
        Self {
            next,
            current: None,
            posts: Vec::new(),
            totals_account: Account::temp("<Total>"),
            flushed: false,
        }
    }

    fn report_entry(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.posts.is_empty() {
            return Ok(());
        }
        let posts = std::mem::take(&mut self.posts);
        if posts.len() == 1 {
            return self.next.accept(pool, posts[0]);
        }

        let mut balance = Balance::new();
        let mut accounts: Vec<AccountRef> = Vec::new();
        for post in &posts {
            balance.add_amount(&pool.amount(*post));
            let account = pool.posting(*post).account.clone();
            if !accounts.iter().any(|a| a.borrow().id == account.borrow().id) {
                accounts.push(account);
            }
        }
        let account = if accounts.len() == 1 {
            accounts.remove(0)
        } else {
            self.totals_account.clone()
        };

        let mut entry = {
            let source = pool.entry(posts[0]);
            let mut entry = Entry::new(source.date, source.payee.clone());
            entry.effective_date = source.effective_date;
            entry.code = source.code.clone();
            entry.state = source.state;
            entry
        };
        entry.flags.insert(EntryFlags::GENERATED);
        for (_, amount) in balance.iter() {
            entry.add_posting(Posting::new(account.clone(), amount.clone()));
        }
        let ids = pool.add_synthetic(entry);
        for id in ids {
            self.next.accept(pool, id)?;
        }
        Ok(())
    }
}

impl PostHandler for CollapsePosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let key = pool.entry_key(post);
        if self.current != Some(key) {
            self.report_entry(pool)?;
            self.current = Some(key);
        }
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.report_entry(pool)?;
        self.next.flush(pool)
    }
}

/// Buckets postings by time period, emitting one subtotal entry per
/// bucket, dated at the bucket's start. Expects date-ordered input; the
/// chain builder wraps this stage in a date sort.
pub struct IntervalPosts {
    next: Box<dyn PostHandler>,
    interval: ReportInterval,
    week_start: Weekday,
    show_empty: bool,
    buffer: SubtotalBuffer,
    bucket: Option<(NaiveDate, NaiveDate)>,
    totals_account: AccountRef,
    flushed: bool,
}

impl IntervalPosts {
    /// Wrap `next`, bucketing by `interval`
    pub fn new(
        next: Box<dyn PostHandler>,
        interval: ReportInterval,
        remember: bool,
        show_empty: bool,
        week_start: Weekday,
    ) -> Self {
        Self {
            next,
            interval,
            week_start,
            show_empty,
            buffer: SubtotalBuffer::new(remember),
            bucket: None,
            totals_account: Account::temp("<Total>"),
            flushed: false,
        }
    }

    fn bucket_payee(&self, bucket: (NaiveDate, NaiveDate)) -> String {
        let end = if self.interval.period.is_some() {
            bucket.1.pred_opt().unwrap_or(bucket.1)
        } else {
            self.buffer.finish().unwrap_or(bucket.0)
        };
        format!("- {}", end)
    }

    fn report_bucket(&mut self, pool: &mut PostPool<'_>, bucket: (NaiveDate, NaiveDate)) -> ReportResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let payee = self.bucket_payee(bucket);
        self.buffer.report(pool, self.next.as_mut(), bucket.0, payee)
    }

    fn report_empty(&mut self, pool: &mut PostPool<'_>, bucket: (NaiveDate, NaiveDate)) -> ReportResult<()> {
        let mut entry = Entry::new(bucket.0, self.bucket_payee(bucket));
        entry.flags.insert(EntryFlags::GENERATED);
        entry.add_posting(Posting::new(self.totals_account.clone(), Amount::zero()));
        let ids = pool.add_synthetic(entry);
        for id in ids {
            self.next.accept(pool, id)?;
        }
        Ok(())
    }
}

impl PostHandler for IntervalPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let date = pool.effective_date(post);
        if !self.interval.in_range(date) {
            return Ok(());
        }
        match self.bucket {
            None => {
                self.bucket = self.interval.bucket_of(date, self.week_start);
            }
            Some((start, end)) if date >= end => {
                self.report_bucket(pool, (start, end))?;
                if let Some(period) = self.interval.period.clone() {
                    let mut start = end;
                    let mut end = period.add_to(end);
                    while date >= end {
                        if self.show_empty {
                            self.report_empty(pool, (start, end))?;
                        }
                        start = end;
                        end = period.add_to(end);
                    }
                    self.bucket = Some((start, end));
                }
            }
            Some(_) => {}
        }
        self.buffer.add(pool, post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let Some(bucket) = self.bucket {
            self.report_bucket(pool, bucket)?;
        }
        self.next.flush(pool)
    }
}

/// Buckets postings by weekday of their effective date, emitting one
/// subtotal entry per weekday in week order starting from the
/// configured first day
pub struct DowPosts {
    next: Box<dyn PostHandler>,
    buckets: [Vec<PostId>; 7],
    week_start: Weekday,
    remember: bool,
    flushed: bool,
}

impl DowPosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>, remember: bool, week_start: Weekday) -> Self {
        Self { next, buckets: Default::default(), week_start, remember, flushed: false }
    }
}

impl PostHandler for DowPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let weekday = pool.effective_date(post).weekday();
        self.buckets[weekday.num_days_from_sunday() as usize].push(post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let first = self.week_start.num_days_from_sunday() as usize;
        for offset in 0..7 {
            let posts = std::mem::take(&mut self.buckets[(first + offset) % 7]);
            if posts.is_empty() {
                continue;
            }
            let mut buffer = SubtotalBuffer::new(self.remember);
            for post in &posts {
                buffer.add(pool, *post);
            }
            if let Some(date) = buffer.finish() {
                buffer.report(pool, self.next.as_mut(), date, format!("- {}", date))?;
            }
        }
        self.next.flush(pool)
    }
}

/// Buckets postings by effective payee, emitting one subtotal entry per
/// payee in first-seen order
pub struct ByPayeePosts {
    next: Box<dyn PostHandler>,
    buckets: IndexMap<String, (NaiveDate, SubtotalBuffer)>,
    remember: bool,
    flushed: bool,
}

impl ByPayeePosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>, remember: bool) -> Self {
        Self { next, buckets: IndexMap::new(), remember, flushed: false }
    }
}

impl PostHandler for ByPayeePosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let payee = pool.payee(post);
        let date = pool.effective_date(post);
        let remember = self.remember;
        let (_, buffer) = self
            .buckets
            .entry(payee)
            .or_insert_with(|| (date, SubtotalBuffer::new(remember)));
        buffer.add(pool, post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let buckets = std::mem::take(&mut self.buckets);
        for (payee, (date, mut buffer)) in buckets {
            buffer.report(pool, self.next.as_mut(), date, payee)?;
        }
        self.next.flush(pool)
    }
}
