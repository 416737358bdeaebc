//! Leaf handlers: filtering, inversion, related expansion, payee
//! overrides and entry truncation
//!
//! These stages are stateless or lightly stateful; none of them buffer
//! postings except [`TruncateEntries`], which must see the whole input
//! to know which entries fall inside the head/tail window.

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::expr::Predicate;
use crate::pipeline::{PostHandler, PostId, PostPool, ReportError, ReportResult};
use crate::posting::PostFlags;

/// Forwards only postings matching a predicate, marking them `MATCHED`
/// so downstream stages (related expansion) can tell the two sides of
/// an entry apart
pub struct FilterPosts {
    next: Box<dyn PostHandler>,
    predicate: Box<dyn Predicate>,
    expr: String,
    flushed: bool,
}

impl FilterPosts {
    /// Wrap `next` behind `predicate`
    pub fn new(next: Box<dyn PostHandler>, predicate: Box<dyn Predicate>, expr: &str) -> Self {
        Self { next, predicate, expr: expr.to_string(), flushed: false }
    }
}

impl PostHandler for FilterPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let matched = self.predicate.test(pool, post).map_err(|err| ReportError::Evaluation {
            expr: self.expr.clone(),
            post: pool.describe(post),
            reason: err.to_string(),
        })?;
        if matched {
            pool.xdata_mut(post).flags.insert(PostFlags::MATCHED);
            self.next.accept(pool, post)?;
        }
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.next.flush(pool)
    }
}

/// Negates every posting's effective amount in its xdata; the journal
/// posting itself is untouched
pub struct InvertPosts {
    next: Box<dyn PostHandler>,
    flushed: bool,
}

impl InvertPosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>) -> Self {
        Self { next, flushed: false }
    }
}

impl PostHandler for InvertPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let negated = -pool.amount(post);
        pool.xdata_mut(post).amount = Some(negated);
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

/// For each entry seen, forwards the *other* postings of that entry —
/// the ones not marked `MATCHED` by an upstream filter. With `show_all`
/// every posting of the entry is forwarded instead. A per-entry guard
/// keeps a multiply-matched entry from being expanded twice.
pub struct RelatedPosts {
    next: Box<dyn PostHandler>,
    show_all: bool,
    seen: HashSet<usize>,
    flushed: bool,
}

impl RelatedPosts {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>, show_all: bool) -> Self {
        Self { next, show_all, seen: HashSet::new(), flushed: false }
    }
}

impl PostHandler for RelatedPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let key = pool.entry_key(post);
        if !self.seen.insert(key) {
            return Ok(());
        }
        let siblings: SmallVec<[PostId; 4]> = pool.entry_posts_of(key).iter().copied().collect();
        for sibling in siblings {
            if !self.show_all {
                if sibling == post {
                    continue;
                }
                if pool.xdata(sibling).flags.contains(PostFlags::MATCHED) {
                    continue;
                }
            }
            self.next.accept(pool, sibling)?;
        }
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.next.flush(pool)
    }
}

/// Rewrites the effective payee to the posting's commodity symbol
pub struct SetCommAsPayee {
    next: Box<dyn PostHandler>,
    flushed: bool,
}

impl SetCommAsPayee {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>) -> Self {
        Self { next, flushed: false }
    }
}

impl PostHandler for SetCommAsPayee {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let symbol = pool.amount(post).symbol().to_string();
        pool.xdata_mut(post).payee = Some(symbol);
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

/// Rewrites the effective payee to the owning entry's code
pub struct SetCodeAsPayee {
    next: Box<dyn PostHandler>,
    flushed: bool,
}

impl SetCodeAsPayee {
    /// Wrap `next`
    pub fn new(next: Box<dyn PostHandler>) -> Self {
        Self { next, flushed: false }
    }
}

impl PostHandler for SetCodeAsPayee {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let code = pool.entry(post).code.clone().unwrap_or_default();
        pool.xdata_mut(post).payee = Some(code);
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

/// Limits the report to the first `head` and last `tail` entries seen.
/// Operates on entries, not postings: an admitted entry is emitted with
/// every posting that reached this stage. Calculation upstream is not
/// affected, only what gets displayed.
pub struct TruncateEntries {
    next: Box<dyn PostHandler>,
    head: usize,
    tail: usize,
    groups: Vec<(usize, SmallVec<[PostId; 4]>)>,
    flushed: bool,
}

impl TruncateEntries {
    /// Wrap `next`, keeping `head` leading and `tail` trailing entries
    pub fn new(next: Box<dyn PostHandler>, head: usize, tail: usize) -> Self {
        Self { next, head, tail, groups: Vec::new(), flushed: false }
    }
}

impl PostHandler for TruncateEntries {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let key = pool.entry_key(post);
        if let Some((last, posts)) = self.groups.last_mut() {
            if *last == key {
                posts.push(post);
                return Ok(());
            }
        }
        self.groups.push((key, SmallVec::from_slice(&[post])));
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let groups = std::mem::take(&mut self.groups);
        let total = groups.len();
        for (index, (_, posts)) in groups.into_iter().enumerate() {
            let keep = index < self.head || total - index <= self.tail;
            if !keep {
                continue;
            }
            for post in posts {
                self.next.accept(pool, post)?;
            }
        }
        self.next.flush(pool)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::NaiveDate;

    use super::*;
    use crate::entry::Entry;
    use crate::journal::Session;
    use crate::pipeline::{pass_down_posts, Collector, PostInfo};
    use crate::posting::Posting;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn session_of(entries: &[(u32, &str, &[(&str, i64)])]) -> Session {
        let mut session = Session::new();
        for (day, payee, posts) in entries {
            let mut entry = Entry::new(date(*day), *payee);
            for (account, quantity) in posts.iter() {
                let amount = format!("{} USD", quantity).parse().unwrap();
                entry.add_posting(Posting::new(session.account(account), amount));
            }
            session.add_entry(entry).unwrap();
        }
        session
    }

    fn collector() -> (Box<Collector>, Rc<RefCell<Vec<PostInfo>>>) {
        let out = Rc::new(RefCell::new(Vec::new()));
        (Box::new(Collector::new(out.clone())), out)
    }

    #[test]
    fn test_filter_drops_non_matching() {
        let session = session_of(&[(1, "x", &[("A", 10), ("B", -10)])]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let query = crate::expr::BasicQuery::parse("^A$").unwrap();
        let mut filter = FilterPosts::new(base, Box::new(query), "^A$");
        pass_down_posts(&mut filter, &mut pool, posts.clone()).unwrap();
        assert_eq!(out.borrow().len(), 1);
        assert_eq!(out.borrow()[0].account, "A");
        // the passing posting was marked, the dropped one was not
        assert!(pool.xdata(posts[0]).flags.contains(PostFlags::MATCHED));
        assert!(!pool.xdata(posts[1]).flags.contains(PostFlags::MATCHED));
    }

    #[test]
    fn test_invert_negates_effective_amount_only() {
        let session = session_of(&[(1, "x", &[("A", 10), ("B", -10)])]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let mut invert = InvertPosts::new(base);
        pass_down_posts(&mut invert, &mut pool, posts.clone()).unwrap();
        assert_eq!(out.borrow()[0].amount, "-10 USD".parse().unwrap());
        assert_eq!(out.borrow()[1].amount, "10 USD".parse().unwrap());
        assert_eq!(pool.posting(posts[0]).amount, "10 USD".parse().unwrap());
    }

    #[test]
    fn test_related_emits_other_side_once() {
        let session = session_of(&[(1, "x", &[("A", 10), ("B", -6), ("C", -4)])]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        // pretend an upstream filter matched A
        pool.xdata_mut(posts[0]).flags.insert(PostFlags::MATCHED);
        let (base, out) = collector();
        let mut related = RelatedPosts::new(base, false);
        // the same entry arriving twice must not be expanded twice
        pass_down_posts(&mut related, &mut pool, vec![posts[0], posts[0]]).unwrap();
        let accounts: Vec<String> = out.borrow().iter().map(|p| p.account.clone()).collect();
        assert_eq!(accounts, vec!["B", "C"]);
    }

    #[test]
    fn test_related_show_all_includes_matched_side() {
        let session = session_of(&[(1, "x", &[("A", 10), ("B", -10)])]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        pool.xdata_mut(posts[0]).flags.insert(PostFlags::MATCHED);
        let (base, out) = collector();
        let mut related = RelatedPosts::new(base, true);
        pass_down_posts(&mut related, &mut pool, vec![posts[0]]).unwrap();
        let accounts: Vec<String> = out.borrow().iter().map(|p| p.account.clone()).collect();
        assert_eq!(accounts, vec!["A", "B"]);
    }

    #[test]
    fn test_payee_overrides() {
        let mut session = Session::new();
        let mut entry = Entry::new(date(1), "Original").with_code("CHK-7");
        entry.add_posting(Posting::new(session.account("A"), "10 USD".parse().unwrap()));
        entry.add_posting(Posting::new(session.account("B"), "-10 USD".parse().unwrap()));
        session.add_entry(entry).unwrap();

        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let mut comm = SetCommAsPayee::new(base);
        pass_down_posts(&mut comm, &mut pool, vec![posts[0]]).unwrap();
        assert_eq!(out.borrow()[0].payee, "USD");

        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let mut code = SetCodeAsPayee::new(base);
        pass_down_posts(&mut code, &mut pool, vec![posts[0]]).unwrap();
        assert_eq!(out.borrow()[0].payee, "CHK-7");
    }

    #[test]
    fn test_truncate_head_and_tail() {
        let session = session_of(&[
            (1, "a", &[("A", 1), ("B", -1)]),
            (2, "b", &[("A", 2), ("B", -2)]),
            (3, "c", &[("A", 3), ("B", -3)]),
            (4, "d", &[("A", 4), ("B", -4)]),
            (5, "e", &[("A", 5), ("B", -5)]),
        ]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let mut truncate = TruncateEntries::new(base, 1, 1);
        pass_down_posts(&mut truncate, &mut pool, posts).unwrap();
        let dates: Vec<NaiveDate> = out.borrow().iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date(1), date(1), date(5), date(5)]);
    }

    #[test]
    fn test_truncate_overlap_emits_each_entry_once() {
        let session = session_of(&[
            (1, "a", &[("A", 1), ("B", -1)]),
            (2, "b", &[("A", 2), ("B", -2)]),
        ]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        // head + tail exceed the number of entries; everything shows once
        let mut truncate = TruncateEntries::new(base, 3, 3);
        pass_down_posts(&mut truncate, &mut pool, posts).unwrap();
        assert_eq!(out.borrow().len(), 4);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let session = session_of(&[(1, "a", &[("A", 1), ("B", -1)])]);
        let mut pool = crate::pipeline::PostPool::new(&session);
        let posts = pool.session_posts();
        let (base, out) = collector();
        let mut truncate = TruncateEntries::new(base, 1, 0);
        for post in posts {
            truncate.accept(&mut pool, post).unwrap();
        }
        truncate.flush(&mut pool).unwrap();
        let emitted = out.borrow().len();
        truncate.flush(&mut pool).unwrap();
        assert_eq!(out.borrow().len(), emitted);
    }
}
