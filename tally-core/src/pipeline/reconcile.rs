//! Reconciliation stage
//!
//! Buffers postings dated on or before a cutoff and, at flush, selects
//! the subset whose effective amounts sum exactly to a target balance.
//! Selection prefers the smallest subset; among equal sizes the search
//! walks candidates latest-date-first, so recent postings win ties.
//! The selected postings are re-emitted in their original journal
//! order. Postings after the cutoff pass straight through.

use chrono::NaiveDate;
use tally_math::{Amount, Value};

use crate::pipeline::{PostHandler, PostId, PostPool, ReportError, ReportResult};

/// Filters the report down to a subset reconciling to a target balance
pub struct ReconcilePosts {
    next: Box<dyn PostHandler>,
    target: Value,
    cutoff: NaiveDate,
    posts: Vec<PostId>,
    flushed: bool,
}

impl ReconcilePosts {
    /// Wrap `next`, reconciling to `target` as of `cutoff`
    pub fn new(next: Box<dyn PostHandler>, target: Value, cutoff: NaiveDate) -> Self {
        Self { next, target, cutoff, posts: Vec::new(), flushed: false }
    }

    fn select(&self, pool: &PostPool<'_>, posts: &[PostId]) -> ReportResult<Vec<PostId>> {
        let mut candidates: Vec<PostId> = posts.to_vec();
        candidates.sort_by(|a, b| {
            pool.effective_date(*b).cmp(&pool.effective_date(*a)).then(b.cmp(a))
        });
        let amounts: Vec<Amount> = candidates.iter().map(|p| pool.amount(*p)).collect();

        for size in 0..=amounts.len() {
            let mut chosen = Vec::with_capacity(size);
            if search(&amounts, &self.target, 0, size, &mut chosen) {
                let mut selected: Vec<PostId> = chosen.into_iter().map(|i| candidates[i]).collect();
                selected.sort();
                return Ok(selected);
            }
        }
        Err(ReportError::Reconciliation {
            target: self.target.to_string(),
            cutoff: self.cutoff,
        })
    }
}

fn search(
    amounts: &[Amount],
    remaining: &Value,
    from: usize,
    need: usize,
    chosen: &mut Vec<usize>,
) -> bool {
    if need == 0 {
        return remaining.is_zero();
    }
    if amounts.len() - from < need {
        return false;
    }
    for i in from..amounts.len() {
        let rest = remaining.sub(&Value::from(amounts[i].clone()));
        chosen.push(i);
        if search(amounts, &rest, i + 1, need - 1, chosen) {
            return true;
        }
        chosen.pop();
    }
    false
}

impl PostHandler for ReconcilePosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        if pool.effective_date(post) <= self.cutoff {
            self.posts.push(post);
            Ok(())
        } else {
            self.next.accept(pool, post)
        }
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let posts = std::mem::take(&mut self.posts);
        let result = self.select(pool, &posts);
        match result {
            Ok(selected) => {
                for post in selected {
                    self.next.accept(pool, post)?;
                }
                self.next.flush(pool)
            }
            Err(err) => {
                let _ = self.next.flush(pool);
                Err(err)
            }
        }
    }
}
