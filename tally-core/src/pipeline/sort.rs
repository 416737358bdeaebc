//! Sorting stages
//!
//! Both stages buffer everything and re-emit on flush, ordered by a
//! key expression evaluated through the report's [`SortKey`]. Sorting
//! is stable and ascending, with ties left in arrival order.

use indexmap::IndexMap;
use tally_math::Value;

use crate::expr::SortKey;
use crate::pipeline::{PostHandler, PostId, PostPool, ReportError, ReportResult};

fn evaluation_error(expr: &str, post: String, err: crate::expr::EvalError) -> ReportError {
    ReportError::Evaluation { expr: expr.to_string(), post, reason: err.to_string() }
}

/// Buffers postings and emits them ordered by a per-posting key
pub struct SortPosts {
    next: Box<dyn PostHandler>,
    key: Box<dyn SortKey>,
    expr: String,
    posts: Vec<PostId>,
    flushed: bool,
}

impl SortPosts {
    /// Wrap `next`, ordering by `key`
    pub fn new(next: Box<dyn PostHandler>, key: Box<dyn SortKey>, expr: &str) -> Self {
        Self { next, key, expr: expr.to_string(), posts: Vec::new(), flushed: false }
    }
}

impl PostHandler for SortPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        // keys are computed at arrival, when the upstream state that
        // feeds them (running totals) is still current
        let key = self
            .key
            .post_key(pool, post)
            .map_err(|e| evaluation_error(&self.expr, pool.describe(post), e))?;
        pool.xdata_mut(post).sort_key = Some(key);
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let mut posts = std::mem::take(&mut self.posts);
        {
            let pool = &*pool;
            let null = Value::Null;
            posts.sort_by(|a, b| {
                let ka = pool.xdata(*a).sort_key.as_ref().unwrap_or(&null);
                let kb = pool.xdata(*b).sort_key.as_ref().unwrap_or(&null);
                ka.sort_cmp(kb)
            });
        }
        for post in posts {
            self.next.accept(pool, post)?;
        }
        self.next.flush(pool)
    }
}

/// Buffers postings grouped by entry and emits whole entries ordered by
/// a per-entry key; postings of one entry stay contiguous and keep
/// their arrival order
pub struct SortEntries {
    next: Box<dyn PostHandler>,
    key: Box<dyn SortKey>,
    expr: String,
    groups: IndexMap<usize, Vec<PostId>>,
    flushed: bool,
}

impl SortEntries {
    /// Wrap `next`, ordering entries by `key`
    pub fn new(next: Box<dyn PostHandler>, key: Box<dyn SortKey>, expr: &str) -> Self {
        Self { next, key, expr: expr.to_string(), groups: IndexMap::new(), flushed: false }
    }
}

impl PostHandler for SortEntries {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let key = pool.entry_key(post);
        self.groups.entry(key).or_default().push(post);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let groups = std::mem::take(&mut self.groups);
        let mut keyed: Vec<(Value, Vec<PostId>)> = Vec::with_capacity(groups.len());
        for (_, posts) in groups {
            let representative = posts[0];
            let key = self
                .key
                .entry_key(pool, representative)
                .map_err(|e| evaluation_error(&self.expr, pool.describe(representative), e))?;
            keyed.push((key, posts));
        }
        keyed.sort_by(|a, b| a.0.sort_cmp(&b.0));
        for (_, posts) in keyed {
            for post in posts {
                self.next.accept(pool, post)?;
            }
        }
        self.next.flush(pool)
    }
}
