//! Component expansion stage
//!
//! Aggregating stages built with `remember_components` leave the
//! contributing postings on each synthetic aggregate they emit. This
//! stage undoes the aggregation selectively: when its predicate accepts
//! an aggregate, the aggregate is replaced by its components, forwarded
//! individually in their original order. Everything else passes
//! through untouched.

use smallvec::SmallVec;

use crate::expr::Predicate;
use crate::pipeline::{PostHandler, PostId, PostPool, ReportError, ReportResult};

/// Expands matching aggregates back into their component postings
pub struct ComponentPosts {
    next: Box<dyn PostHandler>,
    predicate: Box<dyn Predicate>,
    expr: String,
    flushed: bool,
}

impl ComponentPosts {
    /// Wrap `next`, expanding aggregates that match `predicate`
    pub fn new(next: Box<dyn PostHandler>, predicate: Box<dyn Predicate>, expr: &str) -> Self {
        Self { next, predicate, expr: expr.to_string(), flushed: false }
    }
}

impl PostHandler for ComponentPosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let components: SmallVec<[PostId; 4]> = pool.xdata(post).components.clone();
        if !components.is_empty() {
            let matched =
                self.predicate.test(pool, post).map_err(|err| ReportError::Evaluation {
                    expr: self.expr.clone(),
                    post: pool.describe(post),
                    reason: err.to_string(),
                })?;
            if matched {
                for component in components {
                    self.next.accept(pool, component)?;
                }
                return Ok(());
            }
        }
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
