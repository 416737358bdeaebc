//! Expression interfaces and the basic query language
//!
//! The full expression language lives outside this crate; reports only
//! need three capabilities, expressed as traits: a boolean test on a
//! posting ([`Predicate`]), a sort-key evaluation ([`SortKey`]), and a
//! compiler turning option strings into either ([`ExprCompiler`]).
//!
//! [`BasicCompiler`] is the built-in implementation, understanding the
//! register-style query syntax: whitespace-separated terms AND-ed
//! together, each an account regex by default, `payee:REGEX` or
//! `code:REGEX` to match other fields, and `not` to negate the next
//! term. Sort keys are the register shorthands `d`/`date`,
//! `t`/`amount` and `T`/`total`. Dates order as sort keys by being
//! mapped onto untyped day-count amounts.

use chrono::Datelike;
use regex::Regex;
use tally_math::{Amount, Value};
use thiserror::Error;

use crate::account::AccountRef;
use crate::pipeline::{PostId, PostPool};

/// Errors from expression compilation or evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    /// The expression string could not be compiled
    #[error("parse error in `{expr}`: {reason}")]
    Parse {
        /// The offending expression
        expr: String,
        /// What went wrong
        reason: String,
    },
    /// The expression failed while being evaluated
    #[error("{0}")]
    Runtime(String),
}

/// A boolean test over one posting
pub trait Predicate {
    /// Evaluate the predicate against a posting
    fn test(&self, pool: &PostPool<'_>, post: PostId) -> Result<bool, EvalError>;
}

/// Adapter making a closure usable as a [`Predicate`]
pub struct FnPredicate<F>(pub F);

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&PostPool<'_>, PostId) -> bool,
{
    fn test(&self, pool: &PostPool<'_>, post: PostId) -> Result<bool, EvalError> {
        Ok((self.0)(pool, post))
    }
}

/// A sort-key evaluation over postings, entries or accounts
pub trait SortKey {
    /// Key for one posting
    fn post_key(&self, pool: &PostPool<'_>, post: PostId) -> Result<Value, EvalError>;

    /// Key for the entry owning `post`
    fn entry_key(&self, pool: &PostPool<'_>, post: PostId) -> Result<Value, EvalError>;

    /// Key for an account, read from the report's account scratch
    fn account_key(&self, pool: &PostPool<'_>, account: &AccountRef) -> Result<Value, EvalError>;
}

/// Compiles option strings into predicates and sort keys
pub trait ExprCompiler {
    /// Compile a predicate expression
    fn predicate(&self, expr: &str) -> Result<Box<dyn Predicate>, EvalError>;

    /// Compile a sort-key expression
    fn sort_key(&self, expr: &str) -> Result<Box<dyn SortKey>, EvalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Account,
    Payee,
    Code,
}

#[derive(Debug)]
struct Term {
    target: Target,
    pattern: Regex,
    negated: bool,
}

/// A compiled basic query: AND of regex terms
#[derive(Debug)]
pub struct BasicQuery {
    terms: Vec<Term>,
}

impl BasicQuery {
    /// Compile a query string
    pub fn parse(expr: &str) -> Result<Self, EvalError> {
        let mut terms = Vec::new();
        let mut negate_next = false;
        for token in expr.split_whitespace() {
            if token == "not" {
                negate_next = !negate_next;
                continue;
            }
            let (target, pattern) = if let Some(rest) = token.strip_prefix("payee:") {
                (Target::Payee, rest)
            } else if let Some(rest) = token.strip_prefix("code:") {
                (Target::Code, rest)
            } else if let Some(rest) = token.strip_prefix("account:") {
                (Target::Account, rest)
            } else {
                (Target::Account, token)
            };
            let pattern = Regex::new(pattern).map_err(|e| EvalError::Parse {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
            terms.push(Term { target, pattern, negated: negate_next });
            negate_next = false;
        }
        if terms.is_empty() {
            return Err(EvalError::Parse {
                expr: expr.to_string(),
                reason: "empty query".to_string(),
            });
        }
        Ok(Self { terms })
    }
}

impl Predicate for BasicQuery {
    fn test(&self, pool: &PostPool<'_>, post: PostId) -> Result<bool, EvalError> {
        for term in &self.terms {
            let text = match term.target {
                Target::Account => pool.posting(post).account.borrow().fullname_immutable(),
                Target::Payee => pool.payee(post),
                Target::Code => pool.entry(post).code.clone().unwrap_or_default(),
            };
            if term.pattern.is_match(&text) == term.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// The built-in sort keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicKey {
    /// Effective date, as a day-count value
    Date,
    /// Effective amount
    Amount,
    /// Running-total snapshot
    Total,
}

impl BasicKey {
    /// Parse a register-style sort-key shorthand
    pub fn parse(expr: &str) -> Result<Self, EvalError> {
        match expr.trim() {
            "d" | "date" => Ok(BasicKey::Date),
            "t" | "amount" => Ok(BasicKey::Amount),
            "T" | "total" => Ok(BasicKey::Total),
            other => Err(EvalError::Parse {
                expr: other.to_string(),
                reason: "expected one of: d, date, t, amount, T, total".to_string(),
            }),
        }
    }
}

fn date_value(date: chrono::NaiveDate) -> Value {
    Value::from(Amount::from_i64(date.num_days_from_ce() as i64))
}

impl SortKey for BasicKey {
    fn post_key(&self, pool: &PostPool<'_>, post: PostId) -> Result<Value, EvalError> {
        Ok(match self {
            BasicKey::Date => date_value(pool.effective_date(post)),
            BasicKey::Amount => Value::from(pool.amount(post)),
            BasicKey::Total => pool.xdata(post).total.clone(),
        })
    }

    fn entry_key(&self, pool: &PostPool<'_>, post: PostId) -> Result<Value, EvalError> {
        match self {
            BasicKey::Date => Ok(date_value(pool.entry(post).date)),
            BasicKey::Amount => {
                let mut total = Value::Null;
                for posting in &pool.entry(post).postings {
                    total.add_amount(&posting.amount);
                }
                Ok(total)
            }
            BasicKey::Total => {
                Err(EvalError::Runtime("total is not defined on an entry".to_string()))
            }
        }
    }

    fn account_key(&self, pool: &PostPool<'_>, account: &AccountRef) -> Result<Value, EvalError> {
        match self {
            BasicKey::Date => Err(EvalError::Runtime("date is not defined on an account".into())),
            BasicKey::Amount => {
                Ok(pool.account_xdata_of(account).map(|x| x.value.clone()).unwrap_or_default())
            }
            BasicKey::Total => {
                Ok(pool.account_xdata_of(account).map(|x| x.total.clone()).unwrap_or_default())
            }
        }
    }
}

/// The built-in expression compiler
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicCompiler;

impl ExprCompiler for BasicCompiler {
    fn predicate(&self, expr: &str) -> Result<Box<dyn Predicate>, EvalError> {
        Ok(Box::new(BasicQuery::parse(expr)?))
    }

    fn sort_key(&self, expr: &str) -> Result<Box<dyn SortKey>, EvalError> {
        Ok(Box::new(BasicKey::parse(expr)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::entry::Entry;
    use crate::journal::Session;
    use crate::posting::Posting;

    fn sample() -> Session {
        let mut session = Session::new();
        let mut entry = Entry::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), "Grocer");
        entry.code = Some("42".to_string());
        entry.add_posting(Posting::new(
            session.account("Expenses:Food"),
            "10 USD".parse().unwrap(),
        ));
        entry.add_posting(Posting::new(session.account("Assets:Cash"), "-10 USD".parse().unwrap()));
        session.add_entry(entry).unwrap();
        session
    }

    #[test]
    fn test_account_term_matches() {
        let session = sample();
        let mut pool = PostPool::new(&session);
        let posts = pool.session_posts();
        let query = BasicQuery::parse("Food").unwrap();
        assert!(query.test(&pool, posts[0]).unwrap());
        assert!(!query.test(&pool, posts[1]).unwrap());
    }

    #[test]
    fn test_payee_and_code_terms() {
        let session = sample();
        let mut pool = PostPool::new(&session);
        let posts = pool.session_posts();
        assert!(BasicQuery::parse("payee:Groc").unwrap().test(&pool, posts[1]).unwrap());
        assert!(BasicQuery::parse("code:^42$").unwrap().test(&pool, posts[0]).unwrap());
        assert!(!BasicQuery::parse("code:^7$").unwrap().test(&pool, posts[0]).unwrap());
    }

    #[test]
    fn test_negation_and_conjunction() {
        let session = sample();
        let mut pool = PostPool::new(&session);
        let posts = pool.session_posts();
        let query = BasicQuery::parse("Expenses not Cash").unwrap();
        assert!(query.test(&pool, posts[0]).unwrap());
        let none = BasicQuery::parse("Expenses not Food").unwrap();
        assert!(!none.test(&pool, posts[0]).unwrap());
    }

    #[test]
    fn test_bad_regex_is_a_parse_error() {
        assert!(matches!(BasicQuery::parse("("), Err(EvalError::Parse { .. })));
        assert!(matches!(BasicQuery::parse("   "), Err(EvalError::Parse { .. })));
    }

    #[test]
    fn test_date_keys_order_like_dates() {
        let session = sample();
        let mut pool = PostPool::new(&session);
        let posts = pool.session_posts();
        let key = BasicKey::Date.post_key(&pool, posts[0]).unwrap();
        let earlier = date_value(NaiveDate::from_ymd_opt(2019, 12, 31).unwrap());
        assert_eq!(earlier.sort_cmp(&key), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_amount_key() {
        let session = sample();
        let mut pool = PostPool::new(&session);
        let posts = pool.session_posts();
        let a = BasicKey::Amount.post_key(&pool, posts[1]).unwrap();
        let b = BasicKey::Amount.post_key(&pool, posts[0]).unwrap();
        assert_eq!(a.sort_cmp(&b), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_unknown_sort_key() {
        assert!(matches!(BasicKey::parse("payee"), Err(EvalError::Parse { .. })));
    }
}
