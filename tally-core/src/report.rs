//! Report assembly and execution
//!
//! [`ReportOptions`] is the full configuration surface recognized by
//! the chain builder; [`Report`] turns it into a handler chain in the
//! canonical order and drives postings or accounts through it. The
//! order of stages is part of the public semantics: moving the display
//! filter ahead of the running-total stage, say, would change what the
//! totals mean.

use std::rc::Rc;

use chrono::{NaiveDate, Weekday};
use log::debug;
use serde::{Deserialize, Serialize};
use tally_math::{Amount, Value};

use crate::account::AccountRef;
use crate::entry::Entry;
use crate::expr::{BasicCompiler, BasicKey, ExprCompiler, Predicate, SortKey};
use crate::interval::parse_period;
use crate::journal::Session;
use crate::pipeline::components::ComponentPosts;
use crate::pipeline::filters::{
    FilterPosts, InvertPosts, RelatedPosts, SetCodeAsPayee, SetCommAsPayee, TruncateEntries,
};
use crate::pipeline::reconcile::ReconcilePosts;
use crate::pipeline::revalue::ChangedValuePosts;
use crate::pipeline::sort::{SortEntries, SortPosts};
use crate::pipeline::totals::{
    ByPayeePosts, CalcPosts, CollapsePosts, DowPosts, IntervalPosts, SubtotalPosts,
};
use crate::pipeline::{
    pass_down_accounts, pass_down_posts, AccountHandler, PostHandler, PostId, PostPool,
    ReportError, ReportResult,
};
use crate::prices::{MemoryPrices, PriceSource};

/// Configuration recognized by the chain builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Primary filter expression, applied before anything accumulates
    pub predicate: Option<String>,
    /// Display filter, applied after the running total
    pub display_predicate: Option<String>,
    /// Secondary filter, applied after component expansion
    pub secondary_predicate: Option<String>,
    /// Sort key expression
    pub sort_string: Option<String>,
    /// Sort whole entries rather than individual postings
    pub entry_sort: bool,
    /// Keep only this many leading entries (0 = no head limit)
    pub head_entries: usize,
    /// Keep only this many trailing entries (0 = no tail limit)
    pub tail_entries: usize,
    /// `;`-separated component-expansion predicates
    pub descend_expr: Option<String>,
    /// Reconciliation target balance, parsed as an amount
    pub reconcile_balance: Option<String>,
    /// Reconciliation cutoff; defaults to `now`
    pub reconcile_date: Option<NaiveDate>,
    /// Emit market revaluation postings
    pub show_revalued: bool,
    /// Emit only the revaluation postings
    pub show_revalued_only: bool,
    /// Collapse multi-posting entries into per-commodity totals
    pub show_collapsed: bool,
    /// Combine everything into one subtotal entry
    pub show_subtotal: bool,
    /// Bucket by weekday
    pub days_of_the_week: bool,
    /// Bucket by payee
    pub by_payee: bool,
    /// Bucket by a recurring period expression
    pub report_period: Option<String>,
    /// Emit interior empty period buckets
    pub show_empty_periods: bool,
    /// Negate every amount
    pub show_inverted: bool,
    /// Expand to related postings
    pub show_related: bool,
    /// Expand to all postings of related entries
    pub show_all_related: bool,
    /// Use the commodity symbol as the payee
    pub comm_as_payee: bool,
    /// Use the entry code as the payee
    pub code_as_payee: bool,
    /// The report clock: default reconcile cutoff and closing
    /// revaluation date
    pub now: NaiveDate,
    /// First day of the week for weekday bucketing
    pub start_of_week: Weekday,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            predicate: None,
            display_predicate: None,
            secondary_predicate: None,
            sort_string: None,
            entry_sort: false,
            head_entries: 0,
            tail_entries: 0,
            descend_expr: None,
            reconcile_balance: None,
            reconcile_date: None,
            show_revalued: false,
            show_revalued_only: false,
            show_collapsed: false,
            show_subtotal: false,
            days_of_the_week: false,
            by_payee: false,
            report_period: None,
            show_empty_periods: false,
            show_inverted: false,
            show_related: false,
            show_all_related: false,
            comm_as_payee: false,
            code_as_payee: false,
            now: chrono::Local::now().date_naive(),
            start_of_week: Weekday::Sun,
        }
    }
}

/// Terminal handler of the account-aggregation pass: folds each
/// posting's effective amount into its account's scratch value
pub struct SetAccountValue;

impl PostHandler for SetAccountValue {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let amount = pool.amount(post);
        let account = pool.posting(post).account.clone();
        let xdata = pool.account_xdata_mut(&account);
        xdata.value.add_amount(&amount);
        xdata.count += 1;
        Ok(())
    }

    fn flush(&mut self, _pool: &mut PostPool<'_>) -> ReportResult<()> {
        Ok(())
    }
}

/// A configured report, ready to build chains and run passes
pub struct Report {
    /// The report's configuration
    pub options: ReportOptions,
    compiler: Box<dyn ExprCompiler>,
    prices: Rc<dyn PriceSource>,
}

impl Report {
    /// Create a report using the built-in query compiler and an empty
    /// price history
    pub fn new(options: ReportOptions) -> Self {
        Self { options, compiler: Box::new(BasicCompiler), prices: Rc::new(MemoryPrices::new()) }
    }

    /// Replace the expression compiler
    pub fn with_compiler(mut self, compiler: Box<dyn ExprCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Replace the price source
    pub fn with_prices(mut self, prices: Rc<dyn PriceSource>) -> Self {
        self.prices = prices;
        self
    }

    fn compile_predicate(&self, expr: &str) -> ReportResult<Box<dyn Predicate>> {
        self.compiler.predicate(expr).map_err(|e| ReportError::Configuration(e.to_string()))
    }

    fn compile_sort_key(&self, expr: &str) -> ReportResult<Box<dyn SortKey>> {
        self.compiler.sort_key(expr).map_err(|e| ReportError::Configuration(e.to_string()))
    }

    /// Assemble the handler chain around `base`, the terminal renderer.
    ///
    /// Wrapping starts at the base, so the first stage installed is the
    /// last to see each posting; at runtime postings flow through the
    /// stages in reverse order of installation. With
    /// `handle_individual` false only the scope-defining outer stages
    /// (invert, related, primary filter, payee override) are applied,
    /// which is what the account-aggregation pass wants.
    pub fn chain_post_handlers(
        &self,
        base: Box<dyn PostHandler>,
        handle_individual: bool,
    ) -> ReportResult<Box<dyn PostHandler>> {
        let opts = &self.options;
        if opts.comm_as_payee && opts.code_as_payee {
            return Err(ReportError::Configuration(
                "comm_as_payee and code_as_payee are mutually exclusive".to_string(),
            ));
        }

        let mut handler = base;
        let mut remember_components = false;

        if handle_individual {
            // entry truncation limits display without affecting
            // calculation, so it sits right next to the renderer
            if opts.head_entries > 0 || opts.tail_entries > 0 {
                handler =
                    Box::new(TruncateEntries::new(handler, opts.head_entries, opts.tail_entries));
            }

            // the display filter runs after calc: dropped postings
            // still contribute to the running total
            if let Some(expr) = &opts.display_predicate {
                handler = Box::new(FilterPosts::new(handler, self.compile_predicate(expr)?, expr));
            }

            handler = Box::new(CalcPosts::new(handler));

            if let Some(descend) = &opts.descend_expr {
                let exprs: Vec<&str> =
                    descend.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
                if exprs.is_empty() {
                    return Err(ReportError::Configuration(
                        "descend_expr holds no expressions".to_string(),
                    ));
                }
                for expr in exprs.iter().rev() {
                    handler =
                        Box::new(ComponentPosts::new(handler, self.compile_predicate(expr)?, expr));
                }
                remember_components = true;
            }

            if let Some(balance) = &opts.reconcile_balance {
                let target: Amount = balance.parse().map_err(|e| {
                    ReportError::Configuration(format!("invalid reconcile balance `{balance}`: {e}"))
                })?;
                let cutoff = opts.reconcile_date.unwrap_or(opts.now);
                handler = Box::new(ReconcilePosts::new(handler, Value::from(target), cutoff));
            }

            if let Some(expr) = &opts.secondary_predicate {
                handler = Box::new(FilterPosts::new(handler, self.compile_predicate(expr)?, expr));
            }

            if let Some(expr) = &opts.sort_string {
                let key = self.compile_sort_key(expr)?;
                handler = if opts.entry_sort {
                    Box::new(SortEntries::new(handler, key, expr))
                } else {
                    Box::new(SortPosts::new(handler, key, expr))
                };
            }

            if opts.show_revalued {
                handler = Box::new(ChangedValuePosts::new(
                    handler,
                    self.prices.clone(),
                    opts.show_revalued_only,
                    opts.now,
                ));
            }

            if opts.show_collapsed {
                handler = Box::new(CollapsePosts::new(handler));
            }

            if opts.show_subtotal {
                handler = Box::new(SubtotalPosts::new(handler, remember_components));
            }

            if opts.days_of_the_week {
                handler = Box::new(DowPosts::new(handler, remember_components, opts.start_of_week));
            } else if opts.by_payee {
                handler = Box::new(ByPayeePosts::new(handler, remember_components));
            }

            if let Some(period) = &opts.report_period {
                let interval = parse_period(period).map_err(|e| {
                    ReportError::Configuration(format!("invalid report period `{period}`: {e}"))
                })?;
                handler = Box::new(IntervalPosts::new(
                    handler,
                    interval,
                    remember_components,
                    opts.show_empty_periods,
                    opts.start_of_week,
                ));
                // period bucketing assumes date order; feed it through
                // a date sort
                handler = Box::new(SortPosts::new(handler, Box::new(BasicKey::Date), "d"));
            }
        }

        if opts.show_inverted {
            handler = Box::new(InvertPosts::new(handler));
        }

        if opts.show_related || opts.show_all_related {
            handler = Box::new(RelatedPosts::new(handler, opts.show_all_related));
        }

        if let Some(expr) = &opts.predicate {
            handler = Box::new(FilterPosts::new(handler, self.compile_predicate(expr)?, expr));
        }

        if opts.comm_as_payee {
            handler = Box::new(SetCommAsPayee::new(handler));
        } else if opts.code_as_payee {
            handler = Box::new(SetCodeAsPayee::new(handler));
        }

        debug!("report chain assembled (handle_individual={handle_individual})");
        Ok(handler)
    }

    /// Run a per-posting report over the whole session
    pub fn posting_report(
        &self,
        session: &Session,
        base: Box<dyn PostHandler>,
    ) -> ReportResult<()> {
        let mut chain = self.chain_post_handlers(base, true)?;
        verify_session(session)?;
        let mut pool = PostPool::new(session);
        let posts = pool.session_posts();
        pass_down_posts(chain.as_mut(), &mut pool, posts)
    }

    /// Run a per-posting report over a single entry
    pub fn entry_report<'j>(
        &self,
        session: &'j Session,
        entry: &'j Entry,
        base: Box<dyn PostHandler>,
    ) -> ReportResult<()> {
        let mut chain = self.chain_post_handlers(base, true)?;
        verify_entry(entry)?;
        let mut pool = PostPool::new(session);
        let posts = pool.entry_posts(entry);
        pass_down_posts(chain.as_mut(), &mut pool, posts)
    }

    /// Phase 1 and 2 of the account pass: drive the scope-defining
    /// stages into [`SetAccountValue`], then fold child totals upward
    pub fn sum_all_accounts(&self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        let mut chain = self.chain_post_handlers(Box::new(SetAccountValue), false)?;
        let posts = pool.session_posts();
        pass_down_posts(chain.as_mut(), pool, posts)?;
        let master = pool.master();
        sum_accounts(pool, &master);
        Ok(())
    }

    /// Run an account report: aggregate, then walk the tree (naturally
    /// or sorted by the configured key) into `handler`. Returns the
    /// root's grand total when `print_final_total` is set.
    pub fn account_report(
        &self,
        session: &Session,
        handler: &mut dyn AccountHandler,
        print_final_total: bool,
    ) -> ReportResult<Option<Value>> {
        verify_session(session)?;
        let mut pool = PostPool::new(session);
        self.sum_all_accounts(&mut pool)?;

        let sort = match &self.options.sort_string {
            Some(expr) => Some(self.compile_sort_key(expr)?),
            None => None,
        };
        let master = pool.master();
        let mut ordered = Vec::new();
        self.ordered_accounts(&pool, &master, sort.as_deref(), &mut ordered)?;
        pass_down_accounts(handler, &pool, ordered)?;

        Ok(if print_final_total {
            pool.account_xdata_of(&master).map(|xdata| xdata.total.clone())
        } else {
            None
        })
    }

    fn ordered_accounts(
        &self,
        pool: &PostPool<'_>,
        account: &AccountRef,
        sort: Option<&dyn SortKey>,
        out: &mut Vec<AccountRef>,
    ) -> ReportResult<()> {
        let mut children = account.borrow().child_accounts();
        if let Some(key) = sort {
            let mut keyed = Vec::with_capacity(children.len());
            for child in children {
                let value = key.account_key(pool, &child).map_err(|e| {
                    ReportError::Evaluation {
                        expr: self.options.sort_string.clone().unwrap_or_default(),
                        post: child.borrow().fullname_immutable(),
                        reason: e.to_string(),
                    }
                })?;
                keyed.push((value, child));
            }
            keyed.sort_by(|a, b| a.0.sort_cmp(&b.0));
            children = keyed.into_iter().map(|(_, child)| child).collect();
        }
        for child in children {
            out.push(child.clone());
            self.ordered_accounts(pool, &child, sort, out)?;
        }
        Ok(())
    }
}

// An entry that stopped balancing after journal insertion is a bug
// somewhere upstream, not a reportable condition.
fn verify_session(session: &Session) -> ReportResult<()> {
    for journal in &session.journals {
        for entry in &journal.entries {
            verify_entry(entry)?;
        }
    }
    Ok(())
}

fn verify_entry(entry: &Entry) -> ReportResult<()> {
    if entry.is_generated() {
        return Ok(());
    }
    entry.verify_balance().map_err(|e| ReportError::InvariantViolation(e.to_string()))
}

/// Phase 2 of the account pass: set each account's total to its own
/// value plus the recursively summed totals of its children
fn sum_accounts(pool: &mut PostPool<'_>, account: &AccountRef) -> Value {
    let children = account.borrow().child_accounts();
    let mut total = pool.account_xdata_of(account).map(|x| x.value.clone()).unwrap_or_default();
    for child in &children {
        let child_total = sum_accounts(pool, child);
        total = total.add(&child_total);
    }
    pool.account_xdata_mut(account).total = total.clone();
    total
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::pipeline::Collector;
    use crate::posting::Posting;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn sample_session() -> Session {
        let mut session = Session::new();
        for (day, amount, from, to) in [
            (1, 10i64, "Expenses:Food", "Assets:Cash"),
            (2, 5, "Expenses:Rent", "Assets:Cash"),
            (3, 2, "Expenses:Food", "Assets:Bank"),
        ] {
            let mut entry = Entry::new(date(day), "e");
            entry.add_posting(Posting::new(
                session.account(from),
                format!("{} USD", amount).parse().unwrap(),
            ));
            entry.add_posting(Posting::new(
                session.account(to),
                format!("{} USD", -amount).parse().unwrap(),
            ));
            session.add_entry(entry).unwrap();
        }
        session
    }

    struct AccountCollector {
        rows: Rc<RefCell<Vec<(String, Value)>>>,
    }

    impl AccountHandler for AccountCollector {
        fn accept(&mut self, pool: &PostPool<'_>, account: &AccountRef) -> ReportResult<()> {
            let total =
                pool.account_xdata_of(account).map(|x| x.total.clone()).unwrap_or_default();
            self.rows.borrow_mut().push((account.borrow().fullname_immutable(), total));
            Ok(())
        }

        fn flush(&mut self, _pool: &PostPool<'_>) -> ReportResult<()> {
            Ok(())
        }
    }

    fn usd(q: i64) -> Value {
        Value::from(format!("{} USD", q).parse::<Amount>().unwrap())
    }

    #[test]
    fn test_conflicting_payee_overrides_are_rejected() {
        let mut options = ReportOptions::default();
        options.comm_as_payee = true;
        options.code_as_payee = true;
        let report = Report::new(options);
        let base = Box::new(Collector::new(Rc::new(RefCell::new(Vec::new()))));
        assert!(matches!(
            report.chain_post_handlers(base, true),
            Err(ReportError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_expressions_fail_before_any_posting_flows() {
        let session = sample_session();
        let mut options = ReportOptions::default();
        options.predicate = Some("(".to_string());
        let report = Report::new(options);
        let out = Rc::new(RefCell::new(Vec::new()));
        let result = report.posting_report(&session, Box::new(Collector::new(out.clone())));
        assert!(matches!(result, Err(ReportError::Configuration(_))));
        assert!(out.borrow().is_empty());

        let mut options = ReportOptions::default();
        options.report_period = Some("sometimes".to_string());
        let report = Report::new(options);
        assert!(matches!(
            report.posting_report(&session, Box::new(Collector::new(Rc::new(RefCell::new(Vec::new()))))),
            Err(ReportError::Configuration(_))
        ));
    }

    #[test]
    fn test_account_report_totals_roll_up() {
        let session = sample_session();
        let report = Report::new(ReportOptions::default());
        let rows = Rc::new(RefCell::new(Vec::new()));
        let mut handler = AccountCollector { rows: rows.clone() };
        let grand = report.account_report(&session, &mut handler, true).unwrap();

        let rows = rows.borrow();
        let get = |name: &str| {
            rows.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone()).unwrap()
        };
        assert_eq!(get("Expenses"), usd(17));
        assert_eq!(get("Expenses:Food"), usd(12));
        assert_eq!(get("Expenses:Rent"), usd(5));
        assert_eq!(get("Assets"), usd(-17));
        assert_eq!(get("Assets:Cash"), usd(-15));
        // every posting balances, so the grand total nets to zero
        assert!(grand.unwrap().is_zero());
    }

    #[test]
    fn test_account_report_respects_primary_predicate() {
        let session = sample_session();
        let mut options = ReportOptions::default();
        options.predicate = Some("Expenses".to_string());
        let report = Report::new(options);
        let rows = Rc::new(RefCell::new(Vec::new()));
        let mut handler = AccountCollector { rows: rows.clone() };
        let grand = report.account_report(&session, &mut handler, true).unwrap();
        assert_eq!(grand.unwrap(), usd(17));
        let rows = rows.borrow();
        let assets = rows.iter().find(|(n, _)| n == "Assets").map(|(_, v)| v.clone()).unwrap();
        assert!(assets.is_null());
    }

    #[test]
    fn test_accounts_walk_in_tree_order() {
        let session = sample_session();
        let report = Report::new(ReportOptions::default());
        let rows = Rc::new(RefCell::new(Vec::new()));
        let mut handler = AccountCollector { rows: rows.clone() };
        report.account_report(&session, &mut handler, false).unwrap();
        let names: Vec<String> = rows.borrow().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(
            names,
            vec![
                "Expenses",
                "Expenses:Food",
                "Expenses:Rent",
                "Assets",
                "Assets:Cash",
                "Assets:Bank",
            ]
        );
    }

    #[test]
    fn test_accounts_sorted_by_total() {
        let session = sample_session();
        let mut options = ReportOptions::default();
        options.sort_string = Some("T".to_string());
        let report = Report::new(options);
        let rows = Rc::new(RefCell::new(Vec::new()));
        let mut handler = AccountCollector { rows: rows.clone() };
        report.account_report(&session, &mut handler, false).unwrap();
        let names: Vec<String> = rows.borrow().iter().map(|(n, _)| n.clone()).collect();
        // ascending by total: Assets (-17) first, Expenses (17) last
        assert_eq!(names[0], "Assets");
        assert_eq!(names[1], "Assets:Cash");
        assert_eq!(names[2], "Assets:Bank");
        assert_eq!(names[3], "Expenses");
    }
}
