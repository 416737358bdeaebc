//! Market revaluation stage
//!
//! Between consecutive postings, a price change moves the market value
//! of whatever the running total holds without any posting explaining
//! the jump. This stage fills the gap: for every price-change date
//! falling strictly between two postings it emits a synthetic posting
//! against a `<Revalued>` placeholder carrying the delta, dated at the
//! price change. On flush a closing delta brings the valuation up to
//! the report clock.

use std::rc::Rc;

use chrono::NaiveDate;

use crate::account::{Account, AccountRef};
use crate::entry::{Entry, EntryFlags};
use crate::pipeline::{PostHandler, PostId, PostPool, ReportResult};
use crate::posting::Posting;
use crate::prices::{market_value, PriceSource};
use tally_math::Value;

/// Emits `<Revalued>` postings for market-value changes of the held
/// total; with `show_revalued_only` the original postings are dropped
/// and only the revaluations come out
pub struct ChangedValuePosts {
    next: Box<dyn PostHandler>,
    prices: Rc<dyn PriceSource>,
    only: bool,
    now: NaiveDate,
    held: Value,
    last_date: Option<NaiveDate>,
    last_value: Value,
    account: AccountRef,
    flushed: bool,
}

impl ChangedValuePosts {
    /// Wrap `next`, valuing against `prices`; `now` dates the closing
    /// revaluation
    pub fn new(
        next: Box<dyn PostHandler>,
        prices: Rc<dyn PriceSource>,
        only: bool,
        now: NaiveDate,
    ) -> Self {
        Self {
            next,
            prices,
            only,
            now,
            held: Value::Null,
            last_date: None,
            last_value: Value::Null,
            account: Account::temp("<Revalued>"),
            flushed: false,
        }
    }

    fn emit_delta(&mut self, pool: &mut PostPool<'_>, date: NaiveDate, delta: Value) -> ReportResult<()> {
        let mut entry = Entry::new(date, "Commodities revalued");
        entry.flags.insert(EntryFlags::GENERATED);
        for amount in delta.amounts() {
            entry.add_posting(Posting::new(self.account.clone(), amount));
        }
        let ids = pool.add_synthetic(entry);
        for id in ids {
            self.next.accept(pool, id)?;
        }
        Ok(())
    }

    /// Replay price changes in `(last_date, upto]`, emitting one delta
    /// per change date
    fn revalue_to(&mut self, pool: &mut PostPool<'_>, upto: NaiveDate) -> ReportResult<()> {
        let Some(last) = self.last_date else { return Ok(()) };
        let mut dates: Vec<NaiveDate> = Vec::new();
        for amount in self.held.amounts() {
            if let Some(commodity) = amount.commodity() {
                for (date, _) in self.prices.changes_between(commodity, last, upto) {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        dates.dedup();
        for date in dates {
            let revalued = market_value(self.prices.as_ref(), &self.held, date);
            let delta = revalued.sub(&self.last_value).simplified();
            if !delta.is_zero() {
                self.emit_delta(pool, date, delta)?;
            }
            self.last_value = revalued;
        }
        Ok(())
    }
}

impl PostHandler for ChangedValuePosts {
    fn accept(&mut self, pool: &mut PostPool<'_>, post: PostId) -> ReportResult<()> {
        let date = pool.effective_date(post);
        if let Some(upto) = date.pred_opt() {
            self.revalue_to(pool, upto)?;
        }
        if !self.only {
            self.next.accept(pool, post)?;
        }
        let amount = pool.amount(post);
        self.held.add_amount(&amount);
        self.last_date = Some(date);
        self.last_value = market_value(self.prices.as_ref(), &self.held, date);
        Ok(())
    }

    fn flush(&mut self, pool: &mut PostPool<'_>) -> ReportResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.revalue_to(pool, self.now)?;
        self.next.flush(pool)
    }
}
