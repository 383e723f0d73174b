//! Budget consumption and category spend breakdowns.
//!
//! An installment purchase is one spending decision: its first installment
//! carries the whole series total into its own period and later installments
//! count nothing, whatever happens to them afterwards (anticipation included).

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Budget, Movement, MovementKind, SeriesSlot};
use crate::period::Period;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpend {
    /// Absolute amount consumed.
    pub spent: Decimal,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetView {
    pub id: Uuid,
    pub category: Uuid,
    pub period: Period,
    pub limit_amount: Decimal,
    pub spent_amount: Decimal,
}

impl BudgetView {
    pub fn remaining(&self) -> Decimal {
        self.limit_amount - self.spent_amount
    }

    pub fn is_over_limit(&self) -> bool {
        self.spent_amount > self.limit_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: Uuid,
    pub total: Decimal,
    /// Share of the overall total, in percent.
    pub share: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    /// Largest total first.
    pub categories: Vec<CategoryShare>,
    pub total: Decimal,
    pub skipped_rows: usize,
}

pub struct BudgetCalculator<'a> {
    config: &'a EngineConfig,
}

impl<'a> BudgetCalculator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn spend(&self, category: Uuid, period: Period, movements: &[Movement]) -> BudgetSpend {
        let mut out = BudgetSpend::default();
        let mut signed = Decimal::ZERO;
        for m in movements {
            if m.kind != MovementKind::Expense
                || m.category != Some(category)
                || m.period != period
                || self.is_marker(m)
            {
                continue;
            }
            match contribution(m) {
                Some(value) => signed += value,
                None => out.skipped_rows += 1,
            }
        }
        out.spent = signed.abs();
        if out.skipped_rows > 0 {
            tracing::warn!(%category, %period, skipped_rows = out.skipped_rows, "skipped malformed rows in budget spend");
        }
        out
    }

    /// One view per budget of `period`, ordered by category id.
    pub fn views(
        &self,
        budgets: &[Budget],
        period: Period,
        movements: &[Movement],
    ) -> (Vec<BudgetView>, usize) {
        let mut skipped_rows = 0usize;
        let mut views: Vec<BudgetView> = budgets
            .iter()
            .filter(|b| b.period == period)
            .map(|b| {
                let spend = self.spend(b.category, period, movements);
                skipped_rows += spend.skipped_rows;
                BudgetView {
                    id: b.id,
                    category: b.category,
                    period,
                    limit_amount: b.limit_amount,
                    spent_amount: spend.spent,
                }
            })
            .collect();
        views.sort_by_key(|v| (v.category, v.id));
        (views, skipped_rows)
    }

    /// Expense totals per category for purchases made between `from` and `to`
    /// (inclusive), counted at face value of each movement.
    pub fn breakdown_by_purchase_date(
        &self,
        movements: &[Movement],
        from: NaiveDate,
        to: NaiveDate,
    ) -> CategoryBreakdown {
        let mut skipped_rows = 0usize;
        let mut per_category: HashMap<Uuid, Decimal> = HashMap::new();
        for m in movements {
            if m.kind != MovementKind::Expense
                || !m.is_admin_scoped()
                || m.purchase_date < from
                || m.purchase_date > to
                || self.config.is_invoice_payment(m)
            {
                continue;
            }
            let Some(category) = m.category else {
                continue;
            };
            match m.amount {
                Some(amount) => *per_category.entry(category).or_insert(Decimal::ZERO) += amount,
                None => skipped_rows += 1,
            }
        }

        let mut categories: Vec<(Uuid, Decimal)> = per_category
            .into_iter()
            .map(|(category, total)| (category, total.abs()))
            .filter(|(_, total)| !total.is_zero())
            .collect();
        let total: Decimal = categories.iter().map(|(_, t)| *t).sum();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let hundred = Decimal::ONE_HUNDRED;
        CategoryBreakdown {
            categories: categories
                .into_iter()
                .map(|(category, amount)| CategoryShare {
                    category,
                    total: amount,
                    share: if total.is_zero() {
                        Decimal::ZERO
                    } else {
                        amount / total * hundred
                    },
                })
                .collect(),
            total,
            skipped_rows,
        }
    }

    fn is_marker(&self, m: &Movement) -> bool {
        self.config.is_opening_balance(m) || self.config.is_invoice_payment(m)
    }
}

/// Signed budget contribution of one expense row, or `None` when it can't be
/// read.
fn contribution(m: &Movement) -> Option<Decimal> {
    let amount = m.amount?;
    match m.series_slot() {
        SeriesSlot::Single => Some(amount),
        SeriesSlot::Installment { index: 1, count } => Some(amount * Decimal::from(count)),
        SeriesSlot::Installment { .. } => Some(Decimal::ZERO),
        SeriesSlot::Malformed => None,
    }
}

/// Budget consumption of `category` in `period` with the default markers.
pub fn compute_budget_spend(category: Uuid, period: Period, movements: &[Movement]) -> Decimal {
    BudgetCalculator::new(&EngineConfig::default())
        .spend(category, period, movements)
        .spent
}
