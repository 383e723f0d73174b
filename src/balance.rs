//! Realized vs. projected account balances and per-period dashboard metrics.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Account, Movement, MovementKind};
use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub id: Uuid,
    /// Initial balance plus every settled movement, as of now.
    pub realized_balance: Decimal,
    /// Initial balance plus every movement up to the target period, settled or not.
    pub projected_balance: Decimal,
    pub exclude_from_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsSnapshot {
    pub period: Period,
    /// Sorted by projected balance, highest first.
    pub per_account: Vec<AccountBalance>,
    pub total_realized: Decimal,
    pub total_projected: Decimal,
    /// Card-only spend folded into `total_projected`; zero unless the target
    /// period is in the future.
    pub card_forecast: Decimal,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPair {
    pub current: Decimal,
    pub previous: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMetrics {
    pub period: Period,
    pub previous_period: Period,
    pub income: MetricPair,
    pub expense: MetricPair,
    pub balance: MetricPair,
    pub card_spend: MetricPair,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct PeriodTotals {
    income: Decimal,
    expense: Decimal,
    card_income: Decimal,
    card_expense: Decimal,
}

impl PeriodTotals {
    fn card_spend(&self) -> Decimal {
        self.card_income.abs() + self.card_expense.abs()
    }
}

pub struct BalanceAggregator<'a> {
    config: &'a EngineConfig,
}

impl<'a> BalanceAggregator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Builds the accounts snapshot for `target` as seen on `today`.
    ///
    /// `card_only_expenses` may be the full movement list: only admin-scoped
    /// expenses on a card without an account, up to `target` and not marked as
    /// invoice payments, are taken from it.
    pub fn snapshot(
        &self,
        accounts: &[Account],
        movements: &[Movement],
        card_only_expenses: &[Movement],
        target: Period,
        today: NaiveDate,
    ) -> AccountsSnapshot {
        self.snapshot_with_skipped(accounts, movements, card_only_expenses, target, today)
            .0
    }

    /// Same as [`BalanceAggregator::snapshot`], also returning the ids of the
    /// skipped accounts and movements.
    fn snapshot_with_skipped(
        &self,
        accounts: &[Account],
        movements: &[Movement],
        card_only_expenses: &[Movement],
        target: Period,
        today: NaiveDate,
    ) -> (AccountsSnapshot, HashSet<Uuid>) {
        let mut skipped: HashSet<Uuid> = HashSet::new();
        let mut settled: HashMap<Uuid, Decimal> = HashMap::new();
        let mut up_to_target: HashMap<Uuid, Decimal> = HashMap::new();
        let known: HashSet<Uuid> = accounts.iter().map(|a| a.id).collect();

        for m in movements {
            let Some(account) = m.account else {
                continue;
            };
            if !known.contains(&account) || !self.counts_toward_balance(m) {
                continue;
            }
            let Some(amount) = m.amount else {
                skipped.insert(m.id);
                continue;
            };
            if m.settled {
                *settled.entry(account).or_insert(Decimal::ZERO) += amount;
            }
            if m.period <= target {
                *up_to_target.entry(account).or_insert(Decimal::ZERO) += amount;
            }
        }

        let mut per_account = Vec::with_capacity(accounts.len());
        for account in accounts {
            let initial = match account.initial_balance {
                Some(v) => v,
                None => {
                    skipped.insert(account.id);
                    Decimal::ZERO
                }
            };
            per_account.push(AccountBalance {
                id: account.id,
                realized_balance: initial
                    + settled.get(&account.id).copied().unwrap_or_default(),
                projected_balance: initial
                    + up_to_target.get(&account.id).copied().unwrap_or_default(),
                exclude_from_balance: account.exclude_from_balance,
            });
        }
        per_account.sort_by(|a, b| {
            b.projected_balance
                .cmp(&a.projected_balance)
                .then_with(|| a.id.cmp(&b.id))
        });

        let included = per_account.iter().filter(|a| !a.exclude_from_balance);
        let (total_realized, mut total_projected) = included.fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(realized, projected), a| (realized + a.realized_balance, projected + a.projected_balance),
        );

        let mut card_forecast = Decimal::ZERO;
        if target > Period::containing(today) {
            for m in card_only_expenses {
                if !self.is_card_only_expense(m) || m.period > target {
                    continue;
                }
                match m.amount {
                    Some(amount) => card_forecast += amount,
                    None => {
                        skipped.insert(m.id);
                    }
                }
            }
            total_projected += card_forecast;
        }

        let skipped_rows = skipped.len();
        if skipped_rows > 0 {
            tracing::warn!(period = %target, skipped_rows, "skipped unreadable rows in balance snapshot");
        }
        tracing::debug!(
            period = %target,
            %total_realized,
            %total_projected,
            %card_forecast,
            "computed accounts snapshot"
        );

        let snapshot = AccountsSnapshot {
            period: target,
            per_account,
            total_realized,
            total_projected,
            card_forecast,
            skipped_rows,
        };
        (snapshot, skipped)
    }

    /// Dashboard metrics for `period` and the period before it.
    ///
    /// Income, expense and card spend are accrual figures of each period. The
    /// balance pair is the total projected balance of each period, so it follows
    /// the same derivation as [`BalanceAggregator::snapshot`]. A row skipped by
    /// several of these figures counts once in `skipped_rows`.
    pub fn card_metrics(
        &self,
        accounts: &[Account],
        movements: &[Movement],
        period: Period,
        today: NaiveDate,
    ) -> CardMetrics {
        let previous_period = period.previous();
        let visible: HashSet<Uuid> = accounts
            .iter()
            .filter(|a| !a.exclude_from_balance)
            .map(|a| a.id)
            .collect();

        let mut skipped: HashSet<Uuid> = HashSet::new();
        let mut totals: BTreeMap<Period, PeriodTotals> = BTreeMap::new();
        for m in movements {
            if m.period != period && m.period != previous_period {
                continue;
            }
            if !m.is_admin_scoped()
                || m.kind == MovementKind::Transfer
                || self.config.is_invoice_payment(m)
            {
                continue;
            }
            if let Some(account) = m.account {
                if !visible.contains(&account) {
                    continue;
                }
            }
            let Some(amount) = m.amount else {
                skipped.insert(m.id);
                continue;
            };
            let entry = totals.entry(m.period).or_default();
            match m.kind {
                MovementKind::Income => {
                    entry.income += amount;
                    if m.card.is_some() {
                        entry.card_income += amount;
                    }
                }
                MovementKind::Expense => {
                    entry.expense += amount;
                    if m.card.is_some() {
                        entry.card_expense += amount;
                    }
                }
                MovementKind::Transfer => {}
            }
        }

        let current = totals.get(&period).copied().unwrap_or_default();
        let previous = totals.get(&previous_period).copied().unwrap_or_default();

        let (current_snapshot, current_skipped) =
            self.snapshot_with_skipped(accounts, movements, movements, period, today);
        let (previous_snapshot, previous_skipped) =
            self.snapshot_with_skipped(accounts, movements, movements, previous_period, today);
        skipped.extend(current_skipped);
        skipped.extend(previous_skipped);

        CardMetrics {
            period,
            previous_period,
            income: MetricPair {
                current: current.income,
                previous: previous.income,
            },
            expense: MetricPair {
                current: current.expense.abs(),
                previous: previous.expense.abs(),
            },
            balance: MetricPair {
                current: current_snapshot.total_projected,
                previous: previous_snapshot.total_projected,
            },
            card_spend: MetricPair {
                current: current.card_spend(),
                previous: previous.card_spend(),
            },
            skipped_rows: skipped.len(),
        }
    }

    /// Sum of the movements booked on `account` in exactly `period`, with the
    /// same filters the snapshot applies.
    pub fn net_movements_in_period(
        &self,
        account: Uuid,
        movements: &[Movement],
        period: Period,
    ) -> Decimal {
        movements
            .iter()
            .filter(|m| m.account == Some(account) && m.period == period)
            .filter(|m| self.counts_toward_balance(m))
            .filter_map(|m| m.amount)
            .sum()
    }

    fn counts_toward_balance(&self, m: &Movement) -> bool {
        m.is_admin_scoped() && !self.config.is_opening_balance(m)
    }

    fn is_card_only_expense(&self, m: &Movement) -> bool {
        m.kind == MovementKind::Expense
            && m.card.is_some()
            && m.account.is_none()
            && m.is_admin_scoped()
            && !self.config.is_invoice_payment(m)
    }
}
