use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::period::{CycleDays, Period};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Income,
    Expense,
    Transfer,
}

/// Whether a payer's movements count toward the owning ledger's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerScope {
    Administrative,
    /// A participant of a shared ledger; visible, never aggregated.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayerRef {
    pub id: Uuid,
    pub scope: PayerScope,
}

impl PayerRef {
    pub fn admin(id: Uuid) -> Self {
        Self {
            id,
            scope: PayerScope::Administrative,
        }
    }

    pub fn shared(id: Uuid) -> Self {
        Self {
            id,
            scope: PayerScope::Shared,
        }
    }
}

/// An atomic ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    /// Signed amount: expenses negative, income positive, transfers signed per leg.
    /// `None` when the collaborator could not supply a readable value.
    pub amount: Option<Decimal>,
    pub kind: MovementKind,
    pub purchase_date: NaiveDate,
    pub period: Period,
    pub settled: bool,
    pub account: Option<Uuid>,
    pub card: Option<Uuid>,
    pub category: Option<Uuid>,
    pub payer: Option<PayerRef>,
    pub series: Option<Uuid>,
    pub installment_index: Option<u32>,
    pub installment_count: Option<u32>,
    #[serde(default)]
    pub anticipated: bool,
    pub anticipation: Option<Uuid>,
    pub note: Option<String>,
}

impl Movement {
    /// A pending, unlinked movement dated on the first day of `period`.
    pub fn new(kind: MovementKind, amount: Decimal, period: Period) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount: Some(amount),
            kind,
            purchase_date: period.first_day(),
            period,
            settled: false,
            account: None,
            card: None,
            category: None,
            payer: None,
            series: None,
            installment_index: None,
            installment_count: None,
            anticipated: false,
            anticipation: None,
            note: None,
        }
    }

    pub fn income(amount: Decimal, period: Period) -> Self {
        Self::new(MovementKind::Income, amount, period)
    }

    /// Expenses are stored negative regardless of the sign passed in.
    pub fn expense(amount: Decimal, period: Period) -> Self {
        Self::new(MovementKind::Expense, -amount.abs(), period)
    }

    pub fn transfer(amount: Decimal, period: Period) -> Self {
        Self::new(MovementKind::Transfer, amount, period)
    }

    pub fn purchased_on(mut self, date: NaiveDate) -> Self {
        self.purchase_date = date;
        self
    }

    pub fn on_account(mut self, account: Uuid) -> Self {
        self.account = Some(account);
        self
    }

    pub fn on_card(mut self, card: Uuid) -> Self {
        self.card = Some(card);
        self
    }

    pub fn in_category(mut self, category: Uuid) -> Self {
        self.category = Some(category);
        self
    }

    pub fn paid_by(mut self, payer: PayerRef) -> Self {
        self.payer = Some(payer);
        self
    }

    pub fn settled(mut self) -> Self {
        self.settled = true;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Splits this movement into `count` installments of the same amount, one per
    /// month starting at its own period, sharing a fresh series id.
    pub fn into_installments(self, count: u32) -> Vec<Movement> {
        let series = Uuid::new_v4();
        (1..=count)
            .map(|index| {
                let offset = i32::try_from(index - 1).unwrap_or(i32::MAX);
                Movement {
                    id: Uuid::new_v4(),
                    period: self.period.offset(offset),
                    series: Some(series),
                    installment_index: Some(index),
                    installment_count: Some(count),
                    ..self.clone()
                }
            })
            .collect()
    }

    pub fn is_admin_scoped(&self) -> bool {
        matches!(
            self.payer,
            Some(PayerRef {
                scope: PayerScope::Administrative,
                ..
            })
        )
    }

    /// Position of this movement within an installment purchase.
    pub fn series_slot(&self) -> SeriesSlot {
        match (self.installment_index, self.installment_count) {
            (_, None) => SeriesSlot::Single,
            (Some(index), Some(count)) if (1..=count).contains(&index) => {
                SeriesSlot::Installment { index, count }
            }
            _ => SeriesSlot::Malformed,
        }
    }

    /// `None` for movements outside any series.
    pub fn installment_state(&self) -> Option<InstallmentState> {
        self.series?;
        Some(if self.anticipated {
            InstallmentState::Anticipated
        } else if self.settled {
            InstallmentState::Settled
        } else {
            InstallmentState::Pending
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesSlot {
    Single,
    Installment { index: u32, count: u32 },
    /// A count without a usable index, or an index outside `1..=count`.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentState {
    Pending,
    /// Paid individually when its own period came due.
    Settled,
    /// Folded into a bulk early settlement.
    Anticipated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub initial_balance: Option<Decimal>,
    /// Hidden accounts never contribute to totals.
    #[serde(default)]
    pub exclude_from_balance: bool,
}

impl Account {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            initial_balance: Some(initial_balance),
            exclude_from_balance: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.exclude_from_balance = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub cycle: CycleDays,
    pub limit: Option<Decimal>,
}

impl Card {
    pub fn new(closing_day: u32, due_day: u32) -> EngineResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            cycle: CycleDays::new(closing_day, due_day)?,
            limit: None,
        })
    }

    pub fn with_limit(mut self, limit: Decimal) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub category: Uuid,
    pub period: Period,
    pub limit_amount: Decimal,
}

impl Budget {
    pub fn new(category: Uuid, period: Period, limit_amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            period,
            limit_amount,
        }
    }
}

/// A bulk early settlement of pending installments of one series. Immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anticipation {
    pub id: Uuid,
    pub series: Uuid,
    pub anticipation_date: NaiveDate,
    pub anticipation_period: Period,
    /// Ordered by installment index.
    pub folded_installment_ids: Vec<Uuid>,
    /// Sum of the folded installments' absolute amounts, less the discount.
    pub total_amount: Decimal,
    pub installment_count: u32,
    pub discount: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
