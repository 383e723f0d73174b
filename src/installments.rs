//! Installment series bookkeeping and bulk early settlement ("anticipation").

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Anticipation, InstallmentState, Movement};
use crate::error::{EngineError, EngineResult};
use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnticipationRequest {
    pub series: Uuid,
    /// First installment index folded; every pending installment from here on
    /// is selected.
    pub from_index: u32,
    pub discount: Decimal,
    pub date: NaiveDate,
    /// Defaults to the period containing `date`.
    pub period: Option<Period>,
    pub note: Option<String>,
}

impl AnticipationRequest {
    pub fn new(series: Uuid, from_index: u32, date: NaiveDate) -> Self {
        Self {
            series,
            from_index,
            discount: Decimal::ZERO,
            date,
            period: None,
            note: None,
        }
    }

    pub fn with_discount(mut self, discount: Decimal) -> Self {
        self.discount = discount;
        self
    }

    pub fn in_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentStatus {
    pub installment_index: u32,
    pub movement: Uuid,
    pub period: Period,
    pub state: InstallmentState,
    pub anticipation: Option<Uuid>,
}

/// Per-installment state of a series, ordered by index.
pub fn series_status(series_movements: &[Movement]) -> Vec<InstallmentStatus> {
    let mut out: Vec<InstallmentStatus> = series_movements
        .iter()
        .filter_map(|m| {
            Some(InstallmentStatus {
                installment_index: m.installment_index?,
                movement: m.id,
                period: m.period,
                state: m.installment_state()?,
                anticipation: m.anticipation,
            })
        })
        .collect();
    out.sort_by_key(|s| (s.installment_index, s.movement));
    out
}

/// Validates `request` against the current state of the series and builds the
/// anticipation record it would create. Nothing is mutated.
pub fn plan_anticipation(
    series_movements: &[Movement],
    request: &AnticipationRequest,
    created_at: DateTime<Utc>,
) -> EngineResult<Anticipation> {
    let members: Vec<&Movement> = series_movements
        .iter()
        .filter(|m| m.series == Some(request.series))
        .collect();
    if members.is_empty() {
        return Err(EngineError::UnknownSeriesReference(request.series));
    }

    let mut selected: Vec<&Movement> = members
        .into_iter()
        .filter(|m| m.installment_index.is_some_and(|i| i >= request.from_index))
        .filter(|m| m.installment_state() == Some(InstallmentState::Pending))
        .collect();
    if selected.is_empty() {
        return Err(EngineError::EmptySelection {
            series: request.series,
            from_index: request.from_index,
        });
    }
    selected.sort_by_key(|m| (m.installment_index, m.id));

    let mut raw_total = Decimal::ZERO;
    for m in &selected {
        let amount = m.amount.ok_or_else(|| {
            anyhow::anyhow!("Installment {} of series {} has no readable amount", m.id, request.series)
        })?;
        raw_total += amount.abs();
    }

    if request.discount < Decimal::ZERO || request.discount > raw_total {
        return Err(EngineError::InvalidDiscount {
            discount: request.discount,
            total: raw_total,
        });
    }

    Ok(Anticipation {
        id: Uuid::new_v4(),
        series: request.series,
        anticipation_date: request.date,
        anticipation_period: request
            .period
            .unwrap_or_else(|| Period::containing(request.date)),
        folded_installment_ids: selected.iter().map(|m| m.id).collect(),
        total_amount: raw_total - request.discount,
        installment_count: u32::try_from(selected.len()).unwrap_or(u32::MAX),
        discount: request.discount,
        note: request.note.clone(),
        created_at,
    })
}

/// Moves a pending installment into the anticipated state.
pub fn fold_into(movement: &mut Movement, anticipation: &Anticipation) {
    movement.settled = true;
    movement.anticipated = true;
    movement.anticipation = Some(anticipation.id);
}
