use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Card, Movement};
use crate::period::{InvoiceStatus, Period};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusView {
    pub card: Uuid,
    pub period: Period,
    pub status: InvoiceStatus,
    pub label: String,
    pub due_date: NaiveDate,
}

pub fn invoice_status(
    config: &EngineConfig,
    card: &Card,
    period: Period,
    today: NaiveDate,
) -> InvoiceStatusView {
    let status = card.cycle.classify(today, period);
    InvoiceStatusView {
        card: card.id,
        period,
        status,
        label: config.invoice_label(status),
        due_date: card.cycle.due_date(period),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardUsage {
    pub card: Uuid,
    pub limit: Option<Decimal>,
    pub in_use: Decimal,
    /// `None` when the card has no limit.
    pub available: Option<Decimal>,
    pub skipped_rows: usize,
}

/// Limit consumed by the card's unsettled movements.
pub fn card_usage(card: &Card, movements: &[Movement]) -> CardUsage {
    let mut skipped_rows = 0usize;
    let mut open = Decimal::ZERO;
    for m in movements.iter().filter(|m| m.card == Some(card.id) && !m.settled) {
        match m.amount {
            Some(amount) => open += amount,
            None => skipped_rows += 1,
        }
    }
    let in_use = if open < Decimal::ZERO {
        open.abs()
    } else {
        Decimal::ZERO
    };
    CardUsage {
        card: card.id,
        limit: card.limit,
        in_use,
        available: card.limit.map(|limit| (limit - in_use).max(Decimal::ZERO)),
        skipped_rows,
    }
}
