//! Calendar periods (`YYYY-MM` buckets) and credit-card invoice cycle math.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const MIN_MONTH_INDEX: i64 = 0;
const MAX_MONTH_INDEX: i64 = 9999 * 12 + 11;

/// A reporting/billing month between `0000-01` and `9999-12`. Ordering matches
/// the lexicographic order of the `YYYY-MM` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(NaiveDate);

impl Period {
    pub fn new(year: i32, month: u32) -> EngineResult<Self> {
        if !(0..=9999).contains(&year) {
            return Err(EngineError::InvalidPeriodFormat(format!("{year}-{month:02}")));
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Period)
            .ok_or_else(|| EngineError::InvalidPeriodFormat(format!("{year:04}-{month:02}")))
    }

    /// The period a calendar date falls in, clamped into `0000-01..=9999-12`.
    pub fn containing(date: NaiveDate) -> Self {
        Self::from_month_index(i64::from(date.year()) * 12 + i64::from(date.month0()))
    }

    fn month_index(self) -> i64 {
        i64::from(self.year()) * 12 + i64::from(self.0.month0())
    }

    fn from_month_index(index: i64) -> Self {
        let index = index.clamp(MIN_MONTH_INDEX, MAX_MONTH_INDEX);
        let year = i32::try_from(index / 12).unwrap_or(9999);
        let month = u32::try_from(index % 12).unwrap_or(0) + 1;
        Period(NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default())
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u32 {
        self.0.month()
    }

    pub fn next(self) -> Self {
        self.offset(1)
    }

    pub fn previous(self) -> Self {
        self.offset(-1)
    }

    /// Shifts by a signed number of months, saturating at `0000-01` and
    /// `9999-12`.
    pub fn offset(self, months: i32) -> Self {
        Self::from_month_index(self.month_index() + i64::from(months))
    }

    pub fn first_day(self) -> NaiveDate {
        self.0
    }

    pub fn last_day(self) -> NaiveDate {
        let (year, month) = match self.month() {
            12 => (self.year() + 1, 1),
            m => (self.year(), m + 1),
        };
        NaiveDate::from_ymd_opt(year, month, 1).map_or(self.0, |next| next - Days::new(1))
    }

    pub fn days_in_month(self) -> u32 {
        self.last_day().day()
    }

    /// Concrete date for a day-of-month, clamped into `1..=days_in_month`.
    ///
    /// `day = 31` in April yields April 30th; `day = 30` in a leap February
    /// yields the 29th.
    pub fn day_clamped(self, day: u32) -> NaiveDate {
        let day = day.clamp(1, self.days_in_month());
        self.0 + Days::new(u64::from(day - 1))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidPeriodFormat(raw.to_string());
        let (y, m) = raw.split_once('-').ok_or_else(invalid)?;
        let well_formed = y.len() == 4
            && m.len() == 2
            && y.bytes().all(|b| b.is_ascii_digit())
            && m.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        Period::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Period {
    type Error = EngineError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// Where an invoice period stands relative to a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// The cycle currently receiving new purchases.
    Open,
    /// Past its closing date, payment not yet due.
    Closed,
    /// Past its due date.
    Overdue,
    /// Later cycles; still receiving installments, never overdue.
    Future,
}

/// Closing and due day-of-month of a credit instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCycleDays")]
pub struct CycleDays {
    closing_day: u32,
    due_day: u32,
}

#[derive(Deserialize)]
struct RawCycleDays {
    closing_day: u32,
    due_day: u32,
}

impl TryFrom<RawCycleDays> for CycleDays {
    type Error = EngineError;

    fn try_from(raw: RawCycleDays) -> Result<Self, Self::Error> {
        CycleDays::new(raw.closing_day, raw.due_day)
    }
}

impl CycleDays {
    pub fn new(closing_day: u32, due_day: u32) -> EngineResult<Self> {
        check_cycle_day("closing day", closing_day)?;
        check_cycle_day("due day", due_day)?;
        Ok(Self {
            closing_day,
            due_day,
        })
    }

    pub fn closing_day(self) -> u32 {
        self.closing_day
    }

    pub fn due_day(self) -> u32 {
        self.due_day
    }

    /// The period label of the cycle open on `reference`.
    ///
    /// Past the closing day the next cycle is already accruing. Cycles whose due
    /// day comes before the closing day are labeled by the following month, since
    /// that is when they fall due.
    pub fn open_period(self, reference: NaiveDate) -> Period {
        let mut open = Period::containing(reference);
        if reference.day() > self.closing_day {
            open = open.next();
        }
        if self.due_day < self.closing_day {
            open = open.next();
        }
        open
    }

    /// Due date of the invoice labeled `period`.
    pub fn due_date(self, period: Period) -> NaiveDate {
        period.day_clamped(self.due_day)
    }

    pub fn classify(self, reference: NaiveDate, target: Period) -> InvoiceStatus {
        let open = self.open_period(reference);
        if target == open {
            InvoiceStatus::Open
        } else if target > open {
            InvoiceStatus::Future
        } else if reference > self.due_date(target) {
            InvoiceStatus::Overdue
        } else {
            InvoiceStatus::Closed
        }
    }
}

fn check_cycle_day(field: &'static str, value: u32) -> EngineResult<()> {
    if (1..=31).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidCycleDay { field, value })
    }
}

/// Classifies `target` for a card closing on `closing_day` and due on `due_day`,
/// as seen on `reference`.
pub fn classify_period(
    reference: NaiveDate,
    closing_day: u32,
    due_day: u32,
    target: Period,
) -> EngineResult<InvoiceStatus> {
    Ok(CycleDays::new(closing_day, due_day)?.classify(reference, target))
}
