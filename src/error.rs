use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid period '{0}'. Expected YYYY-MM")]
    InvalidPeriodFormat(String),

    #[error("Invalid {field} {value}. Cycle days must be between 1 and 31")]
    InvalidCycleDay { field: &'static str, value: u32 },

    #[error("Select at least one pending installment to anticipate (series {series}, from #{from_index})")]
    EmptySelection { series: Uuid, from_index: u32 },

    #[error("Discount {discount} must be between 0 and the selected total {total}")]
    InvalidDiscount { discount: Decimal, total: Decimal },

    #[error("Unknown installment series: {0}")]
    UnknownSeriesReference(Uuid),

    #[error("Installment series {0} is being anticipated by another request. Try again")]
    ConcurrentAnticipationConflict(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
