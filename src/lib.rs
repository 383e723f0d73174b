//! Period-scoped financial truth over an immutable stream of movements:
//! realized vs. projected balances, credit-card invoice cycles, installment
//! anticipation and installment-aware budget consumption.
//!
//! Persistence is a collaborator reached through [`store::LedgerStore`]; the
//! only write the engine issues is [`store::LedgerStore::commit_anticipation`].

pub mod balance;
pub mod budget;
pub mod cards;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod installments;
pub mod period;
pub mod store;

pub use balance::{AccountBalance, AccountsSnapshot, BalanceAggregator, CardMetrics, MetricPair};
pub use budget::{BudgetCalculator, BudgetSpend, BudgetView, CategoryBreakdown, compute_budget_spend};
pub use cards::{CardUsage, InvoiceStatusView};
pub use config::{Clock, EngineConfig, FixedClock, SystemClock};
pub use db::SqliteStore;
pub use domain::{
    Account, Anticipation, Budget, Card, InstallmentState, Movement, MovementKind, PayerRef,
    PayerScope,
};
pub use engine::{PeriodEngine, RequestScope};
pub use error::{EngineError, EngineResult};
pub use installments::{AnticipationRequest, InstallmentStatus};
pub use period::{CycleDays, InvoiceStatus, Period, classify_period};
pub use store::{CommitOutcome, InMemoryStore, LedgerStore, MovementFilter};
