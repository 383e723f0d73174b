use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, TryLockError};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::balance::{AccountsSnapshot, BalanceAggregator, CardMetrics};
use crate::budget::{BudgetCalculator, BudgetView, CategoryBreakdown};
use crate::cards::{CardUsage, InvoiceStatusView, card_usage, invoice_status};
use crate::config::{Clock, EngineConfig, SystemClock};
use crate::domain::{Account, Anticipation, Movement};
use crate::error::{EngineError, EngineResult};
use crate::installments::{AnticipationRequest, InstallmentStatus, plan_anticipation, series_status};
use crate::period::Period;
use crate::store::{CommitOutcome, LedgerStore, MovementFilter};

/// One lock per installment series, so overlapping anticipations never race.
#[derive(Default)]
struct SeriesLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SeriesLocks {
    fn lock_for(&self, series: Uuid) -> EngineResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow::anyhow!("Series lock table poisoned"))?;
        Ok(locks.entry(series).or_default().clone())
    }

    /// Hands back a lock taken with `lock_for`; the entry goes away once no
    /// other request holds it.
    fn release(&self, series: Uuid, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(lock);
        if locks.get(&series).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&series);
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

pub struct PeriodEngine<S: LedgerStore> {
    store: S,
    clock: Box<dyn Clock>,
    config: EngineConfig,
    series_locks: SeriesLocks,
}

impl<S: LedgerStore> PeriodEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }

    pub fn with_clock(store: S, clock: impl Clock + 'static) -> Self {
        Self {
            store,
            clock: Box::new(clock),
            config: EngineConfig::default(),
            series_locks: SeriesLocks::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn current_period(&self) -> Period {
        Period::containing(self.today())
    }

    pub fn accounts_snapshot(&self, user: &str, period: Period) -> EngineResult<AccountsSnapshot> {
        self.scope(user)?.snapshot(period)
    }

    pub fn card_metrics(&self, user: &str, period: Period) -> EngineResult<CardMetrics> {
        let accounts = self.store.accounts(user)?;
        let movements = self.store.movements(user, &MovementFilter::all().up_to(period))?;
        let metrics = BalanceAggregator::new(&self.config).card_metrics(
            &accounts,
            &movements,
            period,
            self.today(),
        );
        Ok(metrics)
    }

    pub fn invoice_status(
        &self,
        user: &str,
        card: Uuid,
        period: Period,
    ) -> EngineResult<Option<InvoiceStatusView>> {
        let Some(card) = self.store.card(user, card)? else {
            return Ok(None);
        };
        Ok(Some(invoice_status(&self.config, &card, period, self.today())))
    }

    pub fn card_usage(&self, user: &str, card: Uuid) -> EngineResult<Option<CardUsage>> {
        let Some(card) = self.store.card(user, card)? else {
            return Ok(None);
        };
        let movements = self
            .store
            .movements(user, &MovementFilter::all().card(card.id).settled(false))?;
        Ok(Some(card_usage(&card, &movements)))
    }

    pub fn budget_views(&self, user: &str, period: Period) -> EngineResult<Vec<BudgetView>> {
        let budgets = self.store.budgets(user, period)?;
        if budgets.is_empty() {
            return Ok(Vec::new());
        }
        let movements = self
            .store
            .movements(user, &MovementFilter::all().since(period).up_to(period))?;
        let (views, skipped_rows) =
            BudgetCalculator::new(&self.config).views(&budgets, period, &movements);
        if skipped_rows > 0 {
            tracing::warn!(user, %period, skipped_rows, "budget views skipped malformed rows");
        }
        Ok(views)
    }

    pub fn category_breakdown(
        &self,
        user: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<CategoryBreakdown> {
        let movements = self.store.movements(user, &MovementFilter::all())?;
        Ok(BudgetCalculator::new(&self.config).breakdown_by_purchase_date(&movements, from, to))
    }

    pub fn series_status(&self, user: &str, series: Uuid) -> EngineResult<Vec<InstallmentStatus>> {
        let movements = self.store.series_movements(user, series)?;
        if movements.is_empty() {
            return Err(EngineError::UnknownSeriesReference(series));
        }
        Ok(series_status(&movements))
    }

    pub fn anticipation_history(
        &self,
        user: &str,
        series: Uuid,
    ) -> EngineResult<Vec<Anticipation>> {
        let mut history = self.store.anticipations(user, series)?;
        history.sort_by_key(|a| (a.anticipation_date, a.created_at));
        Ok(history)
    }

    /// Folds every pending installment of the series from `request.from_index`
    /// on into a single anticipation. All or nothing.
    pub fn anticipate(&self, user: &str, request: &AnticipationRequest) -> EngineResult<Anticipation> {
        let lock = self.series_locks.lock_for(request.series)?;
        let outcome = match lock.try_lock() {
            Ok(_guard) => self.anticipate_locked(user, request),
            Err(TryLockError::Poisoned(poisoned)) => {
                let _guard = poisoned.into_inner();
                self.anticipate_locked(user, request)
            }
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(user, series = %request.series, "anticipation already in progress");
                Err(EngineError::ConcurrentAnticipationConflict(request.series))
            }
        };
        self.series_locks.release(request.series, lock);
        outcome
    }

    /// Series whose anticipation lock is currently held or awaited.
    pub fn active_series_locks(&self) -> usize {
        self.series_locks.len()
    }

    fn anticipate_locked(
        &self,
        user: &str,
        request: &AnticipationRequest,
    ) -> EngineResult<Anticipation> {
        let movements = self.store.series_movements(user, request.series)?;
        let anticipation = plan_anticipation(&movements, request, self.clock.now())
            .inspect_err(|err| {
                tracing::warn!(user, series = %request.series, %err, "anticipation rejected");
            })?;

        match self.store.commit_anticipation(user, &anticipation)? {
            CommitOutcome::Committed => {
                tracing::info!(
                    user,
                    series = %anticipation.series,
                    anticipation = %anticipation.id,
                    installments = anticipation.installment_count,
                    total = %anticipation.total_amount,
                    "anticipation committed"
                );
                Ok(anticipation)
            }
            CommitOutcome::Conflict => {
                tracing::warn!(user, series = %request.series, "installments changed before commit");
                Err(EngineError::ConcurrentAnticipationConflict(request.series))
            }
        }
    }

    /// A read view for one request: the user's accounts and movements are loaded
    /// once and snapshots are memoized per period.
    pub fn scope(&self, user: &str) -> EngineResult<RequestScope<'_>> {
        Ok(RequestScope {
            config: &self.config,
            today: self.today(),
            accounts: self.store.accounts(user)?,
            movements: self.store.movements(user, &MovementFilter::all())?,
            snapshots: RefCell::new(HashMap::new()),
        })
    }
}

pub struct RequestScope<'e> {
    config: &'e EngineConfig,
    today: NaiveDate,
    accounts: Vec<Account>,
    movements: Vec<Movement>,
    snapshots: RefCell<HashMap<Period, AccountsSnapshot>>,
}

impl RequestScope<'_> {
    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn snapshot(&self, period: Period) -> EngineResult<AccountsSnapshot> {
        if let Some(hit) = self.snapshots.borrow().get(&period) {
            return Ok(hit.clone());
        }
        let snapshot = BalanceAggregator::new(self.config).snapshot(
            &self.accounts,
            &self.movements,
            &self.movements,
            period,
            self.today,
        );
        self.snapshots.borrow_mut().insert(period, snapshot.clone());
        Ok(snapshot)
    }

    pub fn card_metrics(&self, period: Period) -> CardMetrics {
        BalanceAggregator::new(self.config).card_metrics(
            &self.accounts,
            &self.movements,
            period,
            self.today,
        )
    }

    pub fn memoized_periods(&self) -> usize {
        self.snapshots.borrow().len()
    }
}
