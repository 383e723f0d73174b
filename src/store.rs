//! Boundary to the persistence collaborator, plus an in-memory implementation.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow};
use uuid::Uuid;

use crate::domain::{Account, Anticipation, Budget, Card, InstallmentState, Movement};
use crate::installments::fold_into;
use crate::period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// At least one folded installment was no longer pending; nothing was written.
    Conflict,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementFilter {
    pub from: Option<Period>,
    pub to: Option<Period>,
    pub settled: Option<bool>,
    pub category: Option<Uuid>,
    pub account: Option<Uuid>,
    pub card: Option<Uuid>,
    pub series: Option<Uuid>,
}

impl MovementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn series(series: Uuid) -> Self {
        Self {
            series: Some(series),
            ..Self::default()
        }
    }

    pub fn up_to(mut self, period: Period) -> Self {
        self.to = Some(period);
        self
    }

    pub fn since(mut self, period: Period) -> Self {
        self.from = Some(period);
        self
    }

    pub fn settled(mut self, settled: bool) -> Self {
        self.settled = Some(settled);
        self
    }

    pub fn category(mut self, category: Uuid) -> Self {
        self.category = Some(category);
        self
    }

    pub fn account(mut self, account: Uuid) -> Self {
        self.account = Some(account);
        self
    }

    pub fn card(mut self, card: Uuid) -> Self {
        self.card = Some(card);
        self
    }

    pub fn matches(&self, m: &Movement) -> bool {
        self.from.is_none_or(|p| m.period >= p)
            && self.to.is_none_or(|p| m.period <= p)
            && self.settled.is_none_or(|s| m.settled == s)
            && self.category.is_none_or(|c| m.category == Some(c))
            && self.account.is_none_or(|a| m.account == Some(a))
            && self.card.is_none_or(|c| m.card == Some(c))
            && self.series.is_none_or(|s| m.series == Some(s))
    }
}

/// Read access to a user's ledger and the single write path the engine issues.
pub trait LedgerStore: Send + Sync {
    fn accounts(&self, user: &str) -> Result<Vec<Account>>;

    fn cards(&self, user: &str) -> Result<Vec<Card>>;

    fn card(&self, user: &str, card: Uuid) -> Result<Option<Card>> {
        Ok(self.cards(user)?.into_iter().find(|c| c.id == card))
    }

    fn budgets(&self, user: &str, period: Period) -> Result<Vec<Budget>>;

    fn movements(&self, user: &str, filter: &MovementFilter) -> Result<Vec<Movement>>;

    fn series_movements(&self, user: &str, series: Uuid) -> Result<Vec<Movement>> {
        self.movements(user, &MovementFilter::series(series))
    }

    fn anticipations(&self, user: &str, series: Uuid) -> Result<Vec<Anticipation>>;

    /// Stores `anticipation` and folds every installment it lists, as one unit.
    ///
    /// Implementations must write nothing and return [`CommitOutcome::Conflict`]
    /// when any listed installment is missing, belongs to another series or is
    /// no longer pending.
    fn commit_anticipation(&self, user: &str, anticipation: &Anticipation)
    -> Result<CommitOutcome>;
}

#[derive(Debug, Default)]
struct UserLedger {
    accounts: Vec<Account>,
    cards: Vec<Card>,
    budgets: Vec<Budget>,
    movements: Vec<Movement>,
    anticipations: Vec<Anticipation>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserLedger>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, UserLedger>>> {
        self.users
            .read()
            .map_err(|_| anyhow!("In-memory ledger lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, UserLedger>>> {
        self.users
            .write()
            .map_err(|_| anyhow!("In-memory ledger lock poisoned"))
    }

    fn read_user<T>(&self, user: &str, f: impl FnOnce(&UserLedger) -> T) -> Result<T>
    where
        T: Default,
    {
        let users = self.read()?;
        Ok(users.get(user).map(f).unwrap_or_default())
    }

    pub fn insert_account(&self, user: &str, account: Account) -> Result<()> {
        self.write()?
            .entry(user.to_string())
            .or_default()
            .accounts
            .push(account);
        Ok(())
    }

    pub fn insert_card(&self, user: &str, card: Card) -> Result<()> {
        self.write()?
            .entry(user.to_string())
            .or_default()
            .cards
            .push(card);
        Ok(())
    }

    /// At most one budget per category and period.
    pub fn insert_budget(&self, user: &str, budget: Budget) -> Result<()> {
        let mut users = self.write()?;
        let ledger = users.entry(user.to_string()).or_default();
        if ledger
            .budgets
            .iter()
            .any(|b| b.category == budget.category && b.period == budget.period)
        {
            return Err(anyhow!(
                "A budget for category {} in {} already exists",
                budget.category,
                budget.period
            ));
        }
        ledger.budgets.push(budget);
        Ok(())
    }

    pub fn insert_movements(
        &self,
        user: &str,
        movements: impl IntoIterator<Item = Movement>,
    ) -> Result<()> {
        self.write()?
            .entry(user.to_string())
            .or_default()
            .movements
            .extend(movements);
        Ok(())
    }

    /// Marks an installment as paid on its own due period.
    pub fn settle_movement(&self, user: &str, id: Uuid) -> Result<()> {
        let mut users = self.write()?;
        let movement = users
            .get_mut(user)
            .and_then(|l| l.movements.iter_mut().find(|m| m.id == id))
            .ok_or_else(|| anyhow!("No such movement: {id}"))?;
        movement.settled = true;
        Ok(())
    }
}

impl LedgerStore for InMemoryStore {
    fn accounts(&self, user: &str) -> Result<Vec<Account>> {
        self.read_user(user, |l| l.accounts.clone())
    }

    fn cards(&self, user: &str) -> Result<Vec<Card>> {
        self.read_user(user, |l| l.cards.clone())
    }

    fn budgets(&self, user: &str, period: Period) -> Result<Vec<Budget>> {
        self.read_user(user, |l| {
            l.budgets
                .iter()
                .filter(|b| b.period == period)
                .cloned()
                .collect()
        })
    }

    fn movements(&self, user: &str, filter: &MovementFilter) -> Result<Vec<Movement>> {
        self.read_user(user, |l| {
            l.movements
                .iter()
                .filter(|m| filter.matches(m))
                .cloned()
                .collect()
        })
    }

    fn anticipations(&self, user: &str, series: Uuid) -> Result<Vec<Anticipation>> {
        self.read_user(user, |l| {
            l.anticipations
                .iter()
                .filter(|a| a.series == series)
                .cloned()
                .collect()
        })
    }

    fn commit_anticipation(
        &self,
        user: &str,
        anticipation: &Anticipation,
    ) -> Result<CommitOutcome> {
        let mut users = self.write()?;
        let Some(ledger) = users.get_mut(user) else {
            return Ok(CommitOutcome::Conflict);
        };

        let mut positions = Vec::with_capacity(anticipation.folded_installment_ids.len());
        for id in &anticipation.folded_installment_ids {
            let found = ledger.movements.iter().position(|m| {
                m.id == *id
                    && m.series == Some(anticipation.series)
                    && m.installment_state() == Some(InstallmentState::Pending)
            });
            match found {
                Some(pos) => positions.push(pos),
                None => return Ok(CommitOutcome::Conflict),
            }
        }

        for pos in positions {
            fold_into(&mut ledger.movements[pos], anticipation);
        }
        ledger.anticipations.push(anticipation.clone());
        Ok(CommitOutcome::Committed)
    }
}
