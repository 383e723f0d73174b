use crate::config::AppPaths;
use crate::domain::{
    Account, Anticipation, Budget, Card, Movement, MovementKind, PayerRef, PayerScope,
};
use crate::period::{CycleDays, Period};
use crate::store::{CommitOutcome, LedgerStore, MovementFilter};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// SQLite-backed ledger store. Decimals, dates and ids are stored as TEXT.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const MOVEMENT_COLUMNS: &str = "id, amount, kind, purchase_date, period, settled, account_id, card_id, category_id, payer_id, payer_scope, series_id, installment_index, installment_count, anticipated, anticipation_id, note";

impl SqliteStore {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;
        let db_path = paths.data_dir.join("ledger.sqlite3");
        let store = Self::open_path(&db_path)?;
        Ok((store, db_path))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DB {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                initial_balance TEXT,
                exclude_from_balance INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                closing_day INTEGER NOT NULL,
                due_day INTEGER NOT NULL,
                credit_limit TEXT
            );

            CREATE TABLE IF NOT EXISTS budgets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                period TEXT NOT NULL,
                limit_amount TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_budgets_category_period
                ON budgets(user_id, category_id, period);

            CREATE TABLE IF NOT EXISTS anticipations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                series_id TEXT NOT NULL,
                anticipation_date TEXT NOT NULL,
                anticipation_period TEXT NOT NULL,
                folded_ids_json TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                installment_count INTEGER NOT NULL,
                discount TEXT NOT NULL,
                note TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_anticipations_series ON anticipations(user_id, series_id);

            CREATE TABLE IF NOT EXISTS movements (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount TEXT,
                kind TEXT NOT NULL,
                purchase_date TEXT NOT NULL,
                period TEXT NOT NULL,
                settled INTEGER NOT NULL DEFAULT 0,
                account_id TEXT,
                card_id TEXT,
                category_id TEXT,
                payer_id TEXT,
                payer_scope TEXT,
                series_id TEXT,
                installment_index INTEGER,
                installment_count INTEGER,
                anticipated INTEGER NOT NULL DEFAULT 0,
                anticipation_id TEXT REFERENCES anticipations(id) ON DELETE SET NULL,
                note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_movements_period ON movements(user_id, period);
            CREATE INDEX IF NOT EXISTS idx_movements_series ON movements(user_id, series_id);
            "#,
        )?;
        Ok(())
    }

    pub fn insert_account(&self, user: &str, account: &Account) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO accounts (id, user_id, initial_balance, exclude_from_balance) VALUES (?1, ?2, ?3, ?4)",
            params![
                account.id.to_string(),
                user,
                account.initial_balance.map(|d| d.to_string()),
                account.exclude_from_balance,
            ],
        )?;
        Ok(())
    }

    pub fn insert_card(&self, user: &str, card: &Card) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO cards (id, user_id, closing_day, due_day, credit_limit) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card.id.to_string(),
                user,
                card.cycle.closing_day(),
                card.cycle.due_day(),
                card.limit.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_budget(&self, user: &str, budget: &Budget) -> Result<()> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO budgets (id, user_id, category_id, period, limit_amount)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    budget.id.to_string(),
                    user,
                    budget.category.to_string(),
                    budget.period.to_string(),
                    budget.limit_amount.to_string(),
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert budget for category {} in {}",
                    budget.category, budget.period
                )
            })?;
        Ok(())
    }

    pub fn insert_movement(&self, user: &str, m: &Movement) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO movements (id, user_id, amount, kind, purchase_date, period, settled,
                account_id, card_id, category_id, payer_id, payer_scope, series_id,
                installment_index, installment_count, anticipated, anticipation_id, note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                m.id.to_string(),
                user,
                m.amount.map(|d| d.to_string()),
                kind_str(m.kind),
                m.purchase_date.to_string(),
                m.period.to_string(),
                m.settled,
                m.account.map(|id| id.to_string()),
                m.card.map(|id| id.to_string()),
                m.category.map(|id| id.to_string()),
                m.payer.map(|p| p.id.to_string()),
                m.payer.map(|p| scope_str(p.scope)),
                m.series.map(|id| id.to_string()),
                m.installment_index,
                m.installment_count,
                m.anticipated,
                m.anticipation.map(|id| id.to_string()),
                m.note,
            ],
        )?;
        Ok(())
    }

    pub fn insert_movements<'a>(
        &self,
        user: &str,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Result<()> {
        for m in movements {
            self.insert_movement(user, m)?;
        }
        Ok(())
    }

    /// Marks an installment as paid on its own due period.
    pub fn settle_movement(&self, user: &str, id: Uuid) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE movements SET settled = 1 WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user],
        )?;
        if changed == 0 {
            return Err(anyhow!("No such movement: {id}"));
        }
        Ok(())
    }

    /// Overwrites the stored amount text as-is. Used by collaborators repairing
    /// imported rows.
    pub fn set_raw_amount(&self, id: Uuid, raw: Option<&str>) -> Result<usize> {
        let changed = self.conn()?.execute(
            "UPDATE movements SET amount = ?1 WHERE id = ?2",
            params![raw, id.to_string()],
        )?;
        Ok(changed)
    }
}

impl LedgerStore for SqliteStore {
    fn accounts(&self, user: &str) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, initial_balance, exclude_from_balance FROM accounts WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user], |row| {
            let id: String = row.get(0)?;
            let initial: Option<String> = row.get(1)?;
            let hidden: bool = row.get(2)?;
            Ok((id, initial, hidden))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, initial, hidden) = row?;
            out.push(Account {
                id: parse_uuid(&id, "accounts")?,
                initial_balance: lenient_decimal(initial.as_deref(), "accounts.initial_balance"),
                exclude_from_balance: hidden,
            });
        }
        Ok(out)
    }

    fn cards(&self, user: &str) -> Result<Vec<Card>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, closing_day, due_day, credit_limit FROM cards WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user], |row| {
            let id: String = row.get(0)?;
            let closing: u32 = row.get(1)?;
            let due: u32 = row.get(2)?;
            let limit: Option<String> = row.get(3)?;
            Ok((id, closing, due, limit))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, closing, due, limit) = row?;
            let cycle = CycleDays::new(closing, due)
                .with_context(|| format!("Invalid cycle days on card {id}"))?;
            out.push(Card {
                id: parse_uuid(&id, "cards")?,
                cycle,
                limit: lenient_decimal(limit.as_deref(), "cards.credit_limit"),
            });
        }
        Ok(out)
    }

    fn budgets(&self, user: &str, period: Period) -> Result<Vec<Budget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, category_id, limit_amount
            FROM budgets
            WHERE user_id = ?1 AND period = ?2
            ORDER BY category_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user, period.to_string()], |row| {
            let id: String = row.get(0)?;
            let category: String = row.get(1)?;
            let limit: String = row.get(2)?;
            Ok((id, category, limit))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, category, limit) = row?;
            out.push(Budget {
                id: parse_uuid(&id, "budgets")?,
                category: parse_uuid(&category, "budgets")?,
                period,
                limit_amount: limit
                    .parse::<Decimal>()
                    .context("Invalid decimal limit in budgets table")?,
            });
        }
        Ok(out)
    }

    fn movements(&self, user: &str, filter: &MovementFilter) -> Result<Vec<Movement>> {
        let mut sql = format!("SELECT {MOVEMENT_COLUMNS} FROM movements WHERE user_id = ?");
        let mut args: Vec<Value> = vec![Value::Text(user.to_string())];

        let mut push = |clause: &str, value: Value| {
            sql.push_str(" AND ");
            sql.push_str(clause);
            args.push(value);
        };
        if let Some(p) = filter.from {
            push("period >= ?", Value::Text(p.to_string()));
        }
        if let Some(p) = filter.to {
            push("period <= ?", Value::Text(p.to_string()));
        }
        if let Some(s) = filter.settled {
            push("settled = ?", Value::Integer(i64::from(s)));
        }
        if let Some(id) = filter.category {
            push("category_id = ?", Value::Text(id.to_string()));
        }
        if let Some(id) = filter.account {
            push("account_id = ?", Value::Text(id.to_string()));
        }
        if let Some(id) = filter.card {
            push("card_id = ?", Value::Text(id.to_string()));
        }
        if let Some(id) = filter.series {
            push("series_id = ?", Value::Text(id.to_string()));
        }
        sql.push_str(" ORDER BY period ASC, purchase_date ASC, id ASC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), RawMovement::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_movement()?);
        }
        Ok(out)
    }

    fn anticipations(&self, user: &str, series: Uuid) -> Result<Vec<Anticipation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, anticipation_date, anticipation_period, folded_ids_json, total_amount,
                   installment_count, discount, note, created_at
            FROM anticipations
            WHERE user_id = ?1 AND series_id = ?2
            ORDER BY anticipation_date ASC, created_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user, series.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, date, period, folded, total, count, discount, note, created_at) = row?;
            out.push(Anticipation {
                id: parse_uuid(&id, "anticipations")?,
                series,
                anticipation_date: parse_date(&date, "anticipations")?,
                anticipation_period: period
                    .parse::<Period>()
                    .context("Invalid period in anticipations table")?,
                folded_installment_ids: serde_json::from_str(&folded)
                    .context("Invalid folded_ids_json in anticipations table")?,
                total_amount: total
                    .parse::<Decimal>()
                    .context("Invalid decimal total in anticipations table")?,
                installment_count: count,
                discount: discount
                    .parse::<Decimal>()
                    .context("Invalid decimal discount in anticipations table")?,
                note,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .context("Invalid created_at in anticipations table")?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
    }

    fn commit_anticipation(
        &self,
        user: &str,
        anticipation: &Anticipation,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let folded_json = serde_json::to_string(&anticipation.folded_installment_ids)?;
        tx.execute(
            r#"
            INSERT INTO anticipations (id, user_id, series_id, anticipation_date, anticipation_period,
                folded_ids_json, total_amount, installment_count, discount, note, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                anticipation.id.to_string(),
                user,
                anticipation.series.to_string(),
                anticipation.anticipation_date.to_string(),
                anticipation.anticipation_period.to_string(),
                folded_json,
                anticipation.total_amount.to_string(),
                anticipation.installment_count,
                anticipation.discount.to_string(),
                anticipation.note,
                anticipation.created_at.to_rfc3339(),
            ],
        )?;

        for id in &anticipation.folded_installment_ids {
            let changed = tx.execute(
                r#"
                UPDATE movements
                SET settled = 1, anticipated = 1, anticipation_id = ?1
                WHERE id = ?2 AND user_id = ?3 AND series_id = ?4
                  AND settled = 0 AND anticipated = 0
                "#,
                params![
                    anticipation.id.to_string(),
                    id.to_string(),
                    user,
                    anticipation.series.to_string(),
                ],
            )?;
            if changed != 1 {
                // Dropping the transaction rolls back the insert and earlier updates.
                return Ok(CommitOutcome::Conflict);
            }
        }

        tx.commit()?;
        Ok(CommitOutcome::Committed)
    }

    fn card(&self, user: &str, card: Uuid) -> Result<Option<Card>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT closing_day, due_day, credit_limit FROM cards WHERE user_id = ?1 AND id = ?2",
                params![user, card.to_string()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((closing, due, limit)) = row else {
            return Ok(None);
        };
        Ok(Some(Card {
            id: card,
            cycle: CycleDays::new(closing, due)
                .with_context(|| format!("Invalid cycle days on card {card}"))?,
            limit: lenient_decimal(limit.as_deref(), "cards.credit_limit"),
        }))
    }
}

struct RawMovement {
    id: String,
    amount: Option<String>,
    kind: String,
    purchase_date: String,
    period: String,
    settled: bool,
    account: Option<String>,
    card: Option<String>,
    category: Option<String>,
    payer: Option<String>,
    payer_scope: Option<String>,
    series: Option<String>,
    installment_index: Value,
    installment_count: Value,
    anticipated: bool,
    anticipation: Option<String>,
    note: Option<String>,
}

impl RawMovement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            amount: row.get(1)?,
            kind: row.get(2)?,
            purchase_date: row.get(3)?,
            period: row.get(4)?,
            settled: row.get(5)?,
            account: row.get(6)?,
            card: row.get(7)?,
            category: row.get(8)?,
            payer: row.get(9)?,
            payer_scope: row.get(10)?,
            series: row.get(11)?,
            installment_index: row.get(12)?,
            installment_count: row.get(13)?,
            anticipated: row.get(14)?,
            anticipation: row.get(15)?,
            note: row.get(16)?,
        })
    }

    fn into_movement(self) -> Result<Movement> {
        let payer = match (self.payer, self.payer_scope) {
            (Some(id), scope) => Some(PayerRef {
                id: parse_uuid(&id, "movements")?,
                scope: parse_scope(scope.as_deref())?,
            }),
            (None, _) => None,
        };
        Ok(Movement {
            id: parse_uuid(&self.id, "movements")?,
            amount: lenient_decimal(self.amount.as_deref(), "movements.amount"),
            kind: parse_kind(&self.kind)?,
            purchase_date: parse_date(&self.purchase_date, "movements")?,
            period: self
                .period
                .parse::<Period>()
                .context("Invalid period in movements table")?,
            settled: self.settled,
            account: parse_opt_uuid(self.account.as_deref(), "movements")?,
            card: parse_opt_uuid(self.card.as_deref(), "movements")?,
            category: parse_opt_uuid(self.category.as_deref(), "movements")?,
            payer,
            series: parse_opt_uuid(self.series.as_deref(), "movements")?,
            installment_index: lenient_installment(
                self.installment_index,
                "movements.installment_index",
            ),
            installment_count: lenient_installment(
                self.installment_count,
                "movements.installment_count",
            ),
            anticipated: self.anticipated,
            anticipation: parse_opt_uuid(self.anticipation.as_deref(), "movements")?,
            note: self.note,
        })
    }
}

/// Unreadable decimals degrade to `None` so aggregations can skip the row.
fn lenient_decimal(raw: Option<&str>, column: &str) -> Option<Decimal> {
    let raw = raw?;
    match raw.trim().parse::<Decimal>() {
        Ok(d) => Some(d),
        Err(err) => {
            tracing::warn!(column, raw, %err, "unreadable decimal, treating row as missing");
            None
        }
    }
}

/// Unreadable installment numbers degrade to `Some(0)`, which no series slot
/// accepts, so the row reads as malformed instead of failing the whole query.
fn lenient_installment(raw: Value, column: &str) -> Option<u32> {
    let parsed = match &raw {
        Value::Null => return None,
        Value::Integer(n) => u32::try_from(*n).ok(),
        Value::Text(text) => text.trim().parse::<u32>().ok(),
        Value::Real(_) | Value::Blob(_) => None,
    };
    if parsed.is_none() {
        tracing::warn!(column, raw = ?raw, "unreadable installment number, treating row as malformed");
    }
    Some(parsed.unwrap_or(0))
}

fn parse_uuid(raw: &str, table: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid UUID in {table} table"))
}

fn parse_opt_uuid(raw: Option<&str>, table: &str) -> Result<Option<Uuid>> {
    raw.map(|r| parse_uuid(r, table)).transpose()
}

fn parse_date(raw: &str, table: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("Invalid date in {table} table"))
}

fn kind_str(kind: MovementKind) -> &'static str {
    match kind {
        MovementKind::Income => "income",
        MovementKind::Expense => "expense",
        MovementKind::Transfer => "transfer",
    }
}

fn parse_kind(raw: &str) -> Result<MovementKind> {
    match raw {
        "income" => Ok(MovementKind::Income),
        "expense" => Ok(MovementKind::Expense),
        "transfer" => Ok(MovementKind::Transfer),
        other => Err(anyhow!("Invalid movement kind in movements table: {other}")),
    }
}

fn scope_str(scope: PayerScope) -> &'static str {
    match scope {
        PayerScope::Administrative => "admin",
        PayerScope::Shared => "shared",
    }
}

fn parse_scope(raw: Option<&str>) -> Result<PayerScope> {
    match raw {
        Some("admin") => Ok(PayerScope::Administrative),
        Some("shared") | None => Ok(PayerScope::Shared),
        Some(other) => Err(anyhow!("Invalid payer scope in movements table: {other}")),
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    Ok(())
}
