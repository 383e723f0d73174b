use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Movement;
use crate::period::InvoiceStatus;

pub const DEFAULT_OPENING_BALANCE_NOTE: &str = "Opening balance";
pub const DEFAULT_INVOICE_PAYMENT_NOTE_PREFIX: &str = "Invoice payment";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Exact note carried by the synthetic movement that mirrors an account's
    /// initial balance.
    #[serde(default = "default_opening_balance_note")]
    pub opening_balance_note: String,

    /// Note prefix (case-insensitive) of auto-generated invoice-payment transfers.
    #[serde(default = "default_invoice_payment_note_prefix")]
    pub invoice_payment_note_prefix: String,

    /// Display labels per invoice status.
    ///
    /// If missing (older configs), it is auto-filled with the defaults.
    #[serde(default)]
    pub invoice_labels: Option<InvoiceLabels>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLabels {
    pub open: String,
    pub closed: String,
    pub overdue: String,
    pub future: String,
}

impl Default for InvoiceLabels {
    fn default() -> Self {
        Self {
            open: "Open".to_string(),
            closed: "Closed".to_string(),
            overdue: "Overdue".to_string(),
            future: "Partial".to_string(),
        }
    }
}

impl InvoiceLabels {
    pub fn label(&self, status: InvoiceStatus) -> &str {
        match status {
            InvoiceStatus::Open => &self.open,
            InvoiceStatus::Closed => &self.closed,
            InvoiceStatus::Overdue => &self.overdue,
            InvoiceStatus::Future => &self.future,
        }
    }
}

fn default_opening_balance_note() -> String {
    DEFAULT_OPENING_BALANCE_NOTE.to_string()
}

fn default_invoice_payment_note_prefix() -> String {
    DEFAULT_INVOICE_PAYMENT_NOTE_PREFIX.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opening_balance_note: default_opening_balance_note(),
            invoice_payment_note_prefix: default_invoice_payment_note_prefix(),
            invoice_labels: Some(InvoiceLabels::default()),
        }
    }
}

impl EngineConfig {
    pub fn is_opening_balance(&self, movement: &Movement) -> bool {
        movement.note.as_deref() == Some(self.opening_balance_note.as_str())
    }

    pub fn is_invoice_payment(&self, movement: &Movement) -> bool {
        let Some(note) = movement.note.as_deref() else {
            return false;
        };
        let prefix = self.invoice_payment_note_prefix.to_lowercase();
        !prefix.is_empty() && note.to_lowercase().starts_with(&prefix)
    }

    pub fn invoice_label(&self, status: InvoiceStatus) -> String {
        self.invoice_labels
            .clone()
            .unwrap_or_default()
            .label(status)
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "ledger-period", "ledger-period")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(EngineConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("engine.json");
    if !cfg_path.exists() {
        let cfg = EngineConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let mut cfg: EngineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    // Auto-migrate older config versions.
    if cfg.invoice_labels.is_none() {
        cfg.invoice_labels = Some(InvoiceLabels::default());
        write_config(&cfg_path, &cfg)?;
    }

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Source of "now" for every date-relative computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Noon UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        FixedClock(date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
