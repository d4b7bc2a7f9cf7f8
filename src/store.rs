//! Persistence seams: per-wallet settings and the append-only run history.
//!
//! The engine owns no durable state. Settings and history live behind
//! traits keyed by wallet address; the in-memory implementations back the
//! CLI and tests. History is append-only with a retention cap enforced on
//! write; records are never updated or deleted individually.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::Result;
use crate::executor::OperationResult;
use crate::scheduler::RebalanceSettings;

/// Default per-wallet history retention.
pub const HISTORY_CAP: usize = 10;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    /// Manual run that bypasses the drift threshold gate.
    Forced,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTrigger::Scheduled => write!(f, "scheduled"),
            RunTrigger::Manual => write!(f, "manual"),
            RunTrigger::Forced => write!(f, "forced"),
        }
    }
}

/// Overall outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every operation confirmed.
    Success,
    /// At least one operation confirmed and at least one failed.
    Partial,
    /// Nothing was executed (below threshold, zero portfolio, empty plan).
    Skipped,
    /// Every attempted operation failed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One run's record in the ledger. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub trigger: RunTrigger,
    pub drift_before: f64,
    pub operations: Vec<OperationResult>,
    pub status: RunStatus,
    /// Human-readable reason, set for skipped runs.
    pub detail: String,
}

/// Per-wallet settings persistence.
pub trait SettingsStore: Send + Sync {
    fn get(&self, wallet: &str) -> Result<Option<RebalanceSettings>>;
    fn put(&self, wallet: &str, settings: &RebalanceSettings) -> Result<()>;
    /// Wallets with stored settings, i.e. the scheduler's poll set.
    fn wallets(&self) -> Result<Vec<String>>;
}

/// Per-wallet run history persistence.
pub trait HistoryStore: Send + Sync {
    fn append(&self, wallet: &str, record: RunRecord) -> Result<()>;
    /// Most-recent-first, at most `limit` records.
    fn list(&self, wallet: &str, limit: usize) -> Result<Vec<RunRecord>>;
}

/// In-memory settings store.
#[derive(Default)]
pub struct MemorySettings {
    inner: Mutex<FxHashMap<String, RebalanceSettings>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        MemorySettings::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, RebalanceSettings>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, wallet: &str) -> Result<Option<RebalanceSettings>> {
        Ok(self.lock().get(wallet).cloned())
    }

    fn put(&self, wallet: &str, settings: &RebalanceSettings) -> Result<()> {
        self.lock().insert(wallet.to_string(), settings.clone());
        Ok(())
    }

    fn wallets(&self) -> Result<Vec<String>> {
        let mut wallets: Vec<String> = self.lock().keys().cloned().collect();
        wallets.sort();
        Ok(wallets)
    }
}

/// In-memory history ledger with FIFO eviction beyond the cap.
pub struct MemoryHistory {
    cap: usize,
    inner: Mutex<FxHashMap<String, VecDeque<RunRecord>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        MemoryHistory::with_cap(HISTORY_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        MemoryHistory {
            cap: cap.max(1),
            inner: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, VecDeque<RunRecord>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        MemoryHistory::new()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, wallet: &str, record: RunRecord) -> Result<()> {
        let mut inner = self.lock();
        let records = inner.entry(wallet.to_string()).or_default();
        records.push_back(record);
        while records.len() > self.cap {
            records.pop_front();
        }
        Ok(())
    }

    fn list(&self, wallet: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let inner = self.lock();
        Ok(inner
            .get(wallet)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
