//! Engine facade: fetch → analyze → plan → execute → record.
//!
//! Owns the collaborator seams and the per-wallet run guard, and exposes
//! the operations the dashboard layer consumes. All durable state lives
//! behind the injected stores; the engine itself only holds the in-memory
//! claim set of wallets with a run in flight.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::analyzer::{self, DriftReport};
use crate::audit::{self, AuditLog};
use crate::chain::{AllocationProvider, ChainGateway};
use crate::config::{Config, DefaultsConfig};
use crate::error::{Error, Result};
use crate::executor::{self, ExecOptions, NullProgress, ProgressObserver};
use crate::planner::{self, PlanOutcome};
use crate::scheduler::{RebalanceSettings, RunGuardSet, SettingsPatch};
use crate::store::{HistoryStore, RunRecord, RunStatus, RunTrigger, SettingsStore};

/// Engine status for one wallet, as shown by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub running: bool,
}

/// One scheduled run fired by a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRun {
    pub wallet: String,
    pub status: RunStatus,
}

/// The rebalancing engine. One instance serves every wallet; per-wallet
/// state is keyed by address in the injected stores.
pub struct RebalanceEngine {
    chain: Arc<dyn ChainGateway>,
    allocations: Arc<dyn AllocationProvider>,
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    defaults: DefaultsConfig,
    per_operation_delay: Duration,
    guards: RunGuardSet,
    audit: Option<Mutex<AuditLog>>,
}

impl RebalanceEngine {
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        allocations: Arc<dyn AllocationProvider>,
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        config: &Config,
    ) -> Self {
        RebalanceEngine {
            chain,
            allocations,
            settings,
            history,
            defaults: config.defaults.clone(),
            per_operation_delay: config.engine.per_operation_delay(),
            guards: RunGuardSet::new(),
            audit: None,
        }
    }

    /// Attach a JSONL audit trail at `path`.
    pub fn with_audit(mut self, path: &std::path::Path) -> Result<Self> {
        self.audit = Some(Mutex::new(AuditLog::open(path)?));
        Ok(self)
    }

    fn load_settings(&self, wallet: &str) -> Result<RebalanceSettings> {
        Ok(self
            .settings
            .get(wallet)?
            .unwrap_or_else(|| self.defaults.settings()))
    }

    /// Audit writes never fail a run; a broken trail is logged and the run
    /// carries on.
    fn audit_event<F>(&self, write: F)
    where
        F: FnOnce(&mut AuditLog) -> Result<()>,
    {
        if let Some(audit) = &self.audit {
            let mut audit = audit.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = write(&mut audit) {
                warn!("audit write failed: {e}");
            }
        }
    }

    /// Compute the current drift report for a wallet without running
    /// anything.
    pub fn check_drift(&self, wallet: &str) -> Result<DriftReport> {
        let settings = self.load_settings(wallet)?;
        let holdings = self.chain.holdings(wallet)?;
        let target = self
            .allocations
            .target_allocation(wallet, settings.risk_profile)?;
        Ok(analyzer::analyze(&holdings, &target, settings.threshold_pct))
    }

    /// Drift report plus the plan that a run would execute right now.
    pub fn plan_preview(&self, wallet: &str) -> Result<(DriftReport, PlanOutcome)> {
        let settings = self.load_settings(wallet)?;
        let report = self.check_drift(wallet)?;
        let price = self.chain.quote_price_cents()?;
        let plan = planner::plan(&report, price, &settings);
        Ok((report, plan))
    }

    /// Run one rebalance cycle for a wallet.
    ///
    /// Structural problems (concurrent run, collaborator failures,
    /// storage) surface as errors; anything that happens *inside* the run
    /// is contained in the returned [`RunRecord`]. The cooldown restarts
    /// from completion whatever the outcome.
    pub fn run_rebalance(&self, wallet: &str, trigger: RunTrigger) -> Result<RunRecord> {
        self.run_with_observer(wallet, trigger, &NullProgress)
    }

    pub fn run_with_observer(
        &self,
        wallet: &str,
        trigger: RunTrigger,
        observer: &dyn ProgressObserver,
    ) -> Result<RunRecord> {
        let _guard = self.guards.claim(wallet)?;

        let started_at = Utc::now();
        let settings = self.load_settings(wallet)?;
        info!("{wallet}: rebalance run started ({trigger})");
        self.audit_event(|a| audit::log_run_started(a, wallet, trigger));

        let outcome = self.run_cycle(wallet, trigger, started_at, &settings, observer);

        // Completion bookkeeping happens regardless of outcome.
        let mut completed = settings;
        completed.mark_completed(Utc::now());
        self.settings.put(wallet, &completed)?;

        let record = match outcome {
            Ok(record) => record,
            Err(Error::ZeroPortfolio) => skipped(
                started_at,
                trigger,
                &DriftReport::empty(),
                "zero-value portfolio, nothing to do".into(),
            ),
            Err(e) => {
                warn!("{wallet}: rebalance run errored: {e}");
                return Err(e);
            }
        };

        self.audit_event(|a| {
            audit::log_run_completed(
                a,
                wallet,
                record.status,
                record.operations.iter().filter(|r| r.is_success()).count(),
                record.operations.iter().filter(|r| !r.is_success()).count(),
            )
        });
        info!(
            "{wallet}: rebalance run finished ({}): {}",
            record.status,
            if record.detail.is_empty() {
                "executed"
            } else {
                record.detail.as_str()
            }
        );

        self.history.append(wallet, record.clone())?;
        Ok(record)
    }

    /// The fallible middle of a run: everything from holdings fetch to
    /// execution.
    fn run_cycle(
        &self,
        wallet: &str,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        settings: &RebalanceSettings,
        observer: &dyn ProgressObserver,
    ) -> Result<RunRecord> {
        let holdings = self.chain.holdings(wallet)?;
        let price = self.chain.quote_price_cents()?;
        let target = self
            .allocations
            .target_allocation(wallet, settings.risk_profile)?;

        let report = analyzer::analyze(&holdings, &target, settings.threshold_pct);
        self.audit_event(|a| audit::log_drift(a, wallet, &report));

        if report.total_value_cents <= 0 {
            return Err(Error::ZeroPortfolio);
        }

        if !report.needs_rebalance && trigger != RunTrigger::Forced {
            return Ok(skipped(
                started_at,
                trigger,
                &report,
                format!(
                    "max drift {:.2}% below threshold {:.2}%",
                    report.max_drift, settings.threshold_pct
                ),
            ));
        }

        let plan = planner::plan(&report, price, settings);
        self.audit_event(|a| audit::log_plan(a, wallet, &plan));

        if plan.operations.is_empty() {
            let detail = if plan.skipped.is_empty() {
                "no drift above the actionable minimum".to_string()
            } else {
                let reasons: Vec<String> = plan
                    .skipped
                    .iter()
                    .map(|s| format!("{}: {}", s.protocol, s.reason))
                    .collect();
                format!("no executable operations ({})", reasons.join("; "))
            };
            return Ok(skipped(started_at, trigger, &report, detail));
        }

        let opts = ExecOptions {
            max_slippage_pct: settings.max_slippage_pct,
            abort_on_failure: false,
            per_operation_delay: self.per_operation_delay,
            observer,
        };
        let execution = executor::execute(wallet, &plan.operations, self.chain.as_ref(), &opts);
        for result in &execution.results {
            self.audit_event(|a| audit::log_operation(a, wallet, result));
        }

        let status = match (execution.succeeded_count(), execution.failed_count()) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        };

        Ok(RunRecord {
            timestamp: started_at,
            trigger,
            drift_before: report.max_drift,
            operations: execution.results,
            status,
            detail: String::new(),
        })
    }

    /// Apply a settings patch. Validation failures leave stored settings
    /// untouched.
    pub fn update_settings(&self, wallet: &str, patch: &SettingsPatch) -> Result<RebalanceSettings> {
        let current = self.load_settings(wallet)?;
        let updated = current.apply_patch(patch, Utc::now())?;
        self.settings.put(wallet, &updated)?;
        Ok(updated)
    }

    pub fn status(&self, wallet: &str) -> Result<EngineStatus> {
        let settings = self.load_settings(wallet)?;
        Ok(EngineStatus {
            enabled: settings.enabled,
            last_run_at: settings.last_run_at,
            next_run_at: settings.next_run_at,
            running: self.guards.is_running(wallet),
        })
    }

    pub fn history(&self, wallet: &str, limit: usize) -> Result<Vec<RunRecord>> {
        self.history.list(wallet, limit)
    }

    /// One scheduler poll pass: run every enabled wallet whose slot has
    /// arrived. Per-wallet failures are contained and logged; a wallet
    /// already running is simply left alone.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TickRun>> {
        let mut runs = Vec::new();
        for wallet in self.settings.wallets()? {
            let Some(settings) = self.settings.get(&wallet)? else {
                continue;
            };
            if !settings.is_due(now) {
                continue;
            }
            match self.run_rebalance(&wallet, RunTrigger::Scheduled) {
                Ok(record) => runs.push(TickRun {
                    wallet,
                    status: record.status,
                }),
                Err(Error::ConcurrentRun { .. }) => {
                    info!("{wallet}: scheduled run skipped, already running");
                }
                Err(e) => warn!("{wallet}: scheduled run failed: {e}"),
            }
        }
        Ok(runs)
    }
}

fn skipped(
    timestamp: DateTime<Utc>,
    trigger: RunTrigger,
    report: &DriftReport,
    detail: String,
) -> RunRecord {
    RunRecord {
        timestamp,
        trigger,
        drift_before: report.max_drift,
        operations: Vec::new(),
        status: RunStatus::Skipped,
        detail,
    }
}
