//! Rebalance scheduling: per-wallet settings, due-time state machine, and
//! the run mutual-exclusion guard.
//!
//! The state machine is Disabled → Enabled(idle) → Enabled(running) →
//! Enabled(idle). Timing is polled, not event-driven: the engine's `tick`
//! checks every enabled wallet against `next_run_at`, and the cooldown
//! restarts from run *completion*, never from the originally scheduled
//! time, so a backlog after downtime produces one run, not a storm.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::chain::RiskProfile;
use crate::engine::RebalanceEngine;
use crate::error::{Error, Result};

pub const MIN_INTERVAL_HOURS: u32 = 1;
pub const MAX_INTERVAL_HOURS: u32 = 168;
pub const MIN_THRESHOLD_PCT: f64 = 0.5;
pub const MAX_THRESHOLD_PCT: f64 = 50.0;
pub const MIN_SLIPPAGE_PCT: f64 = 0.1;
pub const MAX_SLIPPAGE_PCT: f64 = 10.0;

/// Per-wallet rebalancing policy. Mutated only through
/// [`RebalanceSettings::apply_patch`]; persisted through the injected
/// settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSettings {
    pub enabled: bool,
    pub interval_hours: u32,
    pub threshold_pct: f64,
    pub max_slippage_pct: f64,
    pub preserve_staked_positions: bool,
    pub risk_profile: RiskProfile,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        RebalanceSettings {
            enabled: false,
            interval_hours: 24,
            threshold_pct: 5.0,
            max_slippage_pct: 1.0,
            preserve_staked_positions: true,
            risk_profile: RiskProfile::Balanced,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

/// Partial settings update from a collaborator (settings form, API).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub interval_hours: Option<u32>,
    pub threshold_pct: Option<f64>,
    pub max_slippage_pct: Option<f64>,
    pub preserve_staked_positions: Option<bool>,
    pub risk_profile: Option<RiskProfile>,
}

impl RebalanceSettings {
    /// Merge a patch, validate, and recompute schedule fields. Returns the
    /// new settings; `self` is untouched, so a validation failure leaves
    /// the stored settings exactly as they were.
    pub fn apply_patch(&self, patch: &SettingsPatch, now: DateTime<Utc>) -> Result<Self> {
        let mut next = self.clone();
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(hours) = patch.interval_hours {
            next.interval_hours = hours;
        }
        if let Some(threshold) = patch.threshold_pct {
            next.threshold_pct = threshold;
        }
        if let Some(slippage) = patch.max_slippage_pct {
            next.max_slippage_pct = slippage;
        }
        if let Some(preserve) = patch.preserve_staked_positions {
            next.preserve_staked_positions = preserve;
        }
        if let Some(profile) = patch.risk_profile {
            next.risk_profile = profile;
        }
        next.validate()?;

        if next.enabled {
            let interval_changed = next.interval_hours != self.interval_hours;
            if !self.enabled || interval_changed || next.next_run_at.is_none() {
                next.next_run_at = Some(now + next.interval());
            }
        } else {
            next.next_run_at = None;
        }
        Ok(next)
    }

    /// Range-check the policy fields.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(&self.interval_hours) {
            return Err(Error::SettingsValidation(format!(
                "interval_hours must be in [{MIN_INTERVAL_HOURS}, {MAX_INTERVAL_HOURS}], got {}",
                self.interval_hours
            )));
        }
        if !(MIN_THRESHOLD_PCT..=MAX_THRESHOLD_PCT).contains(&self.threshold_pct) {
            return Err(Error::SettingsValidation(format!(
                "threshold_pct must be in [{MIN_THRESHOLD_PCT}, {MAX_THRESHOLD_PCT}], got {}",
                self.threshold_pct
            )));
        }
        if !(MIN_SLIPPAGE_PCT..=MAX_SLIPPAGE_PCT).contains(&self.max_slippage_pct) {
            return Err(Error::SettingsValidation(format!(
                "max_slippage_pct must be in [{MIN_SLIPPAGE_PCT}, {MAX_SLIPPAGE_PCT}], got {}",
                self.max_slippage_pct
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::hours(i64::from(self.interval_hours))
    }

    /// True when a scheduled run should fire.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|at| now >= at)
    }

    /// Record a completed run: the cooldown restarts from `now`.
    /// A wallet disabled mid-run gets no next slot.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.next_run_at = self.enabled.then(|| now + self.interval());
    }
}

/// Wallets with a run in flight. Claiming an already-claimed wallet is an
/// immediate [`Error::ConcurrentRun`]: requests are rejected, never
/// queued.
#[derive(Default)]
pub struct RunGuardSet {
    running: Mutex<FxHashSet<String>>,
}

impl RunGuardSet {
    pub fn new() -> Self {
        RunGuardSet::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashSet<String>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the wallet for a run. The claim is released when the returned
    /// guard drops.
    pub fn claim(&self, wallet: &str) -> Result<RunGuard<'_>> {
        let mut running = self.lock();
        if !running.insert(wallet.to_string()) {
            return Err(Error::ConcurrentRun {
                wallet: wallet.to_string(),
            });
        }
        Ok(RunGuard {
            set: self,
            wallet: wallet.to_string(),
        })
    }

    pub fn is_running(&self, wallet: &str) -> bool {
        self.lock().contains(wallet)
    }
}

/// RAII claim on a wallet's run slot.
pub struct RunGuard<'a> {
    set: &'a RunGuardSet,
    wallet: String,
}

impl std::fmt::Debug for RunGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.wallet);
    }
}

/// Handle to the background poll loop. Dropping without calling
/// [`SchedulerHandle::shutdown`] detaches the thread.
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop polling after the current tick and join the thread. An
    /// in-flight run still completes; shutdown only prevents future
    /// scheduled runs.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("scheduler thread panicked during shutdown");
            }
        }
    }
}

/// Start the poll loop: every `tick` the engine checks all enabled wallets
/// and runs the due ones.
pub fn spawn(engine: Arc<RebalanceEngine>, tick: StdDuration) -> SchedulerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let join = std::thread::spawn(move || {
        while !thread_stop.load(Ordering::Relaxed) {
            if let Err(e) = engine.tick(Utc::now()) {
                warn!("scheduler tick failed: {e}");
            }
            std::thread::sleep(tick);
        }
    });
    SchedulerHandle {
        stop,
        join: Some(join),
    }
}
