//! Drift report → ordered operation plan.
//!
//! Releases (unstake/withdraw/remove) are planned before deployments
//! (stake/lend/add): capital must be freed and confirmed before it can be
//! redeployed. Within each half the analyzer's largest-drift-first order is
//! kept.

use serde::Serialize;

use crate::analyzer::DriftReport;
use crate::protocol::{OperationKind, Protocol};
use crate::scheduler::RebalanceSettings;

/// Drift below this (percentage points) is dust and never generates an
/// operation.
pub const MIN_ACTIONABLE_DRIFT_PCT: f64 = 1.0;

/// Base units per whole token (8 decimals).
pub const BASE_UNITS_PER_TOKEN: u64 = 100_000_000;

/// Amounts are rounded down to this step (0.0001 token display precision).
pub const DISPLAY_PRECISION_UNITS: u64 = 10_000;

/// A single planned on-chain action. Consumed exactly once by the
/// execution coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub protocol: Protocol,
    pub kind: OperationKind,
    pub amount_units: u64,
    pub contract: &'static str,
    pub function: &'static str,
}

impl Operation {
    /// Amount in whole tokens, for display.
    pub fn amount_tokens(&self) -> f64 {
        self.amount_units as f64 / BASE_UNITS_PER_TOKEN as f64
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:.4} via {}::{}",
            self.kind,
            self.amount_tokens(),
            self.protocol,
            self.function,
        )
    }
}

/// Why a drifting protocol produced no operation this cycle. Not a
/// failure: the rest of the plan proceeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningSkip {
    pub protocol: Protocol,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SkipReason {
    /// Release suppressed by the preserve-staked-positions policy.
    PreservedStake,
    /// The protocol has no entry point for the required operation kind.
    UnsupportedOperation(OperationKind),
    /// The computed amount rounded down to zero.
    DustAmount,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PreservedStake => write!(f, "staked position preserved"),
            SkipReason::UnsupportedOperation(kind) => {
                write!(f, "no entry point for {kind}")
            }
            SkipReason::DustAmount => write!(f, "amount rounds to zero"),
        }
    }
}

/// The planner's output: operations in execution order plus the protocols
/// it declined to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutcome {
    pub operations: Vec<Operation>,
    pub skipped: Vec<PlanningSkip>,
}

impl PlanOutcome {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Build an operation plan from a drift report.
///
/// # Arguments
/// - `report`: drift analysis for the wallet (records largest-drift-first)
/// - `quote_price_cents`: USD price of one whole token
/// - `settings`: per-wallet policy (preserve-staked flag)
pub fn plan(
    report: &DriftReport,
    quote_price_cents: i64,
    settings: &RebalanceSettings,
) -> PlanOutcome {
    let mut releases = Vec::new();
    let mut deploys = Vec::new();
    let mut skipped = Vec::new();

    for record in &report.records {
        if record.drift_pct < MIN_ACTIONABLE_DRIFT_PCT {
            continue;
        }

        let releasing = record.direction.releases_capital();
        let kind = if releasing {
            record.protocol.release_kind()
        } else {
            record.protocol.deploy_kind()
        };

        if releasing && settings.preserve_staked_positions && record.protocol.is_staking() {
            skipped.push(PlanningSkip {
                protocol: record.protocol,
                reason: SkipReason::PreservedStake,
            });
            continue;
        }

        let Some(function) = record.protocol.function(kind) else {
            skipped.push(PlanningSkip {
                protocol: record.protocol,
                reason: SkipReason::UnsupportedOperation(kind),
            });
            continue;
        };

        let amount_units =
            amount_units(record.drift_pct, report.total_value_cents, quote_price_cents);
        if amount_units == 0 {
            skipped.push(PlanningSkip {
                protocol: record.protocol,
                reason: SkipReason::DustAmount,
            });
            continue;
        }

        let operation = Operation {
            protocol: record.protocol,
            kind,
            amount_units,
            contract: record.protocol.contract(),
            function,
        };
        if releasing {
            releases.push(operation);
        } else {
            deploys.push(operation);
        }
    }

    releases.extend(deploys);
    PlanOutcome {
        operations: releases,
        skipped,
    }
}

/// Token base units to move for a given drift, rounded down to display
/// precision.
fn amount_units(drift_pct: f64, total_value_cents: i64, quote_price_cents: i64) -> u64 {
    if quote_price_cents <= 0 || total_value_cents <= 0 {
        return 0;
    }
    let drift_value_cents = drift_pct / 100.0 * total_value_cents as f64;
    let tokens = drift_value_cents / quote_price_cents as f64;
    // Round to the nearest base unit first so float noise below an exact
    // token count cannot eat a whole display-precision step.
    let units = (tokens * BASE_UNITS_PER_TOKEN as f64).round() as u64;
    units - units % DISPLAY_PRECISION_UNITS
}
