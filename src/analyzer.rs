//! CURRENT→TARGET drift analysis.
//!
//! Computes how far a wallet's current allocation has moved from its target
//! allocation. Pure: same holdings and target always produce the same
//! report, and nothing is mutated, so it is safe to call concurrently for
//! different wallets.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;

/// A position snapshot from the chain-data provider. Values are USD cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub protocol: Protocol,
    pub amount_units: u64,
    pub value_cents: i64,
}

/// One protocol's share of the portfolio, in percent of total value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub protocol: Protocol,
    pub percent: f64,
}

/// How a protocol's allocation must move to reach its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Present in both, target above current.
    Increase,
    /// Present in both, target at or below current.
    Decrease,
    /// Present only in the target.
    Add,
    /// Present only in current holdings.
    Remove,
}

impl Direction {
    /// True when the move frees capital rather than deploying it.
    pub fn releases_capital(self) -> bool {
        matches!(self, Direction::Decrease | Direction::Remove)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Increase => write!(f, "increase"),
            Direction::Decrease => write!(f, "decrease"),
            Direction::Add => write!(f, "add"),
            Direction::Remove => write!(f, "remove"),
        }
    }
}

/// One protocol's drift between current and target share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftRecord {
    pub protocol: Protocol,
    pub current_pct: f64,
    pub target_pct: f64,
    pub drift_pct: f64,
    pub direction: Direction,
}

/// Full drift report for one wallet, computed fresh per analysis cycle.
///
/// Records are sorted by descending drift; the planner reuses that order
/// as its execution priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub records: Vec<DriftRecord>,
    pub max_drift: f64,
    pub average_drift: f64,
    pub needs_rebalance: bool,
    pub total_value_cents: i64,
}

impl DriftReport {
    /// Report for a portfolio with nothing in it.
    pub fn empty() -> Self {
        DriftReport {
            records: Vec::new(),
            max_drift: 0.0,
            average_drift: 0.0,
            needs_rebalance: false,
            total_value_cents: 0,
        }
    }
}

/// Analyze drift between current holdings and a target allocation.
///
/// # Arguments
/// - `holdings`: current positions from the chain-data provider
/// - `target`: target allocation (percent shares summing to <= 100)
/// - `threshold_pct`: drift at or above this sets `needs_rebalance`
///
/// A zero-value portfolio yields an empty report with
/// `needs_rebalance = false`: there is nothing to move.
pub fn analyze(holdings: &[Holding], target: &[AllocationEntry], threshold_pct: f64) -> DriftReport {
    let total_value_cents: i64 = holdings.iter().map(|h| h.value_cents).sum();
    if total_value_cents <= 0 {
        return DriftReport::empty();
    }

    let mut current_value: FxHashMap<Protocol, i64> = FxHashMap::default();
    for holding in holdings {
        *current_value.entry(holding.protocol).or_insert(0) += holding.value_cents;
    }

    let target_pct: FxHashMap<Protocol, f64> =
        target.iter().map(|t| (t.protocol, t.percent)).collect();

    // Union of protocols appearing on either side.
    let mut protocols: Vec<Protocol> = current_value.keys().copied().collect();
    for t in target {
        if !current_value.contains_key(&t.protocol) {
            protocols.push(t.protocol);
        }
    }

    let mut records = Vec::with_capacity(protocols.len());
    for proto in protocols {
        let current = current_value
            .get(&proto)
            .map(|v| *v as f64 / total_value_cents as f64 * 100.0);
        let target = target_pct.get(&proto).copied();

        let (current_pct, target_pct, direction) = match (current, target) {
            (Some(c), Some(t)) => {
                let dir = if t > c {
                    Direction::Increase
                } else {
                    Direction::Decrease
                };
                (c, t, dir)
            }
            (Some(c), None) => (c, 0.0, Direction::Remove),
            (None, Some(t)) => (0.0, t, Direction::Add),
            (None, None) => unreachable!("protocol came from one of the two maps"),
        };

        records.push(DriftRecord {
            protocol: proto,
            current_pct,
            target_pct,
            drift_pct: (current_pct - target_pct).abs(),
            direction,
        });
    }

    // Largest drift first; protocol order breaks ties so the report is
    // deterministic for identical inputs.
    records.sort_by(|a, b| {
        b.drift_pct
            .total_cmp(&a.drift_pct)
            .then(a.protocol.cmp(&b.protocol))
    });

    let max_drift = records.iter().fold(0.0_f64, |acc, r| acc.max(r.drift_pct));
    let average_drift = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.drift_pct).sum::<f64>() / records.len() as f64
    };

    DriftReport {
        max_drift,
        average_drift,
        needs_rebalance: max_drift >= threshold_pct,
        total_value_cents,
        records,
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DRIFT:")?;
        writeln!(
            f,
            "  {:12} {:>9} {:>9} {:>9}  {}",
            "Protocol", "Current%", "Target%", "Drift%", "Direction"
        )?;
        for r in &self.records {
            writeln!(
                f,
                "  {:12} {:>8.2}% {:>8.2}% {:>8.2}%  {}",
                r.protocol.to_string(),
                r.current_pct,
                r.target_pct,
                r.drift_pct,
                r.direction,
            )?;
        }
        writeln!(
            f,
            "\n  Max drift: {:.2}%  Avg drift: {:.2}%  Rebalance needed: {}",
            self.max_drift,
            self.average_drift,
            if self.needs_rebalance { "yes" } else { "no" },
        )?;
        Ok(())
    }
}
