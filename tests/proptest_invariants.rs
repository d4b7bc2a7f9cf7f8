//! Property-based tests for analyzer and planner invariants.
//!
//! These use proptest to verify that the drift/plan invariants hold
//! across randomly generated portfolios and targets.

use proptest::prelude::*;

use yield_rebalancer::analyzer::{analyze, AllocationEntry, Holding};
use yield_rebalancer::planner::{plan, MIN_ACTIONABLE_DRIFT_PCT};
use yield_rebalancer::protocol::{OperationKind, Protocol};
use yield_rebalancer::scheduler::RebalanceSettings;

fn protocol_strategy() -> impl Strategy<Value = Protocol> {
    prop_oneof![
        Just(Protocol::Amnis),
        Just(Protocol::Thala),
        Just(Protocol::Aries),
        Just(Protocol::Liquidswap),
        Just(Protocol::Native),
    ]
}

fn holdings_strategy() -> impl Strategy<Value = Vec<Holding>> {
    prop::collection::vec((protocol_strategy(), 0i64..=1_000_000_00), 0..6).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(protocol, value_cents)| Holding {
                asset: "0x1::aptos_coin::AptosCoin".into(),
                protocol,
                amount_units: 0,
                value_cents,
            })
            .collect()
    })
}

/// Target allocations with unique protocols, percents scaled so the sum
/// never exceeds 100.
fn target_strategy() -> impl Strategy<Value = Vec<AllocationEntry>> {
    prop::collection::vec((protocol_strategy(), 1.0f64..=50.0), 0..5).prop_map(|pairs| {
        let mut entries: Vec<AllocationEntry> = Vec::new();
        for (protocol, percent) in pairs {
            if entries.iter().all(|e| e.protocol != protocol) {
                entries.push(AllocationEntry { protocol, percent });
            }
        }
        let total: f64 = entries.iter().map(|e| e.percent).sum();
        if total > 100.0 {
            for e in &mut entries {
                e.percent = e.percent / total * 100.0;
            }
        }
        entries
    })
}

fn is_release(kind: OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::Unstake | OperationKind::Withdraw | OperationKind::RemoveLiquidity
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// max_drift is non-negative and equals the maximum over all records.
    #[test]
    fn max_drift_is_the_record_maximum(
        holdings in holdings_strategy(),
        target in target_strategy(),
        threshold in 0.5f64..=50.0,
    ) {
        let report = analyze(&holdings, &target, threshold);

        prop_assert!(report.max_drift >= 0.0);
        let record_max = report
            .records
            .iter()
            .fold(0.0f64, |acc, r| acc.max(r.drift_pct));
        prop_assert_eq!(report.max_drift, record_max);

        for r in &report.records {
            prop_assert_eq!(r.drift_pct, (r.current_pct - r.target_pct).abs());
        }
    }

    /// Identical inputs yield identical reports.
    #[test]
    fn analysis_is_deterministic(
        holdings in holdings_strategy(),
        target in target_strategy(),
        threshold in 0.5f64..=50.0,
    ) {
        let a = analyze(&holdings, &target, threshold);
        let b = analyze(&holdings, &target, threshold);
        prop_assert_eq!(a, b);
    }

    /// A zero-value portfolio never needs rebalancing, whatever the target.
    #[test]
    fn zero_value_never_rebalances(
        target in target_strategy(),
        threshold in 0.5f64..=50.0,
    ) {
        let report = analyze(&[], &target, threshold);
        prop_assert!(!report.needs_rebalance);
        prop_assert!(report.records.is_empty());
    }

    /// Records come out sorted by descending drift.
    #[test]
    fn records_sorted_by_drift(
        holdings in holdings_strategy(),
        target in target_strategy(),
    ) {
        let report = analyze(&holdings, &target, 5.0);
        for pair in report.records.windows(2) {
            prop_assert!(pair[0].drift_pct >= pair[1].drift_pct);
        }
    }

    /// Every release operation precedes every deployment, and no
    /// operation comes from a drift below the actionable minimum.
    #[test]
    fn plans_release_before_deploy_and_skip_dust(
        holdings in holdings_strategy(),
        target in target_strategy(),
    ) {
        let report = analyze(&holdings, &target, 5.0);
        let settings = RebalanceSettings {
            preserve_staked_positions: false,
            ..RebalanceSettings::default()
        };
        let outcome = plan(&report, 10_00, &settings);

        if let Some(first_deploy) = outcome
            .operations
            .iter()
            .position(|op| !is_release(op.kind))
        {
            for op in &outcome.operations[first_deploy..] {
                prop_assert!(!is_release(op.kind), "release after deploy");
            }
        }

        for op in &outcome.operations {
            let record = report
                .records
                .iter()
                .find(|r| r.protocol == op.protocol)
                .expect("operation without a drift record");
            prop_assert!(record.drift_pct >= MIN_ACTIONABLE_DRIFT_PCT);
            prop_assert!(op.amount_units > 0);
        }
    }

    /// With preserve-staked on, no staking protocol is ever unstaked.
    #[test]
    fn preserve_staked_suppresses_unstakes(
        holdings in holdings_strategy(),
        target in target_strategy(),
    ) {
        let report = analyze(&holdings, &target, 5.0);
        let settings = RebalanceSettings::default();
        prop_assert!(settings.preserve_staked_positions);

        let outcome = plan(&report, 10_00, &settings);
        for op in &outcome.operations {
            if op.protocol.is_staking() {
                prop_assert!(!is_release(op.kind));
            }
        }
    }
}
