//! Chain and allocation collaborator seams.
//!
//! The engine never talks to a node or a signer directly: it goes through
//! [`ChainGateway`] for holdings, prices, and transaction submission, and
//! [`AllocationProvider`] for target allocations. Production wires these to
//! the RPC/signing stack; tests and the CLI use [`SimulatedChain`], a
//! deterministic in-process implementation with scripted failures.

use std::str::FromStr;
use std::sync::Mutex;
use std::sync::PoisonError;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analyzer::{AllocationEntry, Holding};
use crate::planner::Operation;
use crate::protocol::Protocol;

/// Opaque transaction identifier returned by the chain on success.
pub type TxHash = String;

/// Failures surfaced by the chain/signing collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("transaction confirmation timed out")]
    Timeout,

    #[error("signature rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance for {0}")]
    InsufficientBalance(String),

    #[error("contract aborted: {0}")]
    Reverted(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Minimal chain API the engine needs.
pub trait ChainGateway: Send + Sync {
    /// Current holdings across all supported protocols.
    fn holdings(&self, wallet: &str) -> ChainResult<Vec<Holding>>;

    /// USD price of one whole quote token, in cents.
    fn quote_price_cents(&self) -> ChainResult<i64>;

    /// Sign and submit one operation, blocking until confirmation.
    fn sign_and_submit(
        &self,
        wallet: &str,
        operation: &Operation,
        max_slippage_pct: f64,
    ) -> ChainResult<TxHash>;
}

/// Coarse appetite profile used when asking for a target allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskProfile::Conservative => write!(f, "conservative"),
            RiskProfile::Balanced => write!(f, "balanced"),
            RiskProfile::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl FromStr for RiskProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "balanced" => Ok(RiskProfile::Balanced),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(format!("unknown risk profile: {other}")),
        }
    }
}

/// Source of target allocations (the AI recommendation service in
/// production).
pub trait AllocationProvider: Send + Sync {
    fn target_allocation(
        &self,
        wallet: &str,
        profile: RiskProfile,
    ) -> ChainResult<Vec<AllocationEntry>>;
}

/// Fixed target allocation, the same for every wallet. Backs the CLI
/// (snapshot-supplied target) and tests.
pub struct FixedAllocation {
    entries: Vec<AllocationEntry>,
}

impl FixedAllocation {
    pub fn new(entries: Vec<AllocationEntry>) -> Self {
        FixedAllocation { entries }
    }
}

impl AllocationProvider for FixedAllocation {
    fn target_allocation(
        &self,
        _wallet: &str,
        _profile: RiskProfile,
    ) -> ChainResult<Vec<AllocationEntry>> {
        Ok(self.entries.clone())
    }
}

/// Static per-risk-profile allocation table, the fallback when no AI
/// recommendation is available.
pub struct RiskProfileTable;

impl AllocationProvider for RiskProfileTable {
    fn target_allocation(
        &self,
        _wallet: &str,
        profile: RiskProfile,
    ) -> ChainResult<Vec<AllocationEntry>> {
        let table: &[(Protocol, f64)] = match profile {
            RiskProfile::Conservative => &[
                (Protocol::Native, 60.0),
                (Protocol::Amnis, 25.0),
                (Protocol::Aries, 15.0),
            ],
            RiskProfile::Balanced => &[
                (Protocol::Native, 30.0),
                (Protocol::Amnis, 30.0),
                (Protocol::Thala, 20.0),
                (Protocol::Aries, 20.0),
            ],
            RiskProfile::Aggressive => &[
                (Protocol::Amnis, 30.0),
                (Protocol::Thala, 30.0),
                (Protocol::Aries, 25.0),
                (Protocol::Liquidswap, 15.0),
            ],
        };
        Ok(table
            .iter()
            .map(|&(protocol, percent)| AllocationEntry { protocol, percent })
            .collect())
    }
}

/// A submission accepted by the simulated chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSubmission {
    pub wallet: String,
    pub operation: Operation,
    pub tx_hash: TxHash,
}

#[derive(Default)]
struct SimState {
    holdings: FxHashMap<String, Vec<Holding>>,
    failing: FxHashSet<Protocol>,
    submissions: Vec<SimulatedSubmission>,
    next_tx: u64,
}

/// Deterministic in-process chain for rehearsing plans and testing the
/// engine. Submissions succeed with synthetic hashes unless the protocol
/// has been scripted to fail.
pub struct SimulatedChain {
    quote_price_cents: i64,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    pub fn new(quote_price_cents: i64) -> Self {
        SimulatedChain {
            quote_price_cents,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_holdings(&self, wallet: &str, holdings: Vec<Holding>) {
        self.state().holdings.insert(wallet.to_string(), holdings);
    }

    /// Script every submission touching `protocol` to abort.
    pub fn fail_protocol(&self, protocol: Protocol) {
        self.state().failing.insert(protocol);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Submissions accepted so far, in order.
    pub fn submissions(&self) -> Vec<SimulatedSubmission> {
        self.state().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state().submissions.len()
    }
}

impl ChainGateway for SimulatedChain {
    fn holdings(&self, wallet: &str) -> ChainResult<Vec<Holding>> {
        Ok(self.state().holdings.get(wallet).cloned().unwrap_or_default())
    }

    fn quote_price_cents(&self) -> ChainResult<i64> {
        Ok(self.quote_price_cents)
    }

    fn sign_and_submit(
        &self,
        wallet: &str,
        operation: &Operation,
        _max_slippage_pct: f64,
    ) -> ChainResult<TxHash> {
        let mut state = self.state();
        if state.failing.contains(&operation.protocol) {
            return Err(ChainError::Reverted(format!(
                "{}::{} aborted",
                operation.contract, operation.function
            )));
        }
        let tx_hash = format!("0xsim{:08x}", state.next_tx);
        state.next_tx += 1;
        state.submissions.push(SimulatedSubmission {
            wallet: wallet.to_string(),
            operation: operation.clone(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OperationKind;

    fn op(protocol: Protocol) -> Operation {
        let kind = protocol.release_kind();
        Operation {
            protocol,
            kind,
            amount_units: 1_000_000,
            contract: protocol.contract(),
            function: protocol.function(kind).unwrap(),
        }
    }

    #[test]
    fn simulated_submissions_get_unique_hashes() {
        let chain = SimulatedChain::new(10_00);
        let a = chain.sign_and_submit("0xw", &op(Protocol::Amnis), 1.0).unwrap();
        let b = chain.sign_and_submit("0xw", &op(Protocol::Aries), 1.0).unwrap();
        assert_ne!(a, b);
        assert_eq!(chain.submission_count(), 2);
    }

    #[test]
    fn scripted_failure_rejects_submission() {
        let chain = SimulatedChain::new(10_00);
        chain.fail_protocol(Protocol::Thala);

        let err = chain
            .sign_and_submit("0xw", &op(Protocol::Thala), 1.0)
            .unwrap_err();
        assert!(matches!(err, ChainError::Reverted(_)));
        assert_eq!(chain.submission_count(), 0);

        chain.clear_failures();
        assert!(chain.sign_and_submit("0xw", &op(Protocol::Thala), 1.0).is_ok());
    }

    #[test]
    fn holdings_default_to_empty() {
        let chain = SimulatedChain::new(10_00);
        assert!(chain.holdings("0xnobody").unwrap().is_empty());
    }

    #[test]
    fn risk_profile_table_sums_to_hundred() {
        for profile in [
            RiskProfile::Conservative,
            RiskProfile::Balanced,
            RiskProfile::Aggressive,
        ] {
            let entries = RiskProfileTable.target_allocation("0xw", profile).unwrap();
            let sum: f64 = entries.iter().map(|e| e.percent).sum();
            assert_eq!(sum, 100.0, "{profile} table must sum to 100");
        }
    }

    #[test]
    fn fixed_allocation_ignores_wallet() {
        let provider = FixedAllocation::new(vec![AllocationEntry {
            protocol: Protocol::Amnis,
            percent: 100.0,
        }]);
        let a = provider
            .target_allocation("0xa", RiskProfile::Balanced)
            .unwrap();
        let b = provider
            .target_allocation("0xb", RiskProfile::Aggressive)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn risk_profile_parse() {
        assert_eq!(
            "aggressive".parse::<RiskProfile>().unwrap(),
            RiskProfile::Aggressive
        );
        assert!("yolo".parse::<RiskProfile>().is_err());
    }
}
