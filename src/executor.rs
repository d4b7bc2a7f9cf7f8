//! Sequential plan execution against the chain gateway.
//!
//! Operations run strictly one at a time: each depends on wallet
//! nonce/balance state confirmed by the previous one. Failures are
//! contained per operation and recorded; they never abort the run unless
//! `abort_on_failure` is set.

use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::chain::{ChainGateway, TxHash};
use crate::planner::Operation;

/// Observer for per-operation progress. At most one call per operation,
/// in execution order.
pub trait ProgressObserver {
    fn on_progress(&self, pct: f64, message: &str);
}

/// Observer that discards progress.
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_progress(&self, _pct: f64, _message: &str) {}
}

static NULL_PROGRESS: NullProgress = NullProgress;

/// Options for one execution pass.
pub struct ExecOptions<'a> {
    pub max_slippage_pct: f64,
    pub abort_on_failure: bool,
    /// Pause between consecutive submissions. Throttling contract against
    /// nonce/sequencing races on the network, not a tunable optimization.
    pub per_operation_delay: Duration,
    pub observer: &'a dyn ProgressObserver,
}

impl Default for ExecOptions<'static> {
    fn default() -> Self {
        ExecOptions {
            max_slippage_pct: 1.0,
            abort_on_failure: false,
            per_operation_delay: Duration::from_millis(750),
            observer: &NULL_PROGRESS,
        }
    }
}

/// Outcome of one operation, frozen once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    #[serde(flatten)]
    pub operation: Operation,
    pub status: OperationStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failed,
}

impl OperationResult {
    fn success(operation: Operation, tx_hash: TxHash) -> Self {
        OperationResult {
            operation,
            status: OperationStatus::Success,
            tx_hash: Some(tx_hash),
            error: None,
        }
    }

    fn failed(operation: Operation, error: String) -> Self {
        OperationResult {
            operation,
            status: OperationStatus::Failed,
            tx_hash: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Outcome of a full execution pass. `success` is true only when nothing
/// failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// All attempted operations, in execution order.
    pub results: Vec<OperationResult>,
}

impl ExecutionResult {
    /// Successful operations, in execution order.
    pub fn operations(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    /// Failed operations, in execution order.
    pub fn failed_operations(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.operations().len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_operations().len()
    }

    pub fn attempted(&self) -> usize {
        self.results.len()
    }
}

/// Execute a plan against the chain, one operation at a time.
///
/// An empty plan succeeds without contacting the network.
pub fn execute(
    wallet: &str,
    operations: &[Operation],
    chain: &dyn ChainGateway,
    opts: &ExecOptions<'_>,
) -> ExecutionResult {
    let mut results = Vec::with_capacity(operations.len());

    let total = operations.len();
    for (index, operation) in operations.iter().enumerate() {
        let result = submit_one(wallet, operation, chain, opts.max_slippage_pct);

        let pct = (index + 1) as f64 / total as f64 * 100.0;
        let message = if result.is_success() {
            format!(
                "[{}/{}] {} confirmed ({})",
                index + 1,
                total,
                operation,
                result.tx_hash.as_deref().unwrap_or(""),
            )
        } else {
            format!(
                "[{}/{}] {} failed: {}",
                index + 1,
                total,
                operation,
                result.error.as_deref().unwrap_or("unknown error"),
            )
        };
        opts.observer.on_progress(pct, &message);

        if result.is_success() {
            info!("{wallet}: {message}");
        } else {
            warn!("{wallet}: {message}");
        }
        let failed = !result.is_success();
        results.push(result);
        if failed && opts.abort_on_failure {
            break;
        }

        if index + 1 < total && !opts.per_operation_delay.is_zero() {
            std::thread::sleep(opts.per_operation_delay);
        }
    }

    ExecutionResult {
        success: results.iter().all(|r| r.is_success()),
        results,
    }
}

/// Validate and submit a single operation, containing any chain error.
fn submit_one(
    wallet: &str,
    operation: &Operation,
    chain: &dyn ChainGateway,
    max_slippage_pct: f64,
) -> OperationResult {
    if operation.amount_units == 0 {
        return OperationResult::failed(operation.clone(), "operation amount is zero".into());
    }
    if operation.contract.is_empty() {
        return OperationResult::failed(operation.clone(), "missing target contract".into());
    }

    match chain.sign_and_submit(wallet, operation, max_slippage_pct) {
        Ok(tx_hash) => OperationResult::success(operation.clone(), tx_hash),
        Err(e) => OperationResult::failed(operation.clone(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::chain::SimulatedChain;
    use crate::protocol::{OperationKind, Protocol};

    fn op(protocol: Protocol, releasing: bool) -> Operation {
        let kind = if releasing {
            protocol.release_kind()
        } else {
            protocol.deploy_kind()
        };
        Operation {
            protocol,
            kind,
            amount_units: 5_000_000,
            contract: protocol.contract(),
            function: protocol.function(kind).unwrap(),
        }
    }

    fn no_delay() -> ExecOptions<'static> {
        ExecOptions {
            per_operation_delay: Duration::ZERO,
            ..ExecOptions::default()
        }
    }

    struct Recorder {
        calls: Mutex<Vec<(f64, String)>>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, pct: f64, message: &str) {
            self.calls.lock().unwrap().push((pct, message.to_string()));
        }
    }

    #[test]
    fn empty_plan_succeeds_without_network() {
        let chain = SimulatedChain::new(10_00);
        let result = execute("0xw", &[], &chain, &no_delay());
        assert!(result.success);
        assert!(result.operations().is_empty());
        assert!(result.failed_operations().is_empty());
        assert_eq!(chain.submission_count(), 0);
    }

    #[test]
    fn failure_does_not_stop_later_operations() {
        let chain = SimulatedChain::new(10_00);
        chain.fail_protocol(Protocol::Amnis);

        let plan = vec![
            op(Protocol::Native, true),
            op(Protocol::Amnis, true),
            op(Protocol::Thala, false),
        ];
        let result = execute("0xw", &plan, &chain, &no_delay());

        assert!(!result.success);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(
            result.failed_operations()[0].operation.protocol,
            Protocol::Amnis
        );
        assert_eq!(result.succeeded_count(), 2);
        // Operation 3 was attempted after operation 2 failed, and the
        // failure sits between the successes in execution order.
        assert_eq!(chain.submission_count(), 2);
        assert!(!result.results[1].is_success());
    }

    #[test]
    fn abort_on_failure_stops_the_pass() {
        let chain = SimulatedChain::new(10_00);
        chain.fail_protocol(Protocol::Native);

        let plan = vec![op(Protocol::Native, true), op(Protocol::Thala, false)];
        let opts = ExecOptions {
            abort_on_failure: true,
            ..no_delay()
        };
        let result = execute("0xw", &plan, &chain, &opts);

        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.succeeded_count(), 0);
        // The thala deployment was never attempted.
        assert_eq!(chain.submission_count(), 0);
        assert_eq!(result.attempted(), 1);
    }

    #[test]
    fn zero_amount_is_recorded_failed_without_submission() {
        let chain = SimulatedChain::new(10_00);
        let mut bad = op(Protocol::Aries, true);
        bad.amount_units = 0;

        let result = execute("0xw", &[bad, op(Protocol::Thala, false)], &chain, &no_delay());

        assert_eq!(result.failed_count(), 1);
        assert!(result.failed_operations()[0]
            .error
            .as_deref()
            .unwrap()
            .contains("zero"));
        // Only the valid operation reached the chain.
        assert_eq!(chain.submission_count(), 1);
    }

    #[test]
    fn progress_fires_once_per_operation_in_order() {
        let chain = SimulatedChain::new(10_00);
        chain.fail_protocol(Protocol::Amnis);
        let recorder = Recorder::new();

        let plan = vec![
            op(Protocol::Native, true),
            op(Protocol::Amnis, true),
            op(Protocol::Thala, false),
        ];
        let opts = ExecOptions {
            observer: &recorder,
            per_operation_delay: Duration::ZERO,
            ..ExecOptions::default()
        };
        execute("0xw", &plan, &chain, &opts);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let pcts: Vec<f64> = calls.iter().map(|(p, _)| *p).collect();
        assert!(pcts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pcts[2], 100.0);
        // Failures are reported too.
        assert!(calls[1].1.contains("failed"));
    }

    #[test]
    fn results_carry_tx_hashes() {
        let chain = SimulatedChain::new(10_00);
        let result = execute("0xw", &[op(Protocol::Native, true)], &chain, &no_delay());
        assert!(result.success);
        assert!(result.results[0]
            .tx_hash
            .as_deref()
            .unwrap()
            .starts_with("0xsim"));
    }
}
