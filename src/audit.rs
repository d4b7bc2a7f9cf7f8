//! JSONL audit trail.
//!
//! Each rebalance run appends events to an audit.jsonl file, one JSON
//! object per line, so a run can be reconstructed after the fact: what the
//! drift looked like, what was planned, what the chain accepted.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::executor::OperationResult;
use crate::planner::PlanOutcome;
use crate::store::{RunStatus, RunTrigger};

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    pub wallet: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, wallet: &str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            wallet: wallet.to_string(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Convenience: log a run start.
pub fn log_run_started(audit: &mut AuditLog, wallet: &str, trigger: RunTrigger) -> Result<()> {
    audit.log(
        "run_started",
        wallet,
        serde_json::json!({ "trigger": trigger.to_string() }),
    )
}

/// Convenience: log the computed drift.
pub fn log_drift(audit: &mut AuditLog, wallet: &str, report: &crate::analyzer::DriftReport) -> Result<()> {
    audit.log(
        "drift_computed",
        wallet,
        serde_json::json!({
            "max_drift": report.max_drift,
            "average_drift": report.average_drift,
            "needs_rebalance": report.needs_rebalance,
            "total_value": report.total_value_cents as f64 / 100.0,
        }),
    )
}

/// Convenience: log the built plan, including protocols skipped by policy.
pub fn log_plan(audit: &mut AuditLog, wallet: &str, plan: &PlanOutcome) -> Result<()> {
    let operations: Vec<_> = plan
        .operations
        .iter()
        .map(|op| {
            serde_json::json!({
                "protocol": op.protocol.to_string(),
                "kind": op.kind.to_string(),
                "amount": op.amount_tokens(),
                "contract": op.contract,
                "function": op.function,
            })
        })
        .collect();
    let skipped: Vec<_> = plan
        .skipped
        .iter()
        .map(|s| {
            serde_json::json!({
                "protocol": s.protocol.to_string(),
                "reason": s.reason.to_string(),
            })
        })
        .collect();

    audit.log(
        "plan_built",
        wallet,
        serde_json::json!({ "operations": operations, "skipped": skipped }),
    )
}

/// Convenience: log one operation's outcome.
pub fn log_operation(audit: &mut AuditLog, wallet: &str, result: &OperationResult) -> Result<()> {
    audit.log(
        "operation_completed",
        wallet,
        serde_json::json!({
            "protocol": result.operation.protocol.to_string(),
            "kind": result.operation.kind.to_string(),
            "amount": result.operation.amount_tokens(),
            "success": result.is_success(),
            "tx_hash": result.tx_hash,
            "error": result.error,
        }),
    )
}

/// Convenience: log run completion.
pub fn log_run_completed(
    audit: &mut AuditLog,
    wallet: &str,
    status: RunStatus,
    succeeded: usize,
    failed: usize,
) -> Result<()> {
    audit.log(
        "run_completed",
        wallet,
        serde_json::json!({
            "status": status.to_string(),
            "succeeded": succeeded,
            "failed": failed,
        }),
    )
}
