//! Wallet snapshot (snapshot.json) loading and validation.
//!
//! A snapshot captures what the chain-data and AI collaborators would
//! return for one wallet: holdings, the quote price, and the recommended
//! target allocation. The CLI rehearses plans against it through the
//! simulated chain.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::analyzer::{AllocationEntry, Holding};
use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// A wallet snapshot from the dashboard's data layer.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletSnapshot {
    pub wallet: String,
    pub timestamp: DateTime<Utc>,
    pub quote_price_cents: i64,
    pub holdings: Vec<SnapshotHolding>,
    pub target: Vec<SnapshotTarget>,
    /// Protocols scripted to fail during rehearsal.
    #[serde(default)]
    pub failing_protocols: Vec<String>,
}

/// One position as reported by the chain-data provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotHolding {
    pub asset: String,
    pub protocol: String,
    pub amount_units: u64,
    pub value_cents: i64,
}

/// One leg of the recommended allocation.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotTarget {
    pub protocol: String,
    pub percent: f64,
    #[serde(default)]
    pub expected_yield_pct: Option<f64>,
}

impl WalletSnapshot {
    /// Load and validate a snapshot.json file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::SnapshotRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot: WalletSnapshot = serde_json::from_str(&contents)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: WalletSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Validate the snapshot.
    fn validate(&self) -> Result<()> {
        if self.wallet.is_empty() || !self.wallet.starts_with("0x") {
            return Err(Error::Snapshot(format!(
                "wallet address '{}' must start with 0x",
                self.wallet
            )));
        }
        if self.quote_price_cents <= 0 {
            return Err(Error::Snapshot("quote_price_cents must be > 0".into()));
        }

        for h in &self.holdings {
            parse_protocol(&h.protocol)?;
            if h.value_cents < 0 {
                return Err(Error::Snapshot(format!(
                    "holding {} has negative value",
                    h.protocol
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for t in &self.target {
            let protocol = parse_protocol(&t.protocol)?;
            if !seen.insert(protocol) {
                return Err(Error::Snapshot(format!(
                    "duplicate target protocol: {}",
                    t.protocol
                )));
            }
            if t.percent <= 0.0 || t.percent > 100.0 {
                return Err(Error::Snapshot(format!(
                    "target percent for {} ({}) must be in (0, 100]; omit zero legs",
                    t.protocol, t.percent
                )));
            }
        }

        let total: f64 = self.target.iter().map(|t| t.percent).sum();
        if total > 100.0 {
            return Err(Error::Snapshot(format!(
                "target percentages sum to {total:.2} (> 100)"
            )));
        }

        for p in &self.failing_protocols {
            parse_protocol(p)?;
        }

        Ok(())
    }

    /// Holdings as engine types.
    pub fn holdings(&self) -> Result<Vec<Holding>> {
        self.holdings
            .iter()
            .map(|h| {
                Ok(Holding {
                    asset: h.asset.clone(),
                    protocol: parse_protocol(&h.protocol)?,
                    amount_units: h.amount_units,
                    value_cents: h.value_cents,
                })
            })
            .collect()
    }

    /// Target allocation as engine types.
    pub fn target(&self) -> Result<Vec<AllocationEntry>> {
        self.target
            .iter()
            .map(|t| {
                Ok(AllocationEntry {
                    protocol: parse_protocol(&t.protocol)?,
                    percent: t.percent,
                })
            })
            .collect()
    }

    /// Protocols scripted to fail.
    pub fn failing(&self) -> Result<Vec<Protocol>> {
        self.failing_protocols
            .iter()
            .map(|p| parse_protocol(p))
            .collect()
    }
}

fn parse_protocol(name: &str) -> Result<Protocol> {
    Protocol::from_str(name).map_err(|e| Error::Snapshot(e.to_string()))
}
