//! Supported protocol registry.
//!
//! A closed enumeration of the protocols the engine can move value between.
//! Each variant knows its category, its on-chain entry module, and the
//! function it exposes for each operation kind, so an unsupported
//! protocol/operation pairing is visible at planning time instead of as a
//! runtime lookup miss deep in execution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A protocol position the engine can rebalance across.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Amnis Finance liquid staking (amAPT).
    Amnis,
    /// Thala liquid staking (thAPT).
    Thala,
    /// Aries Markets lending.
    Aries,
    /// Liquidswap AMM liquidity.
    Liquidswap,
    /// Native delegation-pool staking.
    Native,
}

/// Broad category of a protocol. Drives which operation kinds apply and
/// whether the preserve-staked-positions policy covers it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolClass {
    LiquidStaking,
    Lending,
    Liquidity,
    Delegation,
}

/// A single on-chain action kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Stake,
    Unstake,
    Lend,
    Withdraw,
    AddLiquidity,
    RemoveLiquidity,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Amnis,
        Protocol::Thala,
        Protocol::Aries,
        Protocol::Liquidswap,
        Protocol::Native,
    ];

    pub fn class(self) -> ProtocolClass {
        match self {
            Protocol::Amnis | Protocol::Thala => ProtocolClass::LiquidStaking,
            Protocol::Aries => ProtocolClass::Lending,
            Protocol::Liquidswap => ProtocolClass::Liquidity,
            Protocol::Native => ProtocolClass::Delegation,
        }
    }

    /// True for protocols whose positions are staked. The
    /// preserve-staked-positions policy suppresses release operations for
    /// these.
    pub fn is_staking(self) -> bool {
        matches!(
            self.class(),
            ProtocolClass::LiquidStaking | ProtocolClass::Delegation
        )
    }

    /// Operation kind that deploys capital into this protocol.
    pub fn deploy_kind(self) -> OperationKind {
        match self.class() {
            ProtocolClass::LiquidStaking | ProtocolClass::Delegation => OperationKind::Stake,
            ProtocolClass::Lending => OperationKind::Lend,
            ProtocolClass::Liquidity => OperationKind::AddLiquidity,
        }
    }

    /// Operation kind that frees capital from this protocol.
    ///
    /// Delegation pools release through `withdraw`, not `unstake`.
    pub fn release_kind(self) -> OperationKind {
        match self.class() {
            ProtocolClass::LiquidStaking => OperationKind::Unstake,
            ProtocolClass::Lending | ProtocolClass::Delegation => OperationKind::Withdraw,
            ProtocolClass::Liquidity => OperationKind::RemoveLiquidity,
        }
    }

    /// Entry module address for this protocol's router.
    pub fn contract(self) -> &'static str {
        match self {
            Protocol::Amnis => {
                "0x111ae3e5bc816a5e63c2da97d0aa3886519e0cd5e4b046659fa35796bd11542a::router"
            }
            Protocol::Thala => {
                "0xfaf4e633ae9eb31366c9ca24214231760926576c7b625313b3688b5e900731f6::staking"
            }
            Protocol::Aries => {
                "0x9770fa9c725cbd97eb50b2be5f7416efdfd1f1554beb0750d4dae4c64e860da3::controller"
            }
            Protocol::Liquidswap => {
                "0x190d44266241744264b964a37b8f09863167a12d3e70cda39376cfb4e3561e12::scripts_v2"
            }
            Protocol::Native => "0x1::delegation_pool",
        }
    }

    /// Entry function for an operation kind, if this protocol supports it.
    ///
    /// Liquidswap has no single-sided deposit entry point (adding liquidity
    /// needs a paired leg), so `AddLiquidity` resolves to `None` there and
    /// the planner skips the protocol for that cycle.
    pub fn function(self, kind: OperationKind) -> Option<&'static str> {
        match (self, kind) {
            (Protocol::Amnis, OperationKind::Stake) => Some("deposit_and_stake_entry"),
            (Protocol::Amnis, OperationKind::Unstake) => Some("unstake_entry"),
            (Protocol::Thala, OperationKind::Stake) => Some("stake_apt"),
            (Protocol::Thala, OperationKind::Unstake) => Some("unstake_thapt"),
            (Protocol::Aries, OperationKind::Lend) => Some("deposit"),
            (Protocol::Aries, OperationKind::Withdraw) => Some("withdraw"),
            (Protocol::Liquidswap, OperationKind::RemoveLiquidity) => Some("remove_liquidity"),
            (Protocol::Native, OperationKind::Stake) => Some("add_stake"),
            (Protocol::Native, OperationKind::Withdraw) => Some("withdraw"),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Amnis => "amnis",
            Protocol::Thala => "thala",
            Protocol::Aries => "aries",
            Protocol::Liquidswap => "liquidswap",
            Protocol::Native => "native",
        };
        write!(f, "{name}")
    }
}

/// A protocol name the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amnis" => Ok(Protocol::Amnis),
            "thala" => Ok(Protocol::Thala),
            "aries" => Ok(Protocol::Aries),
            "liquidswap" => Ok(Protocol::Liquidswap),
            "native" => Ok(Protocol::Native),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Stake => "stake",
            OperationKind::Unstake => "unstake",
            OperationKind::Lend => "lend",
            OperationKind::Withdraw => "withdraw",
            OperationKind::AddLiquidity => "addLiquidity",
            OperationKind::RemoveLiquidity => "removeLiquidity",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for proto in Protocol::ALL {
            let parsed: Protocol = proto.to_string().parse().unwrap();
            assert_eq!(parsed, proto);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("AMNIS".parse::<Protocol>().unwrap(), Protocol::Amnis);
        assert_eq!("Thala".parse::<Protocol>().unwrap(), Protocol::Thala);
    }

    #[test]
    fn reject_unknown_protocol() {
        let err = "pancakeswap".parse::<Protocol>().unwrap_err();
        assert_eq!(err, UnknownProtocol("pancakeswap".into()));
    }

    #[test]
    fn staking_classification() {
        assert!(Protocol::Amnis.is_staking());
        assert!(Protocol::Thala.is_staking());
        assert!(Protocol::Native.is_staking());
        assert!(!Protocol::Aries.is_staking());
        assert!(!Protocol::Liquidswap.is_staking());
    }

    #[test]
    fn native_releases_through_withdraw() {
        assert_eq!(Protocol::Native.release_kind(), OperationKind::Withdraw);
        assert_eq!(Protocol::Amnis.release_kind(), OperationKind::Unstake);
    }

    #[test]
    fn every_release_kind_has_a_function() {
        for proto in Protocol::ALL {
            assert!(
                proto.function(proto.release_kind()).is_some(),
                "{proto} has no release entry point"
            );
        }
    }

    #[test]
    fn liquidswap_has_no_single_sided_deposit() {
        assert_eq!(Protocol::Liquidswap.function(OperationKind::AddLiquidity), None);
        assert!(Protocol::Amnis.function(OperationKind::Stake).is_some());
    }

    #[test]
    fn contracts_are_nonempty() {
        for proto in Protocol::ALL {
            assert!(!proto.contract().is_empty());
        }
    }
}
