//! Workload description.

use std::{fmt, str::FromStr};

use crate::{error::HarnessError, ledger::AssetId};

/// The kinds of workload the harness can fund and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// Agents pay each other in the selected asset.
    Payment,
    /// Agents swap against a liquidity pool.
    UniswapSwap,
    /// Agents deposit into a vault.
    ElementVault,
}

impl WorkloadKind {
    /// All supported kinds.
    pub const ALL: [WorkloadKind; 3] = [Self::Payment, Self::UniswapSwap, Self::ElementVault];

    /// Canonical command-line name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::UniswapSwap => "uniswap-swap",
            Self::ElementVault => "element-vault",
        }
    }

    /// Builds a descriptor for this kind.
    pub fn describe(
        self,
        agent_count: usize,
        transfers_per_agent: usize,
        asset_ids: Vec<AssetId>,
    ) -> WorkloadDescriptor {
        WorkloadDescriptor { kind: self, agent_count, transfers_per_agent, asset_ids }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = HarnessError;

    /// Accepts the canonical names plus the camel-case spellings
    /// (`uniswapSwap`, `elementVault`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "uniswap-swap" | "uniswapSwap" | "uniswap_swap" => Ok(Self::UniswapSwap),
            "element-vault" | "elementVault" | "element_vault" => Ok(Self::ElementVault),
            other => Err(HarnessError::UnsupportedWorkloadKind(other.to_string())),
        }
    }
}

/// Static description of the workload a process runs every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    /// What the agents do.
    pub kind: WorkloadKind,
    /// Number of agents per batch.
    pub agent_count: usize,
    /// Transfers each agent issues.
    pub transfers_per_agent: usize,
    /// Assets the workload touches, in order of preference.
    pub asset_ids: Vec<AssetId>,
}

impl WorkloadDescriptor {
    /// The primary asset, if one is selected.
    pub fn primary_asset(&self) -> Option<AssetId> {
        self.asset_ids.first().copied()
    }
}
