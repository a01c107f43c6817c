//! Funding budget estimation.
//!
//! The threshold is what one iteration of the workload needs; the top-up adds
//! 5% headroom per planned loop, since each iteration strands a little value
//! in agent accounts.

use alloy_primitives::U256;

use crate::{
    agents::{payment, swap, vault},
    error::HarnessError,
    ledger::{fee, TRANSFER_GAS_LIMIT},
    workload::{WorkloadDescriptor, WorkloadKind},
};

/// Headroom added to the top-up per planned loop, in percent.
pub const BUFFER_PERCENT_PER_LOOP: u64 = 5;

/// How much value the process account needs and how much to send it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSpec {
    /// Minimum balance required to run one iteration.
    pub threshold: U256,
    /// Amount transferred per top-up; never below `threshold`.
    pub top_up: U256,
}

/// Cost of the funding transfer that seeds one agent.
pub fn base_transfer_cost() -> U256 {
    fee(TRANSFER_GAS_LIMIT)
}

/// Computes the funding needed to run `workload` once, padded for
/// `loop_count` planned iterations.
///
/// Fails with [`HarnessError::NoAssetSelected`] for a payment workload without
/// an asset. Never touches the ledger.
pub fn estimate(
    workload: &WorkloadDescriptor,
    loop_count: u64,
) -> Result<FundingSpec, HarnessError> {
    let agents = U256::from(workload.agent_count);
    let base = base_transfer_cost();

    let raw = match workload.kind {
        WorkloadKind::Payment => {
            let asset = workload.primary_asset().ok_or(HarnessError::NoAssetSelected)?;
            (base + payment::per_transfer_cost(asset, workload.transfers_per_agent)) * agents
        }
        WorkloadKind::UniswapSwap => {
            (base + swap::per_transfer_cost(workload.transfers_per_agent)) * agents
        }
        WorkloadKind::ElementVault => {
            (base + vault::fixed_vault_cost()) * agents + vault::fixed_manual_payment_cost()
        }
    };

    let buffer_percent = U256::from(BUFFER_PERCENT_PER_LOOP) * U256::from(loop_count);
    let top_up = raw * (U256::from(100) + buffer_percent) / U256::from(100);

    Ok(FundingSpec { threshold: raw, top_up })
}

/// Like [`estimate`], but starting from the workload kind's name.
pub fn estimate_named(
    kind: &str,
    agent_count: usize,
    transfers_per_agent: usize,
    asset_ids: Vec<u64>,
    loop_count: u64,
) -> Result<FundingSpec, HarnessError> {
    let workload =
        kind.parse::<WorkloadKind>()?.describe(agent_count, transfers_per_agent, asset_ids);
    estimate(&workload, loop_count)
}
