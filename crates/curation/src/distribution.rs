// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Proportional delegator rewards.

use crate::{delegations::DelegationRecord, steem::DynamicGlobalProperties};

/// Exchange ratio between vesting shares and liquid STEEM at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VestingRatio {
    pub steem_per_vest: f64,
}

impl VestingRatio {
    /// `None` when the chain reports no outstanding vesting shares.
    pub fn from_properties(props: &DynamicGlobalProperties) -> Option<Self> {
        let total_vests = props.total_vesting_shares.amount;
        if total_vests <= 0.0 {
            return None;
        }
        Some(Self { steem_per_vest: props.total_vesting_fund_steem.amount / total_vests })
    }

    pub fn vests_to_steem(&self, vests: f64) -> f64 {
        vests * self.steem_per_vest
    }
}

/// Reward owed to one delegator for a distribution period.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegatorReward {
    pub delegator: String,
    pub vesting_shares: f64,
    /// Delegation converted to STEEM power.
    pub steem_power: f64,
    pub share: f64,
    pub reward: f64,
}

/// Split `pool` across `delegations` proportionally to their STEEM power.
///
/// Returns nothing when the total converted stake is zero.
pub fn compute_delegator_rewards(
    delegations: &[DelegationRecord],
    ratio: VestingRatio,
    pool: f64,
) -> Vec<DelegatorReward> {
    let converted: Vec<(&DelegationRecord, f64)> = delegations
        .iter()
        .map(|record| (record, ratio.vests_to_steem(record.vesting_shares).max(0.0)))
        .collect();

    let total: f64 = converted.iter().map(|(_, sp)| sp).sum();
    if total <= 0.0 || !total.is_finite() {
        tracing::info!("No delegated stake to distribute rewards against");
        return Vec::new();
    }

    converted
        .into_iter()
        .filter(|(_, steem_power)| *steem_power > 0.0)
        .map(|(record, steem_power)| {
            let share = steem_power / total;
            DelegatorReward {
                delegator: record.delegator.clone(),
                vesting_shares: record.vesting_shares,
                steem_power,
                share,
                reward: share * pool,
            }
        })
        .collect()
}
