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

//! Voting power (manabar) model.
//!
//! Voting mana regenerates linearly from empty to full in five days (20% per day). The
//! ceiling is proportional to the account's effective vesting stake.

use crate::{steem::Account, CurationError};

/// Seconds for an empty manabar to fully recharge (5 days).
pub const MANA_REGENERATION_SECONDS: f64 = 432_000.0;
/// Seconds needed to regenerate one percentage point of voting power.
pub const SECONDS_PER_PERCENT: f64 = MANA_REGENERATION_SECONDS / 100.0;
/// Mana units per vest.
pub const MANA_PER_VEST: f64 = 1_000_000.0;

/// Snapshot of the voting account taken from the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountPowerState {
    /// own + received - delegated - withdrawing, in VESTS. May be negative on a
    /// malformed response.
    pub effective_vests: f64,
    /// Mana at `last_update`.
    pub current_mana: f64,
    /// Unix timestamp (seconds) of the last manabar update.
    pub last_update: i64,
}

impl AccountPowerState {
    pub fn from_account(account: &Account) -> Result<Self, CurationError> {
        let effective_vests = account.vesting_shares.amount
            + account.received_vesting_shares.amount
            - account.delegated_vesting_shares.amount
            - account.vesting_withdraw_rate.amount;

        let state = Self {
            effective_vests,
            current_mana: account.voting_manabar.current_mana.max(0.0),
            last_update: account.voting_manabar.last_update_time,
        };

        if state.max_mana() <= 0.0 {
            return Err(CurationError::NoEffectiveStake(account.name.clone()));
        }
        Ok(state)
    }

    /// Mana ceiling derived from the effective stake.
    pub fn max_mana(&self) -> f64 {
        self.effective_vests * MANA_PER_VEST
    }

    /// Mana at `now` (unix seconds), including regeneration since the last update.
    pub fn mana_at(&self, now: i64) -> f64 {
        let max_mana = self.max_mana();
        if max_mana <= 0.0 {
            return 0.0;
        }
        // A clock behind the chain yields no regeneration rather than a drain.
        let elapsed = (now - self.last_update).max(0) as f64;
        (self.current_mana + elapsed * max_mana / MANA_REGENERATION_SECONDS).min(max_mana)
    }

    /// Voting power percentage in [0, 100] at `now` (unix seconds). A full manabar is
    /// exactly 100.
    pub fn current_power(&self, now: i64) -> f64 {
        let max_mana = self.max_mana();
        if max_mana <= 0.0 {
            return 0.0;
        }
        let mana = self.mana_at(now);
        if mana >= max_mana {
            return 100.0;
        }
        (mana * 100.0 / max_mana).clamp(0.0, 100.0)
    }
}

/// Seconds until `power` percent regenerates to 100%.
pub fn seconds_to_full(power: f64) -> f64 {
    (100.0 - power.clamp(0.0, 100.0)) * SECONDS_PER_PERCENT
}
