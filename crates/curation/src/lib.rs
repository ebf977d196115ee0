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

//! Voting power model, vote budgeting and delegation reconciliation for the KnackSteem
//! curation bot.

// Declare modules
pub mod delegations;
pub mod distribution;
pub mod power;
pub mod queue;
pub mod steem;

use thiserror::Error;

// Re-export commonly used types
pub use delegations::{
    history_pages, DelegationAccumulator, DelegationLedgerSync, DelegationRecord,
    DelegationSnapshot, HistoryPage, SyncCheckpoint,
};

pub use distribution::{compute_delegator_rewards, DelegatorReward, VestingRatio};

pub use power::{seconds_to_full, AccountPowerState};

pub use queue::{sort_fifo, QueueEntry, VoteBudget};

pub use steem::{
    Account, Asset, DelegateVestingShares, DynamicGlobalProperties, HistoryCursor, HistoryEntry,
    HistoryItem, Manabar, Operation, RawOperation, SteemApi, SteemApiObj,
};

/// Basis points representing a full-strength vote.
pub const MAX_VOTE_WEIGHT: u16 = 10_000;
/// Largest page the history API serves in a single call.
pub const MAX_HISTORY_PAGE_SIZE: u32 = 10_000;
/// Default page size used when walking account history.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 1_000;

/// Errors surfaced by the chain-facing side of the curation logic.
#[derive(Error, Debug)]
pub enum CurationError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Account {0} has no effective vesting stake")]
    NoEffectiveStake(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Malformed history operation: {0}")]
    MalformedHistory(String),
}
