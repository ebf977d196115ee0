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

//! Chain data types and the query API the curation logic depends on.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::CurationError;

pub type SteemApiObj = Arc<dyn SteemApi + Send + Sync>;

/// Read-only view of the chain used by the bot.
#[async_trait]
pub trait SteemApi {
    /// Fetch a single account by name.
    async fn get_account(&self, name: &str) -> Result<Account, CurationError>;

    /// Fetch up to `limit + 1` history operations ending at `start`, oldest first.
    async fn get_account_history(
        &self,
        account: &str,
        start: HistoryCursor,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, CurationError>;

    /// Fetch the global chain totals used to convert vests into STEEM.
    async fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, CurationError>;
}

/// An amount with its symbol, as rendered by the condenser API (`"1.000000 VESTS"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Asset {
    pub amount: f64,
    pub symbol: String,
}

impl Asset {
    pub fn new(amount: f64, symbol: impl Into<String>) -> Self {
        Self { amount, symbol: symbol.into() }
    }

    pub fn vests(amount: f64) -> Self {
        Self::new(amount, "VESTS")
    }

    pub fn steem(amount: f64) -> Self {
        Self::new(amount, "STEEM")
    }
}

impl FromStr for Asset {
    type Err = CurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(symbol), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CurationError::InvalidAsset(s.to_string()));
        };
        let amount = amount.parse::<f64>().map_err(|_| CurationError::InvalidAsset(s.to_string()))?;
        if !amount.is_finite() {
            return Err(CurationError::InvalidAsset(s.to_string()));
        }
        Ok(Self { amount, symbol: symbol.to_string() })
    }
}

impl TryFrom<String> for Asset {
    type Error = CurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = if self.symbol == "VESTS" { 6 } else { 3 };
        write!(f, "{:.*} {}", precision, self.amount, self.symbol)
    }
}

/// Mana is returned either as a JSON number or as a decimal string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ManaValue {
    Number(f64),
    Text(String),
}

impl TryFrom<ManaValue> for f64 {
    type Error = String;

    fn try_from(value: ManaValue) -> Result<Self, Self::Error> {
        match value {
            ManaValue::Number(n) => Ok(n),
            ManaValue::Text(s) => s.parse().map_err(|_| format!("invalid mana value {s}")),
        }
    }
}

fn deserialize_mana<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = ManaValue::deserialize(deserializer)?;
    f64::try_from(raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manabar {
    #[serde(deserialize_with = "deserialize_mana")]
    pub current_mana: f64,
    pub last_update_time: i64,
}

/// The subset of an account record the bot needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub name: String,
    pub vesting_shares: Asset,
    pub received_vesting_shares: Asset,
    pub delegated_vesting_shares: Asset,
    pub vesting_withdraw_rate: Asset,
    pub voting_manabar: Manabar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    #[serde(default)]
    pub head_block_number: u64,
    pub total_vesting_fund_steem: Asset,
    pub total_vesting_shares: Asset,
}

/// Starting point of an account history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCursor {
    /// The most recent operation.
    Latest,
    At(u64),
}

impl HistoryCursor {
    /// Value passed as the `start` parameter of `get_account_history`.
    pub fn as_param(&self) -> i64 {
        match self {
            HistoryCursor::Latest => -1,
            HistoryCursor::At(seq) => i64::try_from(*seq).unwrap_or(i64::MAX),
        }
    }
}

impl Serialize for HistoryCursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_param())
    }
}

/// Operation payload as returned by the condenser API: `[name, {..}]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOperation(pub String, pub serde_json::Value);

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub block: u64,
    #[serde(default)]
    pub trx_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub op: RawOperation,
}

/// One account history operation with its per-account sequence number.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "(u64, HistoryItem)")]
pub struct HistoryEntry {
    pub sequence: u64,
    pub item: HistoryItem,
}

impl From<(u64, HistoryItem)> for HistoryEntry {
    fn from((sequence, item): (u64, HistoryItem)) -> Self {
        Self { sequence, item }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegateVestingShares {
    pub delegator: String,
    pub delegatee: String,
    pub vesting_shares: Asset,
}

#[derive(Debug, Clone)]
pub enum Operation {
    DelegateVestingShares(DelegateVestingShares),
    Other(String),
}

impl HistoryItem {
    pub fn new(
        block: u64,
        trx_id: impl Into<String>,
        op_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self { block, trx_id: trx_id.into(), timestamp: None, op: RawOperation(op_name.into(), payload) }
    }

    pub fn op_name(&self) -> &str {
        &self.op.0
    }

    /// Decode the operation payload. Only the operations the bot reacts to are typed.
    pub fn operation(&self) -> Result<Operation, CurationError> {
        match self.op.0.as_str() {
            "delegate_vesting_shares" => serde_json::from_value(self.op.1.clone())
                .map(Operation::DelegateVestingShares)
                .map_err(|e| CurationError::MalformedHistory(format!("{}: {e}", self.trx_id))),
            other => Ok(Operation::Other(other.to_string())),
        }
    }
}
