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

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use knacksteem_bot::{
    BroadcastError, BroadcastReceipt, Broadcaster, ChainOperation, CurationBotDb, CurationDb,
    CurationDbObj, DbError, DrainerConfig, QueueDrainer, VoteCaster,
};
use knacksteem_curation::{
    Account, Asset, CurationError, DelegationSnapshot, DynamicGlobalProperties, HistoryCursor,
    HistoryEntry, HistoryItem, Manabar, QueueEntry, SteemApi,
};
use serde_json::json;
use tempfile::NamedTempFile;

pub const BOT: &str = "knacksteem.org";
pub const BOT_VESTS: f64 = 1_000_000.0;

// Keeps the temp file alive as long as the database is in use
pub struct TestDb {
    pub db: Arc<CurationDb>,
    _temp_file: NamedTempFile,
}

pub async fn setup_test_db() -> TestDb {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_file.path().to_str().expect("Invalid temp path");
    let db_url = format!("sqlite:{}", db_path);

    let db = Arc::new(CurationDb::new(&db_url).await.expect("Failed to create database"));
    TestDb { db, _temp_file: temp_file }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn entry(author: &str, permlink: &str, weight: u16, created: i64) -> QueueEntry {
    QueueEntry::new(author, permlink, weight, ts(created))
}

pub fn delegation(seq: u64, block: u64, delegator: &str, vests: f64) -> HistoryEntry {
    HistoryEntry {
        sequence: seq,
        item: HistoryItem::new(
            block,
            format!("trx-{seq}"),
            "delegate_vesting_shares",
            json!({
                "delegator": delegator,
                "delegatee": BOT,
                "vesting_shares": format!("{vests:.6} VESTS"),
            }),
        ),
    }
}

/// In-memory chain: one voting account, its history and the global properties.
pub struct FakeChain {
    account: Mutex<Account>,
    history: Mutex<Vec<HistoryEntry>>,
    props: Mutex<DynamicGlobalProperties>,
    offline: AtomicBool,
    history_requests: AtomicUsize,
}

impl FakeChain {
    /// Bot account whose manabar holds `power` percent at `now`.
    pub fn with_power(power: f64, now: DateTime<Utc>) -> Self {
        Self::from_account(Account {
            name: BOT.to_string(),
            vesting_shares: Asset::vests(BOT_VESTS),
            received_vesting_shares: Asset::vests(0.0),
            delegated_vesting_shares: Asset::vests(0.0),
            vesting_withdraw_rate: Asset::vests(0.0),
            voting_manabar: Manabar {
                current_mana: BOT_VESTS * 1_000_000.0 * power / 100.0,
                last_update_time: now.timestamp(),
            },
        })
    }

    /// Bot account with the given stake components whose manabar was empty at `last_update`.
    pub fn with_stake(
        vesting: f64,
        received: f64,
        delegated: f64,
        withdrawing: f64,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self::from_account(Account {
            name: BOT.to_string(),
            vesting_shares: Asset::vests(vesting),
            received_vesting_shares: Asset::vests(received),
            delegated_vesting_shares: Asset::vests(delegated),
            vesting_withdraw_rate: Asset::vests(withdrawing),
            voting_manabar: Manabar {
                current_mana: 0.0,
                last_update_time: last_update.timestamp(),
            },
        })
    }

    fn from_account(account: Account) -> Self {
        Self {
            account: Mutex::new(account),
            history: Mutex::new(Vec::new()),
            props: Mutex::new(DynamicGlobalProperties {
                head_block_number: 1,
                total_vesting_fund_steem: Asset::steem(1.0),
                total_vesting_shares: Asset::vests(1.0),
            }),
            offline: AtomicBool::new(false),
            history_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn push_history(&self, entry: HistoryEntry) {
        self.history.lock().unwrap().push(entry);
    }

    pub fn set_vesting_ratio(&self, fund: f64, shares: f64) {
        let mut props = self.props.lock().unwrap();
        props.total_vesting_fund_steem = Asset::steem(fund);
        props.total_vesting_shares = Asset::vests(shares);
    }

    pub fn history_requests(&self) -> usize {
        self.history_requests.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), CurationError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CurationError::Rpc("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SteemApi for FakeChain {
    async fn get_account(&self, name: &str) -> Result<Account, CurationError> {
        self.check_online()?;
        let account = self.account.lock().unwrap().clone();
        if account.name != name {
            return Err(CurationError::AccountNotFound(name.to_string()));
        }
        Ok(account)
    }

    async fn get_account_history(
        &self,
        _account: &str,
        start: HistoryCursor,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, CurationError> {
        self.check_online()?;
        self.history_requests.fetch_add(1, Ordering::SeqCst);
        let mut entries: Vec<HistoryEntry> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| match start {
                HistoryCursor::Latest => true,
                HistoryCursor::At(s) => e.sequence <= s,
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        let skip = entries.len().saturating_sub(limit as usize + 1);
        Ok(entries.split_off(skip))
    }

    async fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, CurationError> {
        self.check_online()?;
        Ok(self.props.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    Accept,
    /// Broadcast API unreachable.
    Down,
    RejectVotes,
    FailReplies,
}

/// Records every operation it is asked to broadcast.
pub struct RecordingBroadcaster {
    ops: Mutex<Vec<ChainOperation>>,
    mode: Mutex<BroadcastMode>,
}

impl RecordingBroadcaster {
    pub fn new(mode: BroadcastMode) -> Self {
        Self { ops: Mutex::new(Vec::new()), mode: Mutex::new(mode) }
    }

    pub fn set_mode(&self, mode: BroadcastMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn ops(&self) -> Vec<ChainOperation> {
        self.ops.lock().unwrap().clone()
    }

    /// `author/permlink` of every broadcast vote, in order.
    pub fn votes(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ChainOperation::Vote(vote) => Some(format!("{}/{}", vote.author, vote.permlink)),
                ChainOperation::Comment(_) => None,
            })
            .collect()
    }

    pub fn replies(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, ChainOperation::Comment(_))).count()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, operation: ChainOperation) -> Result<BroadcastReceipt, BroadcastError> {
        let mode = *self.mode.lock().unwrap();
        let result = match (&operation, mode) {
            (_, BroadcastMode::Down) => return Err(BroadcastError::Transport("unreachable".into())),
            (ChainOperation::Vote(_), BroadcastMode::RejectVotes) => {
                Err(BroadcastError::Rejected("post not found".into()))
            }
            (ChainOperation::Comment(_), BroadcastMode::FailReplies) => {
                Err(BroadcastError::Transport("timeout".into()))
            }
            _ => Ok(BroadcastReceipt::default()),
        };
        self.ops.lock().unwrap().push(operation);
        result
    }
}

pub fn test_drainer_config() -> DrainerConfig {
    DrainerConfig {
        floor: 80.0,
        cost_per_full_percent: 0.02,
        max_content_reward: 100.0,
        inter_vote_delay: Duration::ZERO,
    }
}

pub fn drainer(
    db: CurationDbObj,
    broadcaster: Arc<RecordingBroadcaster>,
    weight_override: Option<u16>,
) -> QueueDrainer {
    let caster = VoteCaster::new(BOT, broadcaster, "knacksteem", weight_override);
    QueueDrainer::new(db, caster, test_drainer_config())
}

/// Database whose vote settlements fail while `fail_settles` is set.
pub struct FlakyDb {
    inner: Arc<CurationDb>,
    fail_settles: AtomicBool,
}

impl FlakyDb {
    pub fn new(inner: Arc<CurationDb>) -> Self {
        Self { inner, fail_settles: AtomicBool::new(false) }
    }

    pub fn fail_settles(&self, fail: bool) {
        self.fail_settles.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CurationBotDb for FlakyDb {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), DbError> {
        self.inner.enqueue(entry).await
    }

    async fn list_queue(&self) -> Result<Vec<QueueEntry>, DbError> {
        self.inner.list_queue().await
    }

    async fn remove_from_queue(&self, permlink: &str) -> Result<bool, DbError> {
        self.inner.remove_from_queue(permlink).await
    }

    async fn credit(&self, username: &str, amount: f64) -> Result<(), DbError> {
        self.inner.credit(username, amount).await
    }

    async fn settle_vote(
        &self,
        permlink: &str,
        author: &str,
        amount: f64,
    ) -> Result<bool, DbError> {
        if self.fail_settles.load(Ordering::SeqCst) {
            return Err(DbError::SqlErr(sqlx::Error::PoolTimedOut));
        }
        self.inner.settle_vote(permlink, author, amount).await
    }

    async fn ensure_ledger_entries(&self, usernames: &[String]) -> Result<(), DbError> {
        self.inner.ensure_ledger_entries(usernames).await
    }

    async fn get_balance(&self, username: &str) -> Result<Option<f64>, DbError> {
        self.inner.get_balance(username).await
    }

    async fn replace_delegations(&self, snapshot: &DelegationSnapshot) -> Result<(), DbError> {
        self.inner.replace_delegations(snapshot).await
    }

    async fn get_delegations(&self) -> Result<Option<DelegationSnapshot>, DbError> {
        self.inner.get_delegations().await
    }

    async fn get_last_distribution(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        self.inner.get_last_distribution().await
    }

    async fn set_last_distribution(&self, at: DateTime<Utc>) -> Result<(), DbError> {
        self.inner.set_last_distribution(at).await
    }
}
