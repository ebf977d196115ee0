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

//! Reconstruction of the current delegators of an account from its operation history.
//!
//! The history API serves pages ending at a given sequence number. The walk starts at the
//! most recent operation and moves backwards one page at a time until it reaches either the
//! beginning of the history or the checkpoint of a previously persisted snapshot. Only the
//! newest delegation per delegator is kept while walking, so memory is bounded by the number
//! of distinct delegators rather than by the length of the history.

use std::{collections::HashMap, time::Duration};

use futures_util::{pin_mut, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    steem::{HistoryCursor, HistoryEntry, Operation, SteemApi},
    CurationError, MAX_HISTORY_PAGE_SIZE,
};

/// The latest delegation from one delegator to the tracked account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegator: String,
    pub vesting_shares: f64,
    pub block: u64,
    pub trx_id: String,
    pub sequence: u64,
}

impl DelegationRecord {
    /// Position of the originating operation. Later positions supersede earlier ones.
    pub fn position(&self) -> (u64, u64) {
        (self.block, self.sequence)
    }

    pub fn is_revoked(&self) -> bool {
        self.vesting_shares <= 0.0
    }
}

/// Newest history sequence already folded into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub last_sequence: u64,
}

/// Canonical set of active delegations: one record per delegator, no zero stakes, sorted by
/// stake descending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationSnapshot {
    pub records: Vec<DelegationRecord>,
    pub checkpoint: Option<SyncCheckpoint>,
}

impl DelegationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_vesting_shares(&self) -> f64 {
        self.records.iter().map(|r| r.vesting_shares).sum()
    }
}

/// One page of history, newest operation first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
}

impl HistoryPage {
    pub fn newest_sequence(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.sequence).max()
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.sequence).min()
    }
}

/// Lazily walk the history of `account` backwards, one page per request.
///
/// Every yielded page only contains operations strictly older than the previous page. The
/// stream ends once the API has nothing older to return, which also covers a remote that
/// keeps answering with the same page.
pub fn history_pages<'a, A>(
    api: &'a A,
    account: &'a str,
    page_size: u32,
    page_delay: Duration,
) -> impl Stream<Item = Result<HistoryPage, CurationError>> + 'a
where
    A: SteemApi + Send + Sync + ?Sized,
{
    async_stream::try_stream! {
        let page_size = page_size.clamp(1, MAX_HISTORY_PAGE_SIZE);
        let mut cursor = HistoryCursor::Latest;
        let mut boundary: Option<u64> = None;

        loop {
            // The API requires the limit to not exceed the starting sequence.
            let limit = match cursor {
                HistoryCursor::Latest => page_size,
                HistoryCursor::At(start) => page_size.min(u32::try_from(start).unwrap_or(u32::MAX)),
            };

            let mut entries = api.get_account_history(account, cursor, limit).await?;
            if let Some(boundary) = boundary {
                entries.retain(|e| e.sequence < boundary);
            }
            if entries.is_empty() {
                tracing::debug!("History of {} exhausted", account);
                break;
            }

            entries.sort_by(|a, b| {
                b.item.block.cmp(&a.item.block).then_with(|| b.sequence.cmp(&a.sequence))
            });
            let oldest = entries.iter().map(|e| e.sequence).min().unwrap_or(0);
            tracing::debug!(
                "Fetched {} history operations of {} down to sequence {}",
                entries.len(),
                account,
                oldest
            );

            yield HistoryPage { entries };

            if oldest == 0 {
                break;
            }
            boundary = Some(oldest);
            cursor = HistoryCursor::At(oldest - 1);

            if !page_delay.is_zero() {
                tokio::time::sleep(page_delay).await;
            }
        }
    }
}

/// Folds delegation operations into the newest record per delegator.
#[derive(Debug, Clone)]
pub struct DelegationAccumulator {
    delegatee: String,
    best: HashMap<String, DelegationRecord>,
    newest_sequence: Option<u64>,
}

impl DelegationAccumulator {
    pub fn new(delegatee: impl Into<String>) -> Self {
        Self { delegatee: delegatee.into(), best: HashMap::new(), newest_sequence: None }
    }

    /// Start from a previously persisted snapshot.
    pub fn from_snapshot(delegatee: impl Into<String>, snapshot: &DelegationSnapshot) -> Self {
        let mut acc = Self::new(delegatee);
        for record in &snapshot.records {
            acc.insert(record.clone());
        }
        acc.newest_sequence = snapshot.checkpoint.map(|c| c.last_sequence);
        acc
    }

    /// Keep `record` if it is newer than what is known for its delegator.
    pub fn insert(&mut self, record: DelegationRecord) -> bool {
        match self.best.get(&record.delegator) {
            Some(existing) if existing.position() >= record.position() => false,
            _ => {
                self.best.insert(record.delegator.clone(), record);
                true
            }
        }
    }

    /// Fold one history operation. Returns whether it changed the accumulated state.
    pub fn observe(&mut self, entry: &HistoryEntry) -> Result<bool, CurationError> {
        self.newest_sequence = Some(self.newest_sequence.map_or(entry.sequence, |s| s.max(entry.sequence)));

        let Operation::DelegateVestingShares(op) = entry.item.operation()? else {
            return Ok(false);
        };
        // The history also lists delegations the account made to others.
        if op.delegatee != self.delegatee {
            return Ok(false);
        }

        Ok(self.insert(DelegationRecord {
            delegator: op.delegator,
            vesting_shares: op.vesting_shares.amount,
            block: entry.item.block,
            trx_id: entry.item.trx_id.clone(),
            sequence: entry.sequence,
        }))
    }

    /// Fold a page, skipping operations at or below `stop_at`. Returns true once the page
    /// reached `stop_at`, i.e. nothing older needs to be fetched.
    pub fn observe_page(
        &mut self,
        page: &HistoryPage,
        stop_at: Option<u64>,
    ) -> Result<bool, CurationError> {
        let mut reached = false;
        for entry in &page.entries {
            if stop_at.is_some_and(|stop| entry.sequence <= stop) {
                reached = true;
                continue;
            }
            self.observe(entry)?;
        }
        Ok(reached)
    }

    /// Number of delegators tracked, including revoked ones.
    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Drop revoked delegations and sort by stake, largest first.
    pub fn into_snapshot(self) -> DelegationSnapshot {
        let mut records: Vec<DelegationRecord> =
            self.best.into_values().filter(|r| !r.is_revoked()).collect();
        records.sort_by(|a, b| {
            b.vesting_shares.total_cmp(&a.vesting_shares).then_with(|| a.delegator.cmp(&b.delegator))
        });
        DelegationSnapshot {
            records,
            checkpoint: self.newest_sequence.map(|last_sequence| SyncCheckpoint { last_sequence }),
        }
    }
}

/// Reconciles the delegators of an account against its remote history.
pub struct DelegationLedgerSync<'a, A: ?Sized> {
    api: &'a A,
    account: String,
    page_size: u32,
    page_delay: Duration,
}

impl<'a, A> DelegationLedgerSync<'a, A>
where
    A: SteemApi + Send + Sync + ?Sized,
{
    pub fn new(api: &'a A, account: impl Into<String>, page_size: u32, page_delay: Duration) -> Self {
        Self { api, account: account.into(), page_size, page_delay }
    }

    /// Build the canonical snapshot. With a previous snapshot, only the operations newer than
    /// its checkpoint are fetched and merged over it.
    pub async fn sync(
        &self,
        previous: Option<&DelegationSnapshot>,
    ) -> Result<DelegationSnapshot, CurationError> {
        let mut acc = match previous {
            Some(snapshot) => DelegationAccumulator::from_snapshot(&self.account, snapshot),
            None => DelegationAccumulator::new(&self.account),
        };
        let stop_at = previous.and_then(|s| s.checkpoint).map(|c| c.last_sequence);

        tracing::info!(
            "Syncing delegations to {} (boundary: {})",
            self.account,
            stop_at.map_or_else(|| "none".to_string(), |s| s.to_string())
        );

        let pages = history_pages(self.api, &self.account, self.page_size, self.page_delay);
        pin_mut!(pages);

        let mut fetched = 0usize;
        while let Some(page) = pages.try_next().await? {
            fetched += page.entries.len();
            if acc.observe_page(&page, stop_at)? {
                break;
            }
        }

        let snapshot = acc.into_snapshot();
        tracing::info!(
            "Delegation sync of {} scanned {} operations: {} active delegators, {:.6} VESTS",
            self.account,
            fetched,
            snapshot.records.len(),
            snapshot.total_vesting_shares()
        );
        Ok(snapshot)
    }
}
