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

use knacksteem_bot::CurationBotDb;
use knacksteem_curation::{DelegationRecord, DelegationSnapshot, SyncCheckpoint};

use super::common::{self, entry, ts};

fn record(delegator: &str, vests: f64, sequence: u64) -> DelegationRecord {
    DelegationRecord {
        delegator: delegator.into(),
        vesting_shares: vests,
        block: sequence * 10,
        trx_id: format!("trx-{sequence}"),
        sequence,
    }
}

#[tokio::test]
async fn test_queue_is_fifo() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;

    db.enqueue(&entry("carol", "third", 100, 300)).await.unwrap();
    db.enqueue(&entry("alice", "first", 100, 100)).await.unwrap();
    db.enqueue(&entry("bob", "second", 5000, 200)).await.unwrap();
    // Re-approving a queued post keeps the first entry.
    db.enqueue(&entry("alice", "first", 9000, 400)).await.unwrap();

    let queue = db.list_queue().await.unwrap();
    let permlinks: Vec<_> = queue.iter().map(|e| e.permlink.as_str()).collect();
    assert_eq!(permlinks, vec!["first", "second", "third"]);
    assert_eq!(queue[0].weight, 100);
    assert_eq!(queue[0].created_at, ts(100));
    assert_eq!(queue[1].author, "bob");

    assert!(db.remove_from_queue("second").await.unwrap());
    assert!(!db.remove_from_queue("second").await.unwrap());
    assert_eq!(db.list_queue().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ledger_credits_accumulate() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;

    assert_eq!(db.get_balance("alice").await.unwrap(), None);

    db.credit("alice", 1.5).await.unwrap();
    db.credit("alice", 2.25).await.unwrap();
    db.credit("bob", 10.0).await.unwrap();

    assert_eq!(db.get_balance("alice").await.unwrap(), Some(3.75));
    assert_eq!(db.get_balance("bob").await.unwrap(), Some(10.0));

    // Existing balances are untouched, missing users start at zero.
    db.ensure_ledger_entries(&["alice".to_string(), "dave".to_string()]).await.unwrap();
    assert_eq!(db.get_balance("alice").await.unwrap(), Some(3.75));
    assert_eq!(db.get_balance("dave").await.unwrap(), Some(0.0));
}

#[tokio::test]
async fn test_delegation_snapshot_is_replaced() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;

    assert_eq!(db.get_delegations().await.unwrap(), None);

    let first = DelegationSnapshot {
        records: vec![record("alice", 300.0, 4), record("bob", 100.0, 2)],
        checkpoint: Some(SyncCheckpoint { last_sequence: 5 }),
    };
    db.replace_delegations(&first).await.unwrap();
    assert_eq!(db.get_delegations().await.unwrap(), Some(first));

    let second = DelegationSnapshot {
        records: vec![record("carol", 50.0, 9)],
        checkpoint: Some(SyncCheckpoint { last_sequence: 9 }),
    };
    db.replace_delegations(&second).await.unwrap();
    assert_eq!(db.get_delegations().await.unwrap(), Some(second));
}

#[tokio::test]
async fn test_large_snapshot_is_persisted() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;

    let records: Vec<_> =
        (0..500u64).map(|i| record(&format!("user{i:03}"), (1000 - i) as f64, i + 1)).collect();
    let snapshot =
        DelegationSnapshot { records, checkpoint: Some(SyncCheckpoint { last_sequence: 500 }) };
    db.replace_delegations(&snapshot).await.unwrap();

    let stored = db.get_delegations().await.unwrap().unwrap();
    assert_eq!(stored.records.len(), 500);
    assert_eq!(stored, snapshot);
}

#[tokio::test]
async fn test_last_distribution_round_trip() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;

    assert_eq!(db.get_last_distribution().await.unwrap(), None);
    db.set_last_distribution(ts(1_750_000_000)).await.unwrap();
    db.set_last_distribution(ts(1_750_600_000)).await.unwrap();
    assert_eq!(db.get_last_distribution().await.unwrap(), Some(ts(1_750_600_000)));
}
