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

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use knacksteem_bot::{
    CurationBotDb, CurationDb, DelegatorRewardsConfig, DelegatorRewardsJob, DistributionOutcome,
    DistributionSchedule,
};

use super::common::{self, delegation, FakeChain, BOT};

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn job(chain: Arc<FakeChain>, db: Arc<CurationDb>, full_resync: bool) -> DelegatorRewardsJob {
    DelegatorRewardsJob::new(
        chain,
        db,
        DistributionSchedule::default(),
        DelegatorRewardsConfig {
            account: BOT.to_string(),
            page_size: 2,
            page_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            reward_pool: 100.0,
            full_resync,
        },
    )
}

fn balance_close(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|actual| (actual - expected).abs() < 1e-9)
}

#[tokio::test]
async fn test_sync_persists_canonical_snapshot() {
    let test_db = common::setup_test_db().await;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    chain.push_history(delegation(0, 10, "alice", 100.0));
    chain.push_history(delegation(1, 11, "bob", 500.0));
    chain.push_history(delegation(2, 12, "carol", 50.0));
    chain.push_history(delegation(3, 20, "alice", 200.0));
    chain.push_history(delegation(4, 21, "carol", 0.0));

    let job = job(chain.clone(), test_db.db.clone(), false);
    let snapshot = job.sync().await.unwrap();

    let delegators: Vec<_> = snapshot.records.iter().map(|r| r.delegator.as_str()).collect();
    assert_eq!(delegators, vec!["bob", "alice"]);
    assert_eq!(snapshot.records[1].vesting_shares, 200.0);
    assert_eq!(snapshot.records[1].block, 20);
    assert_eq!(snapshot.checkpoint.map(|c| c.last_sequence), Some(4));

    assert_eq!(test_db.db.get_delegations().await.unwrap(), Some(snapshot));
}

#[tokio::test]
async fn test_resync_is_idempotent_and_incremental() {
    let test_db = common::setup_test_db().await;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    for seq in 0..6 {
        chain.push_history(delegation(seq, 10 + seq, &format!("user{seq}"), 10.0 * (seq + 1) as f64));
    }

    let job = job(chain.clone(), test_db.db.clone(), false);
    let first = job.sync().await.unwrap();
    let full_walk = chain.history_requests();
    assert!(full_walk > 1);

    // Nothing new: one request up to the checkpoint, same snapshot.
    let second = job.sync().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(chain.history_requests(), full_walk + 1);

    // A revocation and a new delegator show up after the checkpoint.
    chain.push_history(delegation(6, 30, "user5", 0.0));
    chain.push_history(delegation(7, 31, "zed", 1000.0));
    let third = job.sync().await.unwrap();
    let delegators: Vec<_> = third.records.iter().map(|r| r.delegator.as_str()).collect();
    assert_eq!(delegators, vec!["zed", "user4", "user3", "user2", "user1", "user0"]);
    assert_eq!(third.checkpoint.map(|c| c.last_sequence), Some(7));

    // A full resync reaches the same result.
    let full = self::job(chain, test_db.db.clone(), true).sync().await.unwrap();
    assert_eq!(full, third);
}

#[tokio::test]
async fn test_distribution_is_proportional() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    chain.push_history(delegation(0, 10, "alice", 30.0));
    chain.push_history(delegation(1, 11, "bob", 70.0));
    db.credit("alice", 5.0).await.unwrap();

    let job = job(chain, db.clone(), false);
    // Sunday 2025-06-08, after the noon slot.
    let now = at("2025-06-08T13:00:00Z");
    let outcome = job.run(now).await.unwrap();

    match outcome {
        DistributionOutcome::Distributed { rewards } => {
            assert_eq!(rewards.len(), 2);
            let total: f64 = rewards.iter().map(|r| r.reward).sum();
            assert!((total - 100.0).abs() < 1e-9);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(balance_close(db.get_balance("alice").await.unwrap(), 35.0));
    assert!(balance_close(db.get_balance("bob").await.unwrap(), 70.0));
    assert_eq!(db.get_last_distribution().await.unwrap(), Some(now));
}

#[tokio::test]
async fn test_distribution_runs_once_per_slot() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    chain.push_history(delegation(0, 10, "alice", 30.0));

    let job = job(chain, db.clone(), false);
    job.run(at("2025-06-08T12:00:00Z")).await.unwrap();

    // Restarted later the same week: already paid.
    let outcome = job.run(at("2025-06-10T09:00:00Z")).await.unwrap();
    assert_eq!(
        outcome,
        DistributionOutcome::AlreadyDistributed { slot: at("2025-06-08T12:00:00Z") }
    );
    assert!(balance_close(db.get_balance("alice").await.unwrap(), 100.0));

    // The next week pays again.
    job.run(at("2025-06-15T12:00:01Z")).await.unwrap();
    assert!(balance_close(db.get_balance("alice").await.unwrap(), 200.0));
}

#[tokio::test]
async fn test_stake_conversion_uses_fresh_ratio() {
    let test_db = common::setup_test_db().await;
    let db = &test_db.db;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    chain.push_history(delegation(0, 10, "alice", 2_000_000.0));
    chain.push_history(delegation(1, 11, "bob", 6_000_000.0));
    // 1 STEEM per 2000 VESTS.
    chain.set_vesting_ratio(1_000.0, 2_000_000.0);

    let job = job(chain, db.clone(), false);
    let snapshot = job.sync().await.unwrap();
    let rewards = job.distribute(&snapshot).await.unwrap();

    assert_eq!(rewards[0].delegator, "bob");
    assert!((rewards[0].steem_power - 3_000.0).abs() < 1e-9);
    assert!(balance_close(db.get_balance("bob").await.unwrap(), 75.0));
    assert!(balance_close(db.get_balance("alice").await.unwrap(), 25.0));
}

#[tokio::test]
async fn test_no_delegators_means_nothing_to_distribute() {
    let test_db = common::setup_test_db().await;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));

    let job = job(chain, test_db.db.clone(), false);
    let now = at("2025-06-08T12:30:00Z");
    assert_eq!(job.run(now).await.unwrap(), DistributionOutcome::NothingToDistribute);
    assert_eq!(test_db.db.get_last_distribution().await.unwrap(), Some(now));
}

#[tokio::test]
async fn test_chain_failure_does_not_record_distribution() {
    let test_db = common::setup_test_db().await;
    let chain = Arc::new(FakeChain::with_power(100.0, Utc::now()));
    chain.push_history(delegation(0, 10, "alice", 30.0));
    chain.set_offline(true);

    let job = job(chain, test_db.db.clone(), false);
    assert!(job.run(at("2025-06-08T12:30:00Z")).await.is_err());
    assert_eq!(test_db.db.get_last_distribution().await.unwrap(), None);
    assert_eq!(test_db.db.get_balance("alice").await.unwrap(), None);
}
