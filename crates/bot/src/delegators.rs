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

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use knacksteem_curation::{
    compute_delegator_rewards, DelegationLedgerSync, DelegationSnapshot, DelegatorReward,
    SteemApiObj, VestingRatio,
};
use tokio_util::sync::CancellationToken;

use crate::db::CurationDbObj;

/// Weekly UTC slots at which delegator rewards are paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSchedule {
    weekdays: Vec<Weekday>,
    time: NaiveTime,
}

impl Default for DistributionSchedule {
    fn default() -> Self {
        Self { weekdays: vec![Weekday::Sun], time: NaiveTime::MIN + chrono::Duration::hours(12) }
    }
}

impl DistributionSchedule {
    /// `None` when no weekday is given or the time of day is out of range.
    pub fn new(weekdays: Vec<Weekday>, hour: u32, minute: u32) -> Option<Self> {
        if weekdays.is_empty() {
            return None;
        }
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self { weekdays, time })
    }

    fn slot_on(&self, day: chrono::NaiveDate) -> Option<DateTime<Utc>> {
        if !self.weekdays.contains(&day.weekday()) {
            return None;
        }
        Some(Utc.from_utc_datetime(&day.and_time(self.time)))
    }

    /// First slot strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let today = t.date_naive();
        (0..=7)
            .filter_map(|offset| today.checked_add_days(chrono::Days::new(offset)))
            .filter_map(|day| self.slot_on(day))
            .find(|slot| *slot > t)
            .unwrap_or(t + chrono::Duration::weeks(1))
    }

    /// Latest slot at or before `t`.
    pub fn current_slot(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = t.date_naive();
        (0..=7)
            .filter_map(|offset| today.checked_sub_days(chrono::Days::new(offset)))
            .filter_map(|day| self.slot_on(day))
            .find(|slot| *slot <= t)
    }
}

#[derive(Debug, Clone)]
pub struct DelegatorRewardsConfig {
    /// Account whose incoming delegations are rewarded.
    pub account: String,
    pub page_size: u32,
    pub page_delay: Duration,
    /// Wait between persisting the snapshot and paying out.
    pub settle_delay: Duration,
    pub reward_pool: f64,
    /// Ignore the stored checkpoint and walk the whole history.
    pub full_resync: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistributionOutcome {
    /// Already paid for the current slot.
    AlreadyDistributed { slot: DateTime<Utc> },
    NothingToDistribute,
    Distributed { rewards: Vec<DelegatorReward> },
}

/// Syncs the delegator snapshot and credits each delegator a share of the pool.
pub struct DelegatorRewardsJob {
    api: SteemApiObj,
    db: CurationDbObj,
    schedule: DistributionSchedule,
    config: DelegatorRewardsConfig,
}

impl DelegatorRewardsJob {
    pub fn new(
        api: SteemApiObj,
        db: CurationDbObj,
        schedule: DistributionSchedule,
        config: DelegatorRewardsConfig,
    ) -> Self {
        Self { api, db, schedule, config }
    }

    /// Reconcile the delegators against the chain and persist the snapshot.
    pub async fn sync(&self) -> Result<DelegationSnapshot> {
        let previous = if self.config.full_resync {
            None
        } else {
            self.db.get_delegations().await.context("Failed to load delegation snapshot")?
        };

        let sync = DelegationLedgerSync::new(
            self.api.as_ref(),
            &self.config.account,
            self.config.page_size,
            self.config.page_delay,
        );
        let snapshot = sync.sync(previous.as_ref()).await?;

        self.db
            .replace_delegations(&snapshot)
            .await
            .context("Failed to persist delegation snapshot")?;
        Ok(snapshot)
    }

    /// Credit every delegator in `snapshot` its share of the pool.
    pub async fn distribute(&self, snapshot: &DelegationSnapshot) -> Result<Vec<DelegatorReward>> {
        let props = self
            .api
            .get_dynamic_global_properties()
            .await
            .context("Failed to fetch global properties")?;
        let Some(ratio) = VestingRatio::from_properties(&props) else {
            tracing::warn!("Chain reports no vesting shares; skipping distribution");
            return Ok(Vec::new());
        };

        let rewards = compute_delegator_rewards(&snapshot.records, ratio, self.config.reward_pool);
        if rewards.is_empty() {
            return Ok(rewards);
        }

        let delegators: Vec<String> = snapshot.records.iter().map(|r| r.delegator.clone()).collect();
        self.db.ensure_ledger_entries(&delegators).await.context("Failed to create ledger entries")?;

        for reward in &rewards {
            self.db
                .credit(&reward.delegator, reward.reward)
                .await
                .with_context(|| format!("Failed to credit delegator {}", reward.delegator))?;
            tracing::debug!(
                "Credited delegator {} with {:.3} ({:.3} SP, {:.2}%)",
                reward.delegator,
                reward.reward,
                reward.steem_power,
                reward.share * 100.0
            );
        }
        Ok(rewards)
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<DistributionOutcome> {
        if let Some(slot) = self.schedule.current_slot(now) {
            let last = self.db.get_last_distribution().await?;
            if last.is_some_and(|last| last >= slot) {
                tracing::info!("Delegator rewards for {} already distributed", slot);
                return Ok(DistributionOutcome::AlreadyDistributed { slot });
            }
        }

        let start = Instant::now();
        let snapshot = self.sync().await?;
        tokio::time::sleep(self.config.settle_delay).await;

        let rewards = self.distribute(&snapshot).await?;
        self.db.set_last_distribution(now).await?;

        if rewards.is_empty() {
            tracing::info!("No delegators to reward");
            return Ok(DistributionOutcome::NothingToDistribute);
        }

        let total: f64 = rewards.iter().map(|r| r.reward).sum();
        tracing::info!(
            "Distributed {:.3} to {} delegators in {:?}",
            total,
            rewards.len(),
            start.elapsed()
        );
        Ok(DistributionOutcome::Distributed { rewards })
    }

    /// Run at every scheduled slot until `cancel` fires. Failures are logged and retried at
    /// the next slot.
    pub async fn run_forever(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            let next = self.schedule.next_after(Utc::now());
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::info!("Next delegator distribution at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Delegator rewards job stopping");
                    return Ok(());
                }
            }

            if let Err(e) = self.run(Utc::now()).await {
                tracing::error!("Delegator distribution failed: {:?}", e);
            }
        }
    }
}
