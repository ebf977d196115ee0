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
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use knacksteem_curation::{sort_fifo, QueueEntry, VoteBudget, MAX_VOTE_WEIGHT};

use crate::{
    caster::{CastOutcome, VoteCaster},
    db::CurationDbObj,
};

#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Voting power never drops below this percentage during a round.
    pub floor: f64,
    pub cost_per_full_percent: f64,
    /// Reward credited to an author for a full-weight vote.
    pub max_content_reward: f64,
    pub inter_vote_delay: Duration,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            floor: 80.0,
            cost_per_full_percent: 0.02,
            max_content_reward: 100.0,
            inter_vote_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub start_power: f64,
    pub final_power: f64,
    pub consumed: f64,
    pub voted: usize,
    pub rejected: usize,
    pub remaining: usize,
    /// The broadcast API was unreachable and the drain stopped early.
    pub interrupted: bool,
}

/// Votes on queued entries, oldest first, until the budget floor is reached.
pub struct QueueDrainer {
    db: CurationDbObj,
    caster: VoteCaster,
    config: DrainerConfig,
    /// Permlinks voted on whose dequeue and credit did not commit yet.
    unsettled: Mutex<HashSet<String>>,
}

impl QueueDrainer {
    pub fn new(db: CurationDbObj, caster: VoteCaster, config: DrainerConfig) -> Self {
        Self { db, caster, config, unsettled: Mutex::new(HashSet::new()) }
    }

    fn unsettled(&self) -> MutexGuard<'_, HashSet<String>> {
        self.unsettled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dequeue a voted entry and credit its author. On failure the entry is remembered so
    /// that a later drain settles it without voting again.
    async fn settle(&self, entry: &QueueEntry) -> Result<f64> {
        let reward = self.content_reward(entry);
        match self.db.settle_vote(&entry.permlink, &entry.author, reward).await {
            Ok(_) => {
                self.unsettled().remove(&entry.permlink);
                Ok(reward)
            }
            Err(err) => {
                self.unsettled().insert(entry.permlink.clone());
                Err(err).with_context(|| {
                    format!("Failed to settle vote on {}/{}", entry.author, entry.permlink)
                })
            }
        }
    }

    /// Content reward credited for a vote on `entry`.
    pub fn content_reward(&self, entry: &QueueEntry) -> f64 {
        f64::from(entry.weight.min(MAX_VOTE_WEIGHT)) / f64::from(MAX_VOTE_WEIGHT)
            * self.config.max_content_reward
    }

    pub async fn drain(&self, mut entries: Vec<QueueEntry>, start_power: f64) -> Result<DrainReport> {
        sort_fifo(&mut entries);

        let mut budget =
            VoteBudget::new(start_power, self.config.floor, self.config.cost_per_full_percent);
        let mut report = DrainReport { start_power, ..Default::default() };
        let mut attempted = 0usize;

        for entry in &entries {
            if self.unsettled().contains(&entry.permlink) {
                let reward = self.settle(entry).await?;
                report.voted += 1;
                tracing::info!(
                    "Settled earlier vote on {}/{}, credited {:.3}",
                    entry.author,
                    entry.permlink,
                    reward
                );
                continue;
            }

            let weight = self.caster.vote_weight(entry);
            if !budget.allows(weight) {
                tracing::info!(
                    "Vote on {}/{} would use {:.2}% and cross the {:.2}% floor at {:.2}%; stopping",
                    entry.author,
                    entry.permlink,
                    budget.usage(weight),
                    budget.floor(),
                    budget.power()
                );
                break;
            }

            if attempted > 0 {
                tokio::time::sleep(self.config.inter_vote_delay).await;
            }
            attempted += 1;

            match self.caster.cast(entry).await {
                Ok(CastOutcome::Voted { .. }) => {
                    let usage = budget.try_spend(weight).unwrap_or_default();
                    let reward = self.settle(entry).await?;
                    report.voted += 1;
                    tracing::debug!(
                        "Credited {} with {:.3}; power {:.2}% (-{:.2}%)",
                        entry.author,
                        reward,
                        budget.power(),
                        usage
                    );
                }
                Ok(CastOutcome::Rejected(_)) => {
                    // A rejection spends budget like a vote.
                    budget.try_spend(weight);
                    self.db
                        .remove_from_queue(&entry.permlink)
                        .await
                        .with_context(|| format!("Failed to dequeue {}", entry.permlink))?;
                    report.rejected += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "Broadcast unavailable while voting {}/{}: {}",
                        entry.author,
                        entry.permlink,
                        err
                    );
                    report.interrupted = true;
                    break;
                }
            }
        }

        report.final_power = budget.power();
        report.consumed = budget.consumed();
        report.remaining = entries.len() - report.voted - report.rejected;

        tracing::info!(
            "Drained queue: {} voted, {} rejected, {} remaining; power {:.2}% -> {:.2}%",
            report.voted,
            report.rejected,
            report.remaining,
            report.start_power,
            report.final_power
        );
        Ok(report)
    }
}
