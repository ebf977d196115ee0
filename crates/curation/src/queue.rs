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

//! Approved content queue entries and the voting power budget used to drain them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MAX_VOTE_WEIGHT;

/// A moderator-approved post waiting for a vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub author: String,
    pub permlink: String,
    /// Basis points of a full vote, in [0, 10000].
    pub weight: u16,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        author: impl Into<String>,
        permlink: impl Into<String>,
        weight: u16,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            author: author.into(),
            permlink: permlink.into(),
            weight: weight.min(MAX_VOTE_WEIGHT),
            created_at,
        }
    }

    /// Fraction of a full vote this entry receives.
    pub fn weight_fraction(&self) -> f64 {
        f64::from(self.weight.min(MAX_VOTE_WEIGHT)) / f64::from(MAX_VOTE_WEIGHT)
    }
}

/// Sort entries into consumption order: oldest first, permlink as tie breaker.
pub fn sort_fifo(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        a.created_at.cmp(&b.created_at).then_with(|| a.permlink.cmp(&b.permlink))
    });
}

/// Greedy voting power budget for a single round.
///
/// Each vote costs `(weight / 100) * cost_per_full_percent * current_power` percentage points.
/// The floor is checked against the power remaining after the vote, so a vote that would
/// cross it is refused and the power never drops below the floor.
#[derive(Debug, Clone)]
pub struct VoteBudget {
    start_power: f64,
    power: f64,
    floor: f64,
    cost_per_full_percent: f64,
}

impl VoteBudget {
    pub fn new(power: f64, floor: f64, cost_per_full_percent: f64) -> Self {
        Self { start_power: power, power, floor, cost_per_full_percent }
    }

    /// Power a vote with `weight` basis points would consume at the current power.
    pub fn usage(&self, weight: u16) -> f64 {
        (f64::from(weight) / 100.0) * self.cost_per_full_percent * self.power
    }

    /// Whether a vote of `weight` keeps the power at or above the floor.
    pub fn allows(&self, weight: u16) -> bool {
        self.power - self.usage(weight) >= self.floor
    }

    /// Spend the power for one vote. Returns the usage, or `None` when the vote would cross
    /// the floor (nothing is spent in that case).
    pub fn try_spend(&mut self, weight: u16) -> Option<f64> {
        if !self.allows(weight) {
            return None;
        }
        let usage = self.usage(weight);
        self.power -= usage;
        Some(usage)
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Total power consumed so far.
    pub fn consumed(&self) -> f64 {
        self.start_power - self.power
    }
}
