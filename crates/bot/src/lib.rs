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

//! Curation bot service: votes on approved content when the voting account is charged and
//! pays delegators their share of the reward pool.

pub mod broadcast;
pub mod caster;
pub mod client;
pub mod config;
pub mod db;
pub mod delegators;
pub mod drainer;
pub mod scheduler;

pub use broadcast::{
    BroadcastError, BroadcastReceipt, Broadcaster, BroadcasterObj, ChainOperation,
    DryRunBroadcaster, ScBroadcaster,
};
pub use caster::{CastOutcome, VoteCaster};
pub use client::SteemClient;
pub use config::{ConfigError, CurationConfig};
pub use db::{CurationBotDb, CurationDb, CurationDbObj, DbError};
pub use delegators::{
    DelegatorRewardsConfig, DelegatorRewardsJob, DistributionOutcome, DistributionSchedule,
};
pub use drainer::{DrainReport, DrainerConfig, QueueDrainer};
pub use scheduler::{
    Round, RoundDecision, RoundOutcome, RoundScheduler, RoundState, RoundTimer, SchedulerConfig,
};
