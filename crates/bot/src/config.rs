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

use chrono::Weekday;
use clap::Args;
use knacksteem_curation::{DEFAULT_HISTORY_PAGE_SIZE, MAX_HISTORY_PAGE_SIZE, MAX_VOTE_WEIGHT};
use thiserror::Error;
use url::Url;

use crate::{
    broadcast::{BroadcasterObj, DryRunBroadcaster, ScBroadcaster},
    delegators::{DelegatorRewardsConfig, DistributionSchedule},
    drainer::DrainerConfig,
    scheduler::SchedulerConfig,
};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("An access token is required to broadcast unless --dry-run is set")]
    MissingAccessToken,

    #[error("Invalid value for --{0}: {1}")]
    OutOfRange(&'static str, String),
}

/// Options shared by every bot command.
#[derive(Args, Debug, Clone)]
pub struct CurationConfig {
    /// Account that votes and replies.
    #[clap(long, env = "BOT_ACCOUNT")]
    pub account: String,

    /// Access token of the broadcast API.
    #[clap(long, env = "BOT_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// URL of the Steem JSON-RPC node.
    #[clap(long, env, default_value = "https://api.steemit.com")]
    pub steem_rpc_url: Url,

    /// Base URL of the broadcast API.
    #[clap(long, env, default_value = "https://steemconnect.com/")]
    pub broadcast_url: Url,

    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    pub db: String,

    /// Seconds to wait before the first round.
    #[clap(long, env, default_value = "0")]
    pub start_delay: u64,

    /// Voting power percentage required to start a round.
    #[clap(long, env, default_value = "100")]
    pub power_threshold: f64,

    /// Vote weight in basis points used for every vote instead of the entry weight.
    #[clap(long, env)]
    pub vote_weight: Option<u16>,

    /// Voting power percentage never crossed while draining the queue.
    #[clap(long, env, default_value = "80")]
    pub floor: f64,

    /// Fraction of current power spent per percent of vote weight.
    #[clap(long, env, default_value = "0.02")]
    pub vote_cost: f64,

    /// Seconds between two votes.
    #[clap(long, env, default_value = "3")]
    pub inter_vote_delay: u64,

    /// Seconds between rounds while the queue is being drained.
    #[clap(long, env, default_value = "10")]
    pub round_interval: u64,

    /// Seconds to wait when the queue is empty.
    #[clap(long, env, default_value = "3600")]
    pub empty_queue_delay: u64,

    /// Seconds added to the recharge time before the next round.
    #[clap(long, env, default_value = "5")]
    pub recharge_margin: u64,

    /// Seconds to wait after a failed round.
    #[clap(long, env, default_value = "600")]
    pub retry_delay: u64,

    /// Account whose incoming delegations are rewarded. Defaults to the bot account.
    #[clap(long, env)]
    pub delegation_account: Option<String>,

    /// Operations fetched per account history request.
    #[clap(long, env, default_value_t = DEFAULT_HISTORY_PAGE_SIZE)]
    pub history_page_size: u32,

    /// Milliseconds to wait between history requests.
    #[clap(long, env, default_value = "500")]
    pub history_page_delay_ms: u64,

    /// Seconds to wait between persisting the delegators and paying them.
    #[clap(long, env, default_value = "3")]
    pub settle_delay: u64,

    /// Days of the week (UTC) on which delegators are paid.
    #[clap(long, env, value_delimiter = ',', default_value = "sun")]
    pub distribution_days: Vec<Weekday>,

    /// Hour of the day (UTC) of the distribution.
    #[clap(long, env, default_value = "12")]
    pub distribution_hour: u32,

    /// Minute of the hour of the distribution.
    #[clap(long, env, default_value = "0")]
    pub distribution_minute: u32,

    /// Reward pool split across delegators at each distribution.
    #[clap(long, env, default_value = "100")]
    pub daily_pool: f64,

    /// Reward credited to an author for a full-weight vote.
    #[clap(long, env, default_value = "100")]
    pub max_content_reward: f64,

    /// App name recorded in reply metadata.
    #[clap(long, env, default_value = "knacksteem")]
    pub app_name: String,

    /// Log operations instead of broadcasting them.
    #[clap(long, env, default_value_t = false)]
    pub dry_run: bool,
}

/// Upper bound for every delay option, in seconds (one year).
const MAX_DELAY_SECS: u64 = 365 * 86_400;

fn delay(name: &'static str, secs: u64) -> Result<(), ConfigError> {
    if secs > MAX_DELAY_SECS {
        return Err(ConfigError::OutOfRange(name, secs.to_string()));
    }
    Ok(())
}

fn percentage(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::OutOfRange(name, value.to_string()));
    }
    Ok(())
}

impl CurationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.trim().is_empty() {
            return Err(ConfigError::OutOfRange("account", self.account.clone()));
        }
        percentage("power-threshold", self.power_threshold)?;
        percentage("floor", self.floor)?;
        if !(self.vote_cost > 0.0 && self.vote_cost.is_finite()) {
            return Err(ConfigError::OutOfRange("vote-cost", self.vote_cost.to_string()));
        }
        if let Some(weight) = self.vote_weight {
            if weight > MAX_VOTE_WEIGHT {
                return Err(ConfigError::OutOfRange("vote-weight", weight.to_string()));
            }
        }
        if self.history_page_size == 0 || self.history_page_size > MAX_HISTORY_PAGE_SIZE {
            return Err(ConfigError::OutOfRange(
                "history-page-size",
                self.history_page_size.to_string(),
            ));
        }
        if self.daily_pool < 0.0 || !self.daily_pool.is_finite() {
            return Err(ConfigError::OutOfRange("daily-pool", self.daily_pool.to_string()));
        }
        if self.max_content_reward < 0.0 || !self.max_content_reward.is_finite() {
            return Err(ConfigError::OutOfRange(
                "max-content-reward",
                self.max_content_reward.to_string(),
            ));
        }
        delay("start-delay", self.start_delay)?;
        delay("inter-vote-delay", self.inter_vote_delay)?;
        delay("round-interval", self.round_interval)?;
        delay("empty-queue-delay", self.empty_queue_delay)?;
        delay("recharge-margin", self.recharge_margin)?;
        delay("retry-delay", self.retry_delay)?;
        delay("settle-delay", self.settle_delay)?;
        self.distribution_schedule()?;
        Ok(())
    }

    /// Broadcaster for votes and replies. Requires an access token unless running dry.
    pub fn broadcaster(&self) -> Result<BroadcasterObj, ConfigError> {
        if self.dry_run {
            return Ok(Arc::new(DryRunBroadcaster));
        }
        let token = match self.access_token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => return Err(ConfigError::MissingAccessToken),
        };
        let broadcaster = ScBroadcaster::new(&self.broadcast_url, token)
            .map_err(|e| ConfigError::OutOfRange("broadcast-url", e.to_string()))?;
        Ok(Arc::new(broadcaster))
    }

    pub fn delegation_account(&self) -> &str {
        self.delegation_account.as_deref().unwrap_or(&self.account)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            account: self.account.clone(),
            power_threshold: self.power_threshold,
            start_delay: Duration::from_secs(self.start_delay),
            round_interval: Duration::from_secs(self.round_interval),
            empty_queue_delay: Duration::from_secs(self.empty_queue_delay),
            recharge_margin: Duration::from_secs(self.recharge_margin),
            retry_delay: Duration::from_secs(self.retry_delay),
        }
    }

    pub fn drainer_config(&self) -> DrainerConfig {
        DrainerConfig {
            floor: self.floor,
            cost_per_full_percent: self.vote_cost,
            max_content_reward: self.max_content_reward,
            inter_vote_delay: Duration::from_secs(self.inter_vote_delay),
        }
    }

    pub fn rewards_config(&self, full_resync: bool) -> DelegatorRewardsConfig {
        DelegatorRewardsConfig {
            account: self.delegation_account().to_string(),
            page_size: self.history_page_size,
            page_delay: Duration::from_millis(self.history_page_delay_ms),
            settle_delay: Duration::from_secs(self.settle_delay),
            reward_pool: self.daily_pool,
            full_resync,
        }
    }

    pub fn distribution_schedule(&self) -> Result<DistributionSchedule, ConfigError> {
        DistributionSchedule::new(
            self.distribution_days.clone(),
            self.distribution_hour,
            self.distribution_minute,
        )
        .ok_or_else(|| {
            ConfigError::OutOfRange(
                "distribution-days",
                format!(
                    "{:?} at {:02}:{:02}",
                    self.distribution_days, self.distribution_hour, self.distribution_minute
                ),
            )
        })
    }
}
