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
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use knacksteem_curation::{seconds_to_full, AccountPowerState, SteemApiObj};
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    db::CurationDbObj,
    drainer::{DrainReport, QueueDrainer},
};

/// One pending invocation of the round loop.
#[derive(Debug, Clone)]
pub struct Round {
    pub seq: u64,
    pub wake_at: DateTime<Utc>,
    deadline: Instant,
    token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Scheduled { seq: u64, wake_at: DateTime<Utc> },
    Running { seq: u64 },
}

#[derive(Default)]
struct TimerInner {
    next_seq: u64,
    pending: Option<Round>,
    running: Option<u64>,
}

/// Owns the single pending [Round]. Installing a new round cancels the previous one.
#[derive(Default)]
pub struct RoundTimer {
    inner: Mutex<TimerInner>,
    notify: Notify,
}

/// Roughly 30 years, used when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

impl RoundTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the pending round, if any, and schedule a new one `delay` from now.
    pub fn reschedule_in(&self, delay: Duration) -> Round {
        let wake_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.install(deadline_after(delay), wake_at)
    }

    /// Cancel the pending round, if any, and schedule a new one at `at`. Past times fire
    /// immediately.
    pub fn reschedule_at(&self, at: DateTime<Utc>) -> Round {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.install(deadline_after(delay), at)
    }

    fn install(&self, deadline: Instant, wake_at: DateTime<Utc>) -> Round {
        let round = {
            let mut inner = self.lock();
            if let Some(previous) = inner.pending.take() {
                previous.token.cancel();
            }
            inner.next_seq += 1;
            inner.running = None;
            let round =
                Round { seq: inner.next_seq, wake_at, deadline, token: CancellationToken::new() };
            inner.pending = Some(round.clone());
            round
        };
        tracing::debug!("Round {} scheduled for {}", round.seq, round.wake_at);
        self.notify.notify_one();
        round
    }

    /// Drop the pending round without scheduling another.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(previous) = inner.pending.take() {
            previous.token.cancel();
        }
        inner.running = None;
    }

    pub fn state(&self) -> RoundState {
        let inner = self.lock();
        match (&inner.pending, inner.running) {
            (_, Some(seq)) => RoundState::Running { seq },
            (Some(round), None) => RoundState::Scheduled { seq: round.seq, wake_at: round.wake_at },
            (None, None) => RoundState::Idle,
        }
    }

    /// Wait for the pending round to fire and mark it running. Follows reschedules that
    /// happen while waiting.
    pub async fn next_due(&self) -> Round {
        loop {
            let pending = self.lock().pending.clone();
            let Some(round) = pending else {
                self.notify.notified().await;
                continue;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(round.deadline) => {}
                _ = round.token.cancelled() => continue,
            }

            let mut inner = self.lock();
            let still_pending = inner.pending.as_ref().is_some_and(|p| p.seq == round.seq);
            if still_pending && !round.token.is_cancelled() {
                inner.pending = None;
                inner.running = Some(round.seq);
                return round;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub account: String,
    /// Minimum voting power percentage to start draining the queue.
    pub power_threshold: f64,
    pub start_delay: Duration,
    pub round_interval: Duration,
    pub empty_queue_delay: Duration,
    pub recharge_margin: Duration,
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            account: "knacksteem.org".to_string(),
            power_threshold: 100.0,
            start_delay: Duration::ZERO,
            round_interval: Duration::from_secs(10),
            empty_queue_delay: Duration::from_secs(60 * 60),
            recharge_margin: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundDecision {
    /// Power below the threshold; waiting for it to recharge.
    Recharging,
    QueueEmpty,
    Drained(DrainReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub power: f64,
    pub decision: RoundDecision,
    pub next_delay: Duration,
}

/// Wake, check power, drain the queue when charged, and reschedule.
pub struct RoundScheduler {
    api: SteemApiObj,
    db: CurationDbObj,
    drainer: QueueDrainer,
    timer: Arc<RoundTimer>,
    config: SchedulerConfig,
}

impl RoundScheduler {
    pub fn new(
        api: SteemApiObj,
        db: CurationDbObj,
        drainer: QueueDrainer,
        config: SchedulerConfig,
    ) -> Self {
        Self { api, db, drainer, timer: Arc::new(RoundTimer::new()), config }
    }

    pub fn timer(&self) -> Arc<RoundTimer> {
        self.timer.clone()
    }

    /// Current voting power of the bot account at `now`.
    pub async fn current_power(&self, now: DateTime<Utc>) -> Result<f64> {
        let account = self
            .api
            .get_account(&self.config.account)
            .await
            .with_context(|| format!("Failed to fetch account {}", self.config.account))?;
        let state = AccountPowerState::from_account(&account)?;
        Ok(state.current_power(now.timestamp()))
    }

    pub async fn run_round(&self, now: DateTime<Utc>) -> Result<RoundOutcome> {
        let power = self.current_power(now).await?;

        if power < self.config.power_threshold {
            let next_delay = Duration::from_secs_f64(seconds_to_full(power))
                .saturating_add(self.config.recharge_margin);
            tracing::info!(
                "Voting power at {:.2}%, below {:.2}%; next round in {}s",
                power,
                self.config.power_threshold,
                next_delay.as_secs()
            );
            return Ok(RoundOutcome { power, decision: RoundDecision::Recharging, next_delay });
        }

        let entries = self.db.list_queue().await.context("Failed to list queue")?;
        if entries.is_empty() {
            tracing::info!("Queue is empty; next round in {}s", self.config.empty_queue_delay.as_secs());
            return Ok(RoundOutcome {
                power,
                decision: RoundDecision::QueueEmpty,
                next_delay: self.config.empty_queue_delay,
            });
        }

        tracing::info!("Voting power at {:.2}%, draining {} queued entries", power, entries.len());
        let report = self.drainer.drain(entries, power).await?;
        let next_delay =
            if report.interrupted { self.config.retry_delay } else { self.config.round_interval };
        Ok(RoundOutcome { power, decision: RoundDecision::Drained(report), next_delay })
    }

    /// Run rounds until `cancel` fires. Every round, including a failed one, schedules
    /// the next.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.timer.reschedule_in(self.config.start_delay);

        loop {
            let round = tokio::select! {
                round = self.timer.next_due() => round,
                _ = cancel.cancelled() => {
                    tracing::info!("Round scheduler stopping");
                    self.timer.cancel();
                    return Ok(());
                }
            };

            let start = std::time::Instant::now();
            let next_delay = match self.run_round(Utc::now()).await {
                Ok(outcome) => outcome.next_delay,
                Err(e) => {
                    tracing::error!(
                        "Round {} failed: {:?}; retrying in {}s",
                        round.seq,
                        e,
                        self.config.retry_delay.as_secs()
                    );
                    self.config.retry_delay
                }
            };
            tracing::debug!("Round {} finished in {:?}", round.seq, start.elapsed());

            self.timer.reschedule_in(next_delay);
        }
    }
}
