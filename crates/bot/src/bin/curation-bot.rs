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

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use knacksteem_bot::{
    CurationConfig, CurationDb, CurationDbObj, DelegatorRewardsJob, DistributionOutcome,
    QueueDrainer, RoundScheduler, SteemClient, VoteCaster,
};
use knacksteem_curation::{seconds_to_full, AccountPowerState, SteemApi, SteemApiObj};
use tokio_util::sync::CancellationToken;

/// Arguments for the curation bot.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CurationBotArgs {
    #[command(flatten)]
    config: CurationConfig,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Vote on the approved queue and pay delegators on schedule.
    Run,
    /// Print the current voting power of the bot account.
    Power,
    /// Reconcile the delegators of the delegation account once.
    SyncDelegators {
        /// Also credit delegator rewards, unless already paid for the current slot.
        #[clap(long)]
        distribute: bool,

        /// Ignore the stored checkpoint and walk the whole account history.
        #[clap(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CurationBotArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let config = args.config;
    config.validate().context("Invalid configuration")?;

    let api: SteemApiObj = Arc::new(SteemClient::new(config.steem_rpc_url.clone())?);

    match args.command {
        Command::Run => run(config, api).await,
        Command::Power => print_power(&config, api.as_ref()).await,
        Command::SyncDelegators { distribute, full } => {
            sync_delegators(config, api, distribute, full).await
        }
    }
}

async fn connect_db(config: &CurationConfig) -> Result<CurationDbObj> {
    let db = CurationDb::new(&config.db).await.context("Failed to connect to the database")?;
    Ok(Arc::new(db))
}

async fn run(config: CurationConfig, api: SteemApiObj) -> Result<()> {
    let broadcaster = config.broadcaster()?;
    if config.dry_run {
        tracing::warn!("Dry run: votes and replies are only logged");
    }
    let db = connect_db(&config).await?;

    let caster = VoteCaster::new(&config.account, broadcaster, &config.app_name, config.vote_weight);
    let drainer = QueueDrainer::new(db.clone(), caster, config.drainer_config());
    let scheduler =
        RoundScheduler::new(api.clone(), db.clone(), drainer, config.scheduler_config());
    let rewards = DelegatorRewardsJob::new(
        api,
        db,
        config.distribution_schedule()?,
        config.rewards_config(false),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, shutting down");
            }
            cancel.cancel();
        });
    }

    tracing::info!("Starting curation bot for {}", config.account);
    tokio::try_join!(scheduler.run(cancel.clone()), rewards.run_forever(cancel.clone()))?;
    Ok(())
}

async fn print_power(config: &CurationConfig, api: &(dyn SteemApi + Send + Sync)) -> Result<()> {
    let account = api.get_account(&config.account).await?;
    let state = AccountPowerState::from_account(&account)?;
    let power = state.current_power(Utc::now().timestamp());
    let seconds = seconds_to_full(power);

    println!("{}: {:.2}% voting power", config.account, power);
    println!(
        "Full recharge in {:.0}s ({:.2}h), effective stake {:.6} VESTS",
        seconds,
        seconds / 3600.0,
        state.effective_vests
    );
    Ok(())
}

async fn sync_delegators(
    config: CurationConfig,
    api: SteemApiObj,
    distribute: bool,
    full: bool,
) -> Result<()> {
    let db = connect_db(&config).await?;
    let job = DelegatorRewardsJob::new(
        api,
        db,
        config.distribution_schedule()?,
        config.rewards_config(full),
    );

    if !distribute {
        let snapshot = job.sync().await?;
        println!(
            "{} delegators, {:.6} VESTS delegated to {}",
            snapshot.records.len(),
            snapshot.total_vesting_shares(),
            config.delegation_account()
        );
        for record in &snapshot.records {
            println!("{:<20} {:>20.6} VESTS (block {})", record.delegator, record.vesting_shares, record.block);
        }
        return Ok(());
    }

    match job.run(Utc::now()).await? {
        DistributionOutcome::AlreadyDistributed { slot } => {
            println!("Rewards for {slot} were already distributed");
        }
        DistributionOutcome::NothingToDistribute => println!("No delegators to reward"),
        DistributionOutcome::Distributed { rewards } => {
            for reward in &rewards {
                println!("{:<20} {:>12.3} ({:.2}%)", reward.delegator, reward.reward, reward.share * 100.0);
            }
        }
    }
    Ok(())
}
