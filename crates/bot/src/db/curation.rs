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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use knacksteem_curation::{DelegationRecord, DelegationSnapshot, QueueEntry, SyncCheckpoint};
use sqlx::{any::AnyPoolOptions, AnyPool, Row};

use super::DbError;

pub type CurationDbObj = Arc<dyn CurationBotDb + Send + Sync>;

const CHECKPOINT_KEY: &str = "delegations_checkpoint";
const LAST_DISTRIBUTION_KEY: &str = "last_distribution_at";

// Batch insert chunk size to avoid parameter limits
// PostgreSQL: 65535 max params, SQLite: 999-32766 params (configurable)
// Using conservative chunk size that works safely for both databases
const BATCH_INSERT_CHUNK_SIZE: usize = 75;

const CREDIT_QUERY: &str = r#"
    INSERT INTO reward_ledger (username, balance, updated_at)
    VALUES ($1, $2, CURRENT_TIMESTAMP)
    ON CONFLICT (username)
    DO UPDATE SET
        balance = reward_ledger.balance + EXCLUDED.balance,
        updated_at = CURRENT_TIMESTAMP
"#;

#[async_trait]
pub trait CurationBotDb {
    /// Add an approved post to the voting queue. Re-approving a queued post is a no-op.
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), DbError>;

    /// All queued posts, oldest first.
    async fn list_queue(&self) -> Result<Vec<QueueEntry>, DbError>;

    /// Remove a post from the queue. Returns whether it was queued.
    async fn remove_from_queue(&self, permlink: &str) -> Result<bool, DbError>;

    /// Add `amount` to the balance of `username`, creating the entry if needed.
    async fn credit(&self, username: &str, amount: f64) -> Result<(), DbError>;

    /// Remove a voted post from the queue and credit its author in one transaction.
    /// Returns whether the post was still queued.
    async fn settle_vote(&self, permlink: &str, author: &str, amount: f64)
        -> Result<bool, DbError>;

    /// Create zero-balance ledger entries for users that have none.
    async fn ensure_ledger_entries(&self, usernames: &[String]) -> Result<(), DbError>;

    async fn get_balance(&self, username: &str) -> Result<Option<f64>, DbError>;

    /// Replace the persisted delegation snapshot and its checkpoint.
    async fn replace_delegations(&self, snapshot: &DelegationSnapshot) -> Result<(), DbError>;

    /// The persisted snapshot, or `None` if no sync has completed yet.
    async fn get_delegations(&self) -> Result<Option<DelegationSnapshot>, DbError>;

    async fn get_last_distribution(&self) -> Result<Option<DateTime<Utc>>, DbError>;

    async fn set_last_distribution(&self, at: DateTime<Utc>) -> Result<(), DbError>;
}

pub struct CurationDb {
    pool: AnyPool,
}

impl CurationDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(10).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>, DbError> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn set_state(&self, key: &str, value: String) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO bot_state (key, value, updated_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP
        "#;
        sqlx::query(query).bind(key).bind(value).execute(&self.pool).await?;
        Ok(())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::BadValue("created_at", millis.to_string()))
}

#[async_trait]
impl CurationBotDb for CurationDb {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO bot_queue (permlink, author, weight, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (permlink) DO NOTHING
        "#;
        sqlx::query(query)
            .bind(entry.permlink.to_lowercase())
            .bind(entry.author.trim().to_string())
            .bind(i64::from(entry.weight))
            .bind(to_millis(entry.created_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_queue(&self) -> Result<Vec<QueueEntry>, DbError> {
        let query = r#"
            SELECT permlink, author, weight, created_at
            FROM bot_queue
            ORDER BY created_at ASC, permlink ASC
        "#;
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let weight = row.get::<i64, _>("weight");
            entries.push(QueueEntry {
                author: row.get::<String, _>("author"),
                permlink: row.get::<String, _>("permlink"),
                weight: u16::try_from(weight)
                    .map_err(|_| DbError::BadValue("weight", weight.to_string()))?,
                created_at: from_millis(row.get::<i64, _>("created_at"))?,
            });
        }
        Ok(entries)
    }

    async fn remove_from_queue(&self, permlink: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM bot_queue WHERE permlink = $1")
            .bind(permlink.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn credit(&self, username: &str, amount: f64) -> Result<(), DbError> {
        sqlx::query(CREDIT_QUERY).bind(username).bind(amount).execute(&self.pool).await?;
        Ok(())
    }

    async fn settle_vote(
        &self,
        permlink: &str,
        author: &str,
        amount: f64,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM bot_queue WHERE permlink = $1")
            .bind(permlink.to_lowercase())
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREDIT_QUERY).bind(author).bind(amount).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(removed.rows_affected() > 0)
    }

    async fn ensure_ledger_entries(&self, usernames: &[String]) -> Result<(), DbError> {
        if usernames.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in usernames.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| format!("(${},${},CURRENT_TIMESTAMP)", i * 2 + 1, i * 2 + 2))
                .collect();
            let query = format!(
                r#"INSERT INTO reward_ledger (username, balance, updated_at)
                VALUES {}
                ON CONFLICT (username) DO NOTHING"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for username in chunk {
                q = q.bind(username.clone()).bind(0.0f64);
            }
            q.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_balance(&self, username: &str) -> Result<Option<f64>, DbError> {
        let row = sqlx::query("SELECT balance FROM reward_ledger WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<f64, _>("balance")))
    }

    async fn replace_delegations(&self, snapshot: &DelegationSnapshot) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM delegations").execute(&mut *tx).await?;

        // Process in chunks to avoid parameter limits
        for chunk in snapshot.records.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let mut values_clauses = Vec::new();
            let mut param_idx = 1;

            for _ in chunk {
                values_clauses.push(format!(
                    "(${},${},${},${},${})",
                    param_idx,
                    param_idx + 1,
                    param_idx + 2,
                    param_idx + 3,
                    param_idx + 4
                ));
                param_idx += 5;
            }

            let query = format!(
                r#"INSERT INTO delegations
                (delegator, vesting_shares, block, trx_id, sequence)
                VALUES {}"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for record in chunk {
                q = q
                    .bind(record.delegator.clone())
                    .bind(record.vesting_shares)
                    .bind(record.block as i64)
                    .bind(record.trx_id.clone())
                    .bind(record.sequence as i64);
            }
            q.execute(&mut *tx).await?;
        }

        match snapshot.checkpoint {
            Some(checkpoint) => {
                let query = r#"
                    INSERT INTO bot_state (key, value, updated_at)
                    VALUES ($1, $2, CURRENT_TIMESTAMP)
                    ON CONFLICT (key)
                    DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP
                "#;
                sqlx::query(query)
                    .bind(CHECKPOINT_KEY)
                    .bind(checkpoint.last_sequence.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM bot_state WHERE key = $1")
                    .bind(CHECKPOINT_KEY)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_delegations(&self) -> Result<Option<DelegationSnapshot>, DbError> {
        let checkpoint = match self.get_state(CHECKPOINT_KEY).await? {
            Some(value) => Some(SyncCheckpoint {
                last_sequence: value
                    .parse()
                    .map_err(|_| DbError::BadValue(CHECKPOINT_KEY, value.clone()))?,
            }),
            None => None,
        };

        let query = r#"
            SELECT delegator, vesting_shares, block, trx_id, sequence
            FROM delegations
            ORDER BY vesting_shares DESC, delegator ASC
        "#;
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        let records: Vec<DelegationRecord> = rows
            .into_iter()
            .map(|row| DelegationRecord {
                delegator: row.get::<String, _>("delegator"),
                vesting_shares: row.get::<f64, _>("vesting_shares"),
                block: row.get::<i64, _>("block") as u64,
                trx_id: row.get::<String, _>("trx_id"),
                sequence: row.get::<i64, _>("sequence") as u64,
            })
            .collect();

        if checkpoint.is_none() && records.is_empty() {
            return Ok(None);
        }
        Ok(Some(DelegationSnapshot { records, checkpoint }))
    }

    async fn get_last_distribution(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        match self.get_state(LAST_DISTRIBUTION_KEY).await? {
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|at| Some(at.with_timezone(&Utc)))
                .map_err(|_| DbError::BadValue(LAST_DISTRIBUTION_KEY, value)),
            None => Ok(None),
        }
    }

    async fn set_last_distribution(&self, at: DateTime<Utc>) -> Result<(), DbError> {
        self.set_state(LAST_DISTRIBUTION_KEY, at.to_rfc3339()).await
    }
}
