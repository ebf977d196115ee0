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

use knacksteem_curation::{QueueEntry, MAX_VOTE_WEIGHT};
use serde_json::json;
use uuid::Uuid;

use crate::broadcast::{
    BroadcastError, BroadcastReceipt, BroadcasterObj, ChainOperation, CommentOperation,
    VoteOperation,
};

/// Reply posted under every voted entry. `{}` is replaced with the author name.
pub const COMMENT_TEMPLATE: &str = concat!(
    "<p>Hey @{}!</p> ",
    "<p><strong>Thanks for contributing on KnackSteem.</strong><br> ",
    "<strong><a href=\"https://knacksteem.org\">Knacksteem</a></strong> appreciates your ",
    "contribution and has rewarded you with an upvote for your hardwork.</p> ",
    "<p><strong>Knacksteem</strong> rewards individuals with unique talents and skills.</p> ",
    "<hr> ",
    "<p><a href=\"https://join.knacksteem.org/\">Join</a> the offline community on ",
    "<a href=\"https://discord.gg/t5RhBvE\">Discord</a><br> ",
    "<img src=\"https://join.knacksteem.org/img/logo.png\" alt=\"Knacksteem Logo\"></p>"
);

/// Result of voting on one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CastOutcome {
    /// The vote landed. `reply` is `None` when the courtesy reply failed.
    Voted { vote: BroadcastReceipt, reply: Option<BroadcastReceipt> },
    /// The chain refused the vote (deleted post, duplicate vote, ...).
    Rejected(String),
}

/// Broadcasts votes and replies on behalf of the bot account.
pub struct VoteCaster {
    account: String,
    broadcaster: BroadcasterObj,
    app_name: String,
    weight_override: Option<u16>,
}

impl VoteCaster {
    pub fn new(
        account: impl Into<String>,
        broadcaster: BroadcasterObj,
        app_name: impl Into<String>,
        weight_override: Option<u16>,
    ) -> Self {
        Self {
            account: account.into(),
            broadcaster,
            app_name: app_name.into(),
            weight_override: weight_override.map(|w| w.min(MAX_VOTE_WEIGHT)),
        }
    }

    /// Weight in basis points actually broadcast for `entry`.
    pub fn vote_weight(&self, entry: &QueueEntry) -> u16 {
        self.weight_override.unwrap_or(entry.weight).min(MAX_VOTE_WEIGHT)
    }

    pub async fn vote(&self, entry: &QueueEntry) -> Result<BroadcastReceipt, BroadcastError> {
        let weight = self.vote_weight(entry);
        let op = ChainOperation::Vote(VoteOperation {
            voter: self.account.clone(),
            author: entry.author.clone(),
            permlink: entry.permlink.clone(),
            // MAX_VOTE_WEIGHT fits in an i16.
            weight: weight as i16,
        });
        let receipt = self.broadcaster.broadcast(op).await?;
        tracing::info!(
            "Voted {}/{} at {:.2}%",
            entry.author,
            entry.permlink,
            f64::from(weight) / 100.0
        );
        Ok(receipt)
    }

    pub async fn comment(&self, entry: &QueueEntry) -> Result<BroadcastReceipt, BroadcastError> {
        let op = ChainOperation::Comment(self.reply_for(entry));
        let receipt = self.broadcaster.broadcast(op).await?;
        tracing::debug!("Replied to {}/{}", entry.author, entry.permlink);
        Ok(receipt)
    }

    /// Vote on `entry`, then reply if the vote landed.
    ///
    /// A transport or authorization failure on the vote is returned as an error. A rejected
    /// vote and a failed
    /// reply are both reported through the outcome.
    pub async fn cast(&self, entry: &QueueEntry) -> Result<CastOutcome, BroadcastError> {
        let vote = match self.vote(entry).await {
            Ok(receipt) => receipt,
            Err(BroadcastError::Rejected(reason)) => {
                tracing::warn!("Vote on {}/{} rejected: {}", entry.author, entry.permlink, reason);
                return Ok(CastOutcome::Rejected(reason));
            }
            Err(err) => return Err(err),
        };

        let reply = match self.comment(entry).await {
            Ok(receipt) => Some(receipt),
            Err(err) => {
                tracing::warn!("Failed to reply to {}/{}: {}", entry.author, entry.permlink, err);
                None
            }
        };
        Ok(CastOutcome::Voted { vote, reply })
    }

    fn reply_for(&self, entry: &QueueEntry) -> CommentOperation {
        CommentOperation {
            parent_author: entry.author.clone(),
            parent_permlink: entry.permlink.clone(),
            author: self.account.clone(),
            permlink: Uuid::new_v4().simple().to_string(),
            title: String::new(),
            body: COMMENT_TEMPLATE.replace("{}", &entry.author),
            json_metadata: json!({ "app": self.app_name }).to_string(),
        }
    }
}
