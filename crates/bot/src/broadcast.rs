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

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

pub type BroadcasterObj = Arc<dyn Broadcaster + Send + Sync>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth style error codes returned for an unusable access token.
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "unauthorized_access",
    "unauthorized_client",
    "access_denied",
];

fn is_auth_error(error: &Value) -> bool {
    error.as_str().is_some_and(|code| AUTH_ERROR_CODES.contains(&code))
}

#[derive(Error, Debug)]
pub enum BroadcastError {
    /// The operation may not have reached the chain; safe to retry later.
    #[error("Broadcast transport error: {0}")]
    Transport(String),

    /// The access token was refused (expired, revoked or missing scope). Nothing was
    /// broadcast and no later operation can succeed until the token is replaced.
    #[error("Broadcast not authorized: {0}")]
    Unauthorized(String),

    /// The chain or the broadcast service refused the operation.
    #[error("Broadcast rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOperation {
    pub voter: String,
    pub author: String,
    pub permlink: String,
    /// Basis points, in [-10000, 10000].
    pub weight: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentOperation {
    pub parent_author: String,
    pub parent_permlink: String,
    pub author: String,
    pub permlink: String,
    pub title: String,
    pub body: String,
    /// JSON encoded metadata string.
    pub json_metadata: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOperation {
    Vote(VoteOperation),
    Comment(CommentOperation),
}

impl ChainOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ChainOperation::Vote(_) => "vote",
            ChainOperation::Comment(_) => "comment",
        }
    }

    /// `[name, payload]` pair as expected by broadcast APIs.
    pub fn to_json(&self) -> Value {
        let payload = match self {
            ChainOperation::Vote(op) => json!(op),
            ChainOperation::Comment(op) => json!(op),
        };
        json!([self.name(), payload])
    }
}

/// Identifies a broadcast transaction when the service reports it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReceipt {
    pub trx_id: Option<String>,
    pub block_num: Option<u64>,
}

#[async_trait]
pub trait Broadcaster {
    async fn broadcast(&self, operation: ChainOperation) -> Result<BroadcastReceipt, BroadcastError>;
}

/// Broadcaster backed by a SteemConnect compatible HTTP API.
pub struct ScBroadcaster {
    http: reqwest::Client,
    endpoint: Url,
    access_token: String,
}

#[derive(Deserialize)]
struct ScResponse {
    #[serde(default)]
    result: Option<ScResult>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct ScResult {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    block_num: Option<u64>,
}

impl ScBroadcaster {
    pub fn new(base_url: &Url, access_token: impl Into<String>) -> Result<Self, BroadcastError> {
        let endpoint = base_url
            .join("api/broadcast")
            .map_err(|e| BroadcastError::Transport(format!("invalid broadcast URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BroadcastError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoint, access_token: access_token.into() })
    }
}

#[async_trait]
impl Broadcaster for ScBroadcaster {
    async fn broadcast(&self, operation: ChainOperation) -> Result<BroadcastReceipt, BroadcastError> {
        let body = json!({ "operations": [operation.to_json()] });

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, &self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BroadcastError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| BroadcastError::Transport(e.to_string()))?;
        let parsed: Option<ScResponse> = serde_json::from_str(&text).ok();

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(BroadcastError::Unauthorized(format!("{status}: {text}")));
        }
        if let Some(ScResponse { error: Some(error), error_description, .. }) = &parsed {
            let reason = error_description.clone().unwrap_or_else(|| error.to_string());
            if is_auth_error(error) {
                return Err(BroadcastError::Unauthorized(format!("{} ({status})", reason)));
            }
            return Err(BroadcastError::Rejected(format!("{} ({status})", reason)));
        }
        if status.is_server_error() {
            return Err(BroadcastError::Transport(format!("{status}: {text}")));
        }
        if !status.is_success() {
            return Err(BroadcastError::Rejected(format!("{status}: {text}")));
        }

        let result = parsed.and_then(|r| r.result);
        Ok(BroadcastReceipt {
            trx_id: result.as_ref().and_then(|r| r.id.clone()),
            block_num: result.and_then(|r| r.block_num),
        })
    }
}

/// Logs operations instead of broadcasting them.
#[derive(Debug, Default)]
pub struct DryRunBroadcaster;

#[async_trait]
impl Broadcaster for DryRunBroadcaster {
    async fn broadcast(&self, operation: ChainOperation) -> Result<BroadcastReceipt, BroadcastError> {
        tracing::info!("[dry-run] would broadcast {}", operation.to_json());
        Ok(BroadcastReceipt::default())
    }
}
