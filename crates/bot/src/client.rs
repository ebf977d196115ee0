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

//! JSON-RPC client for a Steem API node.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use knacksteem_curation::{
    Account, CurationError, DynamicGlobalProperties, HistoryCursor, HistoryEntry, SteemApi,
    MAX_HISTORY_PAGE_SIZE,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

/// [SteemApi] implementation backed by the condenser API of a JSON-RPC node.
pub struct SteemClient {
    http: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl SteemClient {
    pub fn new(url: Url) -> Result<Self, CurationError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CurationError::Rpc(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, url, next_id: AtomicU64::new(1) })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, CurationError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        tracing::trace!("RPC {} {}", method, request.params);

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| CurationError::Rpc(format!("{method}: {e}")))?
            .error_for_status()
            .map_err(|e| CurationError::Rpc(format!("{method}: {e}")))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| CurationError::Rpc(format!("{method}: invalid response: {e}")))?;

        if let Some(err) = body.error {
            return Err(CurationError::Rpc(format!("{method}: {} ({})", err.message, err.code)));
        }
        body.result.ok_or_else(|| CurationError::Rpc(format!("{method}: empty result")))
    }
}

#[async_trait]
impl SteemApi for SteemClient {
    async fn get_account(&self, name: &str) -> Result<Account, CurationError> {
        let accounts: Vec<Account> =
            self.call("condenser_api.get_accounts", json!([[name]])).await?;
        accounts
            .into_iter()
            .find(|account| account.name == name)
            .ok_or_else(|| CurationError::AccountNotFound(name.to_string()))
    }

    async fn get_account_history(
        &self,
        account: &str,
        start: HistoryCursor,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, CurationError> {
        let limit = limit.min(MAX_HISTORY_PAGE_SIZE);
        self.call("condenser_api.get_account_history", json!([account, start, limit])).await
    }

    async fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, CurationError> {
        self.call("condenser_api.get_dynamic_global_properties", json!([])).await
    }
}
