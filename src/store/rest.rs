//! Supabase/PostgREST session store
//!
//! Sessions and messages live in two tables exposed through PostgREST under
//! `{store_url}/rest/v1/{table}`. Reads are paged with `limit`/`offset`;
//! writes are single bulk requests filtered with `in.(...)`.
//!
//! Each write carries the whole id list in its URL query. A very large
//! retirement set can exceed the URL length a proxy or gateway in front of
//! the store accepts; such a request fails as a whole and is reported like
//! any other write failure.
//!
//! Nothing here retries. A failed request is mapped to a [`StoreError`] and
//! handed back to the reconciler, which stops the run.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::Config;
use crate::session::{Session, SessionId, UserId};
use crate::store::{SessionStore, StoreError, StoreOperation};

const SESSION_COLUMNS: &str = "id,user_id,created_at,is_active";

/// Connection settings for [`RestStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct RestStoreConfig {
    pub store_url: String,
    pub api_key: String,
    pub sessions_table: String,
    pub messages_table: String,
    pub page_size: usize,
    pub timeout_seconds: u64,
}

impl RestStoreConfig {
    /// Extracts the store settings from the loaded configuration
    ///
    /// Fails when the URL or the key is missing, or when the page size is zero.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store_url = config
            .store_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                StoreError::config("store_url is not set (config file, SESSIONSWEEP_STORE_URL or --store-url)")
            })?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::config("api_key is not set (config file or SESSIONSWEEP_API_KEY)"))?;

        if config.page_size == 0 {
            return Err(StoreError::config("page_size must be greater than zero"));
        }

        Ok(Self {
            store_url: store_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sessions_table: config.sessions_table.clone(),
            messages_table: config.messages_table.clone(),
            page_size: config.page_size,
            timeout_seconds: config.timeout_seconds,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserIdRow {
    user_id: UserId,
}

/// Session store speaking the PostgREST dialect
#[derive(Debug, Clone)]
pub struct RestStore {
    config: RestStoreConfig,
    client: Client,
}

impl RestStore {
    /// Builds the store and its HTTP client
    pub fn try_new(config: RestStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| StoreError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Builds the store straight from the loaded configuration
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Self::try_new(RestStoreConfig::from_config(config)?)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.store_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
    }

    async fn send(&self, operation: StoreOperation, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        debug!(operation = %operation, status = %status, "Received store response");

        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => format!("<failed to read error body: {}>", e),
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::auth(format!(
                "{} rejected ({}): {}",
                operation, status, body
            ))),
            _ => Err(StoreError::request(status.as_u16(), body)),
        }
    }

    /// Reads every row matching `filters`, one page at a time, until a short page
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        operation: StoreOperation,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.table_url(table);
        let page_size = self.config.page_size;
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut query: Vec<(&str, String)> =
                filters.iter().map(|(k, v)| (*k, v.to_string())).collect();
            query.push(("limit", page_size.to_string()));
            query.push(("offset", offset.to_string()));

            debug!(operation = %operation, offset = offset, limit = page_size, "Fetching page");
            let response = self.send(operation, self.client.get(&url).query(&query)).await?;
            let page: Vec<T> = response.json().await?;
            let fetched = page.len();
            rows.extend(page);

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        Ok(rows)
    }
}

/// Renders a PostgREST `in.(...)` filter, quoting every id
pub fn in_filter(ids: &[SessionId]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| {
            let escaped = id.as_str().replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\"", escaped)
        })
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait::async_trait]
impl SessionStore for RestStore {
    async fn fetch_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        // id breaks created_at ties so pages never overlap
        let sessions: Vec<Session> = self
            .fetch_all(
                StoreOperation::FetchActiveSessions,
                &self.config.sessions_table,
                &[
                    ("select", SESSION_COLUMNS),
                    ("is_active", "eq.true"),
                    ("order", "created_at.desc,id.desc"),
                ],
            )
            .await?;

        info!(
            table = %self.config.sessions_table,
            count = sessions.len(),
            "Fetched active sessions"
        );
        Ok(sessions)
    }

    async fn bulk_set_inactive(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let url = self.table_url(&self.config.sessions_table);
        let request = self
            .client
            .patch(&url)
            .query(&[("id", in_filter(ids))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_active": false }));

        self.send(StoreOperation::SetInactive, request).await?;
        debug!(count = ids.len(), "Sessions marked inactive");
        Ok(())
    }

    async fn bulk_delete_messages_by_session(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let url = self.table_url(&self.config.messages_table);
        let request = self
            .client
            .delete(&url)
            .query(&[("session_id", in_filter(ids))])
            .header("Prefer", "return=minimal");

        self.send(StoreOperation::DeleteMessages, request).await?;
        debug!(count = ids.len(), "Messages deleted");
        Ok(())
    }

    async fn fetch_active_session_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let rows: Vec<UserIdRow> = self
            .fetch_all(
                StoreOperation::FetchActiveUserIds,
                &self.config.sessions_table,
                &[
                    ("select", "user_id"),
                    ("is_active", "eq.true"),
                    ("order", "id.asc"),
                ],
            )
            .await?;

        Ok(rows.into_iter().map(|r| r.user_id).collect())
    }

    fn store_name(&self) -> &'static str {
        "postgrest"
    }
}
