//! Supabase adapter
//!
//! Talks to the PostgREST API to check that an endpoint/key pair is usable
//! and to read or publish the key/value settings table.

use async_trait::async_trait;
use beacon_core::probe::{AUTH_ERROR, NETWORK_ERROR};
use beacon_core::{
    BeaconError, Configuration, ConnectivityProber, Credentials, PermissionLevel, ProbeResult,
    RemoteSettingsStore, Result, SettingRow,
};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// PostgREST: no rows for a single-object request
pub const RESOURCE_NOT_FOUND: &str = "PGRST116";
/// Postgres: relation does not exist
pub const UNDEFINED_TABLE: &str = "42P01";
/// Postgres: insufficient privilege
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Supabase configuration
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Supabase project URL (e.g., https://xxx.supabase.co)
    pub url: String,
    /// Supabase anon or service role key
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl SupabaseConfig {
    /// Create a new Supabase configuration
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Thin PostgREST client bound to one endpoint and key
pub struct SupabaseClient {
    config: SupabaseConfig,
    client: Client,
}

impl SupabaseClient {
    /// Create a client; fails only if the key cannot be sent as a header
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "apikey",
            header::HeaderValue::from_str(&config.api_key)
                .map_err(|e| BeaconError::config(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| BeaconError::config(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| BeaconError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1/", self.config.url.trim_end_matches('/'))
    }

    /// Get the REST API URL for a table
    fn table_url(&self, table: &str) -> String {
        format!("{}{}", self.rest_url(), table)
    }

    async fn get(&self, url: &str) -> reqwest::Result<(StatusCode, String)> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// GET the REST root
    pub async fn get_root(&self) -> reqwest::Result<(StatusCode, String)> {
        self.get(&self.rest_url()).await
    }

    /// GET a table with a raw query string
    pub async fn get_table(&self, table: &str, query: &str) -> reqwest::Result<(StatusCode, String)> {
        self.get(&format!("{}?{}", self.table_url(table), query)).await
    }

    /// Execute a SELECT query
    pub async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let (status, body) = self.get_table(table, query).await?;
        if !status.is_success() {
            return Err(BeaconError::http(status.as_u16(), body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Execute an UPSERT query
    pub async fn upsert<T: Serialize>(&self, table: &str, data: &T, on_conflict: &str) -> Result<()> {
        let url = format!(
            "{}?on_conflict={}",
            self.table_url(table),
            urlencoding::encode(on_conflict)
        );

        let response = self
            .client
            .post(&url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BeaconError::http(status.as_u16(), body));
        }

        Ok(())
    }
}

/// `code` field of a PostgREST error body, if any
pub fn postgrest_error_code(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        code: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body).ok()?.code
}

/// Interpret the REST root response: `Ok` when the endpoint and key are usable,
/// otherwise the failure code
pub fn classify_root_response(status: StatusCode, body: &str) -> std::result::Result<(), String> {
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return Ok(());
    }
    if matches!(
        postgrest_error_code(body).as_deref(),
        Some(RESOURCE_NOT_FOUND) | Some(UNDEFINED_TABLE)
    ) {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AUTH_ERROR.to_string()),
        other => Err(format!("http_{}", other.as_u16())),
    }
}

/// Interpret the settings table read used as a permission check
pub fn permission_from_response(status: StatusCode, body: &str) -> PermissionLevel {
    if status.is_success() {
        return PermissionLevel::Read;
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || postgrest_error_code(body).as_deref() == Some(INSUFFICIENT_PRIVILEGE)
    {
        return PermissionLevel::Restricted;
    }
    PermissionLevel::Unverified
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Connectivity prober against the Supabase REST API
#[derive(Debug, Clone)]
pub struct SupabaseProber {
    settings_table: Option<String>,
    timeout: Duration,
}

impl Default for SupabaseProber {
    fn default() -> Self {
        Self::new()
    }
}

impl SupabaseProber {
    /// Prober that only checks the REST root
    pub fn new() -> Self {
        Self {
            settings_table: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Also try reading `table` to report a permission level
    pub fn with_permission_check(mut self, table: impl Into<String>) -> Self {
        self.settings_table = Some(table.into());
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn permission(&self, client: &SupabaseClient) -> PermissionLevel {
        let Some(table) = &self.settings_table else {
            return PermissionLevel::Unverified;
        };
        match client.get_table(table, "select=key&limit=1").await {
            Ok((status, body)) => permission_from_response(status, &body),
            Err(e) => {
                debug!("Permission check against {} failed: {}", table, e);
                PermissionLevel::Unverified
            }
        }
    }
}

#[async_trait]
impl ConnectivityProber for SupabaseProber {
    async fn probe(&self, config: &Configuration) -> ProbeResult {
        let client = match SupabaseClient::new(
            SupabaseConfig::new(&config.url, &config.anon_key).with_timeout(self.timeout),
        ) {
            Ok(client) => client,
            Err(e) => return ProbeResult::failed(AUTH_ERROR, e.to_string()),
        };

        let (status, body) = match client.get_root().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Supabase endpoint {} unreachable: {}", config.url, e);
                return ProbeResult::failed(NETWORK_ERROR, e.to_string());
            }
        };

        if let Err(code) = classify_root_response(status, &body) {
            warn!("Supabase endpoint {} rejected probe: {} ({})", config.url, code, status);
            let message = if body.trim().is_empty() {
                format!("{} returned {}", config.url, status)
            } else {
                format!("{} returned {}: {}", config.url, status, truncate(&body))
            };
            return ProbeResult::failed(code, message);
        }

        let permission = self.permission(&client).await;
        debug!("Supabase endpoint {} reachable ({:?})", config.url, permission);
        ProbeResult::connected(permission)
    }
}

#[derive(Deserialize)]
struct RawSettingRow {
    key: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl From<RawSettingRow> for SettingRow {
    fn from(raw: RawSettingRow) -> Self {
        let value = match raw.value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        SettingRow {
            key: raw.key,
            value,
        }
    }
}

/// PostgREST filter selecting `keys` from a key/value table
pub fn settings_query(keys: &[&str]) -> String {
    let list = keys
        .iter()
        .map(|k| urlencoding::encode(k).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    format!("select=key,value&key=in.({})", list)
}

/// Rows published for `config`; the service key itself is never written
pub fn publish_rows(config: &Configuration) -> Vec<SettingRow> {
    vec![
        SettingRow::new("supabase_url", config.url.trim()),
        SettingRow::new("supabase_anon_key", config.anon_key.trim()),
        SettingRow::new("initialized", "true"),
    ]
}

/// Key/value settings table in a Supabase project
#[derive(Debug, Clone)]
pub struct SupabaseSettingsStore {
    table: String,
    timeout: Duration,
}

impl SupabaseSettingsStore {
    /// Store backed by `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Upsert `config` into the settings table at `url`, authenticated with
    /// the service role key. Returns the number of rows written.
    pub async fn publish_settings(
        &self,
        url: &str,
        service_key: &str,
        config: &Configuration,
    ) -> Result<usize> {
        if service_key.trim().is_empty() {
            return Err(BeaconError::config(
                "Publishing settings requires the service role key",
            ));
        }
        beacon_core::validate_configuration(config)?;

        let client = SupabaseClient::new(
            SupabaseConfig::new(url, service_key.trim())
                .with_timeout(self.timeout),
        )?;
        let rows = publish_rows(config);
        client.upsert(&self.table, &rows, "key").await?;

        info!("Published {} settings to {} ({})", rows.len(), url, self.table);
        Ok(rows.len())
    }
}

#[async_trait]
impl RemoteSettingsStore for SupabaseSettingsStore {
    async fn fetch_settings(
        &self,
        credentials: &Credentials,
        keys: &[&str],
    ) -> Result<Vec<SettingRow>> {
        let client = SupabaseClient::new(
            SupabaseConfig::new(&credentials.url, &credentials.anon_key).with_timeout(self.timeout),
        )?;
        let rows: Vec<RawSettingRow> = client.select(&self.table, &settings_query(keys)).await?;
        debug!("Fetched {} settings rows from {}", rows.len(), self.table);
        Ok(rows.into_iter().map(SettingRow::from).collect())
    }
}
