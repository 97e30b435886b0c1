//! Supabase (PostgREST) の `user_scans` テーブル
//!
//! 行レベルセキュリティでユーザー自身の行だけが見える前提だが、
//! クエリにも `user_id=eq.<id>` を必ず付ける。

use super::ScanTable;
use crate::auth::Session;
use crate::config::Config;
use crate::error::{AppleScanError, Result};
use apple_scan_common::{extract_error_detail, ScanHistoryItem, ScanRow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const TABLE_NAME: &str = "user_scans";

pub struct PostgrestScanTable {
    http: reqwest::Client,
    endpoint: String,
    anon_key: String,
}

impl PostgrestScanTable {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppleScanError::Config(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/rest/v1/{}", base_url.into().trim_end_matches('/'), TABLE_NAME),
            anon_key: anon_key.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let (url, key) = config.supabase()?;
        Self::new(url, key, config.request_timeout())
    }

    fn request(&self, method: reqwest::Method, session: &Session) -> reqwest::RequestBuilder {
        self.http
            .request(method, &self.endpoint)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .query(&[("user_id", format!("eq.{}", session.user_id))])
    }
}

#[async_trait]
impl ScanTable for PostgrestScanTable {
    async fn list(&self, session: &Session) -> Result<Vec<ScanHistoryItem>> {
        let response = self
            .request(reqwest::Method::GET, session)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await;
        let body = read_body(response).await?;

        let rows: Vec<ScanRow> = serde_json::from_str(&body)
            .map_err(|e| AppleScanError::Persistence(format!("履歴の解析に失敗: {}", e)))?;
        debug!(count = rows.len(), "postgrest: rows fetched");
        Ok(rows.into_iter().map(ScanRow::into_item).collect())
    }

    async fn insert(&self, session: &Session, item: &ScanHistoryItem) -> Result<String> {
        let row = ScanRow::for_insert(&session.user_id, item);
        let response = self
            .http
            .post(&self.endpoint)
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(&session.access_token)
            .json(&row)
            .send()
            .await;
        let body = read_body(response).await?;

        let inserted: Vec<ScanRow> = serde_json::from_str(&body)
            .map_err(|e| AppleScanError::Persistence(format!("挿入結果の解析に失敗: {}", e)))?;
        inserted
            .into_iter()
            .next()
            .and_then(|row| row.id)
            .ok_or_else(|| AppleScanError::Persistence("挿入した行のIDが返されませんでした".into()))
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, session)
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await;
        read_body(response).await.map(|_| ())
    }

    async fn delete_all(&self, session: &Session) -> Result<()> {
        let response = self.request(reqwest::Method::DELETE, session).send().await;
        read_body(response).await.map(|_| ())
    }
}

async fn read_body(response: reqwest::Result<reqwest::Response>) -> Result<String> {
    let response = response.map_err(|e| AppleScanError::Persistence(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppleScanError::Persistence(e.to_string()))?;

    if !status.is_success() {
        let detail = extract_error_detail(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        return Err(AppleScanError::Persistence(format!("{} ({})", detail, status.as_u16())));
    }
    Ok(body)
}
