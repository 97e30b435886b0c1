//! 推定APIクライアント
//!
//! - `GET  /health`
//! - `POST /analyze?variety=<variety>` （multipart: `file`）
//!
//! 認証済みならすべてのリクエストに `Authorization: Bearer <token>` を付ける。

use crate::config::Config;
use crate::error::{AppleScanError, Result};
use crate::photo::ImagePayload;
use apple_scan_common::{
    extract_error_detail, parse_analyze_response, parse_health_response, AnalyzeResponse,
    AppleVariety, HealthCheckResponse,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// アップロード時のファイル名
pub const UPLOAD_FILE_NAME: &str = "apple.jpg";

/// アクセストークンの取得元
///
/// 未認証なら `None`（ヘッダーを付けない）。
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// 固定トークン
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[async_trait]
pub trait AnalyzeApi: Send + Sync {
    async fn analyze(&self, image: &ImagePayload, variety: AppleVariety) -> Result<AnalyzeResponse>;

    async fn health_check(&self) -> Result<HealthCheckResponse>;
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppleScanError::Config(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn from_config(config: &Config, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::new(&config.api_base_url, config.request_timeout(), tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 共通ヘッダー（トークンがあるときだけ Authorization を付ける）
    async fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.access_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn build_health_request(&self) -> Result<reqwest::Request> {
        self.authorize(self.http.get(self.url("health")))
            .await
            .build()
            .map_err(|e| AppleScanError::Network(e.to_string()))
    }

    pub async fn build_analyze_request(
        &self,
        image: &ImagePayload,
        variety: AppleVariety,
    ) -> Result<reqwest::Request> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(&image.mime_type)
            .map_err(|e| AppleScanError::ImageLoad(format!("MIMEタイプが不正です: {}", e)))?;
        let form = Form::new().part("file", part);

        let builder = self
            .http
            .post(self.url("analyze"))
            .query(&[("variety", variety.as_str())])
            .multipart(form);

        self.authorize(builder)
            .await
            .build()
            .map_err(|e| AppleScanError::Network(e.to_string()))
    }

    /// 送信して本文を返す（2xx以外はサーバーの detail をメッセージにする）
    async fn execute(&self, request: reqwest::Request) -> Result<String> {
        let method = request.method().clone();
        let url = request.url().path().to_string();

        let response = self.http.execute(request).await.map_err(|e| {
            warn!(%method, %url, error = %e, "api: request failed");
            AppleScanError::from_transport(&e)
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppleScanError::from_transport(&e))?;
        debug!(%method, %url, status = status.as_u16(), bytes = body.len(), "api: response");

        if !status.is_success() {
            let message = extract_error_detail(&body).unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("request failed").to_string()
            });
            return Err(AppleScanError::from_status(status.as_u16(), message));
        }

        Ok(body)
    }
}

#[async_trait]
impl AnalyzeApi for ApiClient {
    async fn analyze(&self, image: &ImagePayload, variety: AppleVariety) -> Result<AnalyzeResponse> {
        info!(variety = variety.as_str(), bytes = image.len(), "api: analyze");
        let request = self.build_analyze_request(image, variety).await?;
        let body = self.execute(request).await?;

        // 200でも success=false や壊れたJSONはサーバー側の不具合として扱う
        parse_analyze_response(&body).map_err(|e| AppleScanError::HttpServer {
            status: 200,
            message: extract_error_detail(&body).unwrap_or_else(|| e.to_string()),
        })
    }

    async fn health_check(&self) -> Result<HealthCheckResponse> {
        let request = self.build_health_request().await?;
        let body = self.execute(request).await?;
        parse_health_response(&body).map_err(|e| AppleScanError::HttpServer {
            status: 200,
            message: e.to_string(),
        })
    }
}
