//! テスト用のフェイク
//!
//! - FakeProvider: 呼び出し順を記録するIDプロバイダ
//! - MemoryTable: メモリ上の履歴テーブル
//! - FakeApi / StaticPhoto: スキャンの流れ用
//! - MockServer: 固定応答を返すHTTPサーバー

#![allow(dead_code)]

use apple_scan_common::{
    AnalyzeResponse, AppleVariety, ConfidenceInterval, HealthCheckResponse, ModelInfo,
    OxidationLevel, Prediction, ScanHistoryItem,
};
use apple_scan_rust::api::AnalyzeApi;
use apple_scan_rust::auth::{
    AuthStore, Credentials, IdentityProvider, OAuthProvider, ProviderSignIn, Session, SignInStrategy,
};
use apple_scan_rust::error::{AppleScanError, Result};
use apple_scan_rust::history::ScanTable;
use apple_scan_rust::photo::{ImagePayload, PhotoSource};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub fn session(user_id: &str) -> Session {
    Session {
        access_token: format!("token-{}", user_id),
        refresh_token: Some(format!("refresh-{}", user_id)),
        user_id: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        expires_at: None,
    }
}

pub fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
}

pub fn analyze_response(variety_used: AppleVariety) -> AnalyzeResponse {
    AnalyzeResponse {
        success: true,
        prediction: Prediction {
            days_since_cut: 2.4,
            confidence_interval: ConfidenceInterval { lower: 1.9, upper: 2.9 },
            interpretation: "Cut about two days ago".to_string(),
            oxidation_level: OxidationLevel::Light,
        },
        model_info: ModelInfo {
            variety_used,
            validation_mae: Some(0.41),
            training_samples: Some(120),
        },
    }
}

pub fn history_item(id: &str, variety: AppleVariety, minute: u32) -> ScanHistoryItem {
    ScanHistoryItem::from_response(
        id,
        format!("file:///photos/{}.jpg", id),
        &analyze_response(variety),
        ts(minute),
    )
}

pub const ANALYZE_OK_JSON: &str = r#"{
    "success": true,
    "prediction": {
        "days_since_cut": 2.4,
        "confidence_interval": {"lower": 1.9, "upper": 2.9},
        "interpretation": "Cut about two days ago",
        "oxidation_level": "light"
    },
    "model_info": {"variety_used": "gala", "validation_mae": 0.41, "training_samples": 120}
}"#;

// ---------------------------------------------------------------------------
// IDプロバイダ

#[derive(Default)]
pub struct FakeProvider {
    /// redirect_result が返すもの（Err はメッセージ）
    pub redirect: Mutex<Option<std::result::Result<Session, String>>>,
    pub current: Mutex<Option<Session>>,
    /// 期限切れ時に current_session が返す更新後のセッション
    pub refreshed: Mutex<Option<Session>>,
    pub reject_sign_in: Mutex<Option<String>>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_current(session: Session) -> Arc<Self> {
        let provider = Self::default();
        *provider.current.lock().unwrap() = Some(session);
        Arc::new(provider)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn issue(&self, credentials: &Credentials) -> Result<Session> {
        if let Some(message) = self.reject_sign_in.lock().unwrap().clone() {
            return Err(AppleScanError::Auth(message));
        }
        let user = credentials.email.split('@').next().unwrap_or("user").to_string();
        let session = session(&user);
        *self.current.lock().unwrap() = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        self.record("sign_up");
        self.issue(credentials)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.record("sign_in");
        self.issue(credentials)
    }

    async fn sign_in_with_provider(
        &self,
        provider: OAuthProvider,
        strategy: SignInStrategy,
    ) -> Result<ProviderSignIn> {
        self.record("sign_in_with_provider");
        match strategy {
            SignInStrategy::Popup => {
                let session = session(&format!("{}-user", provider.as_str()));
                *self.current.lock().unwrap() = Some(session.clone());
                Ok(ProviderSignIn::Completed(session))
            }
            SignInStrategy::Redirect => Ok(ProviderSignIn::Pending {
                authorize_url: format!("https://idp.example.com/authorize?provider={}", provider.as_str()),
            }),
        }
    }

    async fn redirect_result(&self) -> Result<Option<Session>> {
        self.record("redirect_result");
        // 少し待って、同時初期化の重複を検出しやすくする
        tokio::time::sleep(Duration::from_millis(10)).await;
        match self.redirect.lock().unwrap().take() {
            Some(Ok(session)) => {
                *self.current.lock().unwrap() = Some(session.clone());
                Ok(Some(session))
            }
            Some(Err(message)) => Err(AppleScanError::Auth(message)),
            None => Ok(None),
        }
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        self.record("current_session");
        let current = self.current.lock().unwrap().clone();
        match current {
            Some(s) if s.is_expired(Utc::now()) => {
                let refreshed = self.refreshed.lock().unwrap().take();
                *self.current.lock().unwrap() = refreshed.clone();
                Ok(refreshed)
            }
            other => Ok(other),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        self.record("sign_out");
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

/// サインイン済みの認証ストア
pub async fn signed_in_store(user_id: &str) -> (Arc<FakeProvider>, Arc<AuthStore>) {
    let provider = FakeProvider::with_current(session(user_id));
    let auth = Arc::new(AuthStore::new(provider.clone()));
    auth.initialize().await;
    (provider, auth)
}

// ---------------------------------------------------------------------------
// 履歴テーブル

#[derive(Default)]
pub struct MemoryTable {
    pub rows: Mutex<HashMap<String, Vec<ScanHistoryItem>>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows_for(&self, user_id: &str) -> Vec<ScanHistoryItem> {
        self.rows.lock().unwrap().get(user_id).cloned().unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(AppleScanError::Network("table unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScanTable for MemoryTable {
    async fn list(&self, session: &Session) -> Result<Vec<ScanHistoryItem>> {
        self.check()?;
        let mut items = self.rows_for(&session.user_id);
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(items)
    }

    async fn insert(&self, session: &Session, item: &ScanHistoryItem) -> Result<String> {
        self.check()?;
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let row = ScanHistoryItem {
            id: id.clone(),
            ..item.clone()
        };
        self.rows
            .lock()
            .unwrap()
            .entry(session.user_id.clone())
            .or_default()
            .push(row);
        Ok(id)
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        self.check()?;
        if let Some(items) = self.rows.lock().unwrap().get_mut(&session.user_id) {
            items.retain(|item| item.id != id);
        }
        Ok(())
    }

    async fn delete_all(&self, session: &Session) -> Result<()> {
        self.check()?;
        self.rows.lock().unwrap().remove(&session.user_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 推定API・写真

type AnalyzeFn = dyn Fn() -> Result<AnalyzeResponse> + Send + Sync;

pub struct FakeApi {
    respond: Box<AnalyzeFn>,
    /// (バイト数, MIME, 品種)
    pub received: Mutex<Vec<(usize, String, AppleVariety)>>,
}

impl FakeApi {
    pub fn new(respond: impl Fn() -> Result<AnalyzeResponse> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(variety_used: AppleVariety) -> Arc<Self> {
        Self::new(move || Ok(analyze_response(variety_used)))
    }
}

#[async_trait]
impl AnalyzeApi for FakeApi {
    async fn analyze(&self, image: &ImagePayload, variety: AppleVariety) -> Result<AnalyzeResponse> {
        self.received
            .lock()
            .unwrap()
            .push((image.len(), image.mime_type.clone(), variety));
        (self.respond)()
    }

    async fn health_check(&self) -> Result<HealthCheckResponse> {
        Ok(HealthCheckResponse {
            status: "healthy".into(),
            ..Default::default()
        })
    }
}

/// 固定の写真（またはエラー）を返す取得元
pub struct StaticPhoto(pub Box<dyn Fn() -> Result<ImagePayload> + Send + Sync>);

impl StaticPhoto {
    pub fn jpeg() -> Self {
        Self(Box::new(|| {
            Ok(ImagePayload::new(
                vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
                "file:///photos/apple.jpg",
            ))
        }))
    }

    pub fn failing(make: fn() -> AppleScanError) -> Self {
        Self(Box::new(move || Err(make())))
    }
}

#[async_trait]
impl PhotoSource for StaticPhoto {
    async fn capture(&self) -> Result<ImagePayload> {
        (self.0)()
    }
}

// ---------------------------------------------------------------------------
// HTTP

/// モックサーバーが受け取ったリクエスト
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// パスとクエリ
    pub fn target(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: Arc<String>,
    delay: Duration,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

async fn capture_request(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state.requests.lock().unwrap().push(CapturedRequest {
        method,
        uri,
        headers,
        body: body.to_vec(),
    });
    tokio::time::sleep(state.delay).await;
    (
        state.status,
        [(header::CONTENT_TYPE, "application/json")],
        state.body.to_string(),
    )
}

/// すべてのリクエストに同じ応答を返すサーバー
pub struct MockServer {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockServer {
    pub async fn start(status: u16, body: &str) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO).await
    }

    pub async fn start_with_delay(status: u16, body: &str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = MockState {
            status: StatusCode::from_u16(status).unwrap(),
            body: Arc::new(body.to_string()),
            delay,
            requests: requests.clone(),
        };
        let app = Router::new().fallback(capture_request).with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// 何も待ち受けていないURL
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}
