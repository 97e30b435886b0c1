//! Supabase Auth (GoTrue) 連携
//!
//! - メール/パスワード: `/auth/v1/signup`, `/auth/v1/token?grant_type=password`
//! - OAuth: PKCEで `/auth/v1/authorize` を組み立て、コールバックの `code` を交換
//!   - Popup: ループバック (127.0.0.1) でコールバックを待ち受ける
//!   - Redirect: `applescan://auth/callback` を後で受け取り `redirect_result` で解決
//! - セッションは `SessionFile` に保存し、期限切れ時は refresh_token で更新

use super::{
    Credentials, IdentityProvider, OAuthProvider, PendingOAuth, ProviderSignIn, Session,
    SessionFile, SignInStrategy, NATIVE_CALLBACK_URL,
};
use crate::config::Config;
use crate::error::{AppleScanError, Result};
use apple_scan_common::extract_error_detail;
use async_trait::async_trait;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const POPUP_TIMEOUT_SECS: u64 = 300;
const PKCE_VERIFIER_LEN: usize = 64;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<UserResponse>,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Result<Session> {
        let user = self
            .user
            .ok_or_else(|| AppleScanError::Auth("応答にユーザー情報がありません".into()))?;
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: user.id,
            email: user.email,
            expires_at: expires_at(self.expires_at, self.expires_in),
        })
    }
}

fn expires_at(at: Option<i64>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    at.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .or_else(|| expires_in.map(|secs| Utc::now() + Duration::seconds(secs)))
}

/// OAuthコールバックURLのパラメータ（クエリとフラグメントの両方を見る）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}

/// コールバックURLを解析
///
/// # Examples
/// ```
/// use apple_scan_rust::auth::parse_callback;
///
/// let params = parse_callback("applescan://auth/callback?code=abc").unwrap();
/// assert_eq!(params.code.as_deref(), Some("abc"));
/// ```
pub fn parse_callback(callback_url: &str) -> Result<CallbackParams> {
    let url = Url::parse(callback_url)
        .map_err(|e| AppleScanError::Auth(format!("コールバックURLが不正です: {}", e)))?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // フラグメントはクエリと同じ形式で解析する
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        if let Ok(fragment_url) = Url::parse(&format!("http://callback/?{}", fragment)) {
            pairs.extend(
                fragment_url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }
    }

    let mut params = CallbackParams::default();
    let mut error_code = None;
    for (key, value) in pairs {
        match key.as_str() {
            "code" => params.code = Some(value),
            "access_token" => params.access_token = Some(value),
            "refresh_token" => params.refresh_token = Some(value),
            "expires_in" => params.expires_in = value.parse().ok(),
            "error_description" => params.error = Some(value),
            "error" => error_code = Some(value),
            _ => {}
        }
    }
    if params.error.is_none() {
        params.error = error_code;
    }

    Ok(params)
}

fn pkce_verifier() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::thread_rng();
    (0..PKCE_VERIFIER_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    sessions: SessionFile,
    url_handler: Arc<dyn Fn(&str) + Send + Sync>,
    popup_timeout: std::time::Duration,
}

impl SupabaseAuth {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        sessions: SessionFile,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppleScanError::Config(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            sessions,
            url_handler: Arc::new(|url: &str| info!(%url, "open this URL to sign in")),
            popup_timeout: std::time::Duration::from_secs(POPUP_TIMEOUT_SECS),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let (url, key) = config.supabase()?;
        Self::new(url, key, SessionFile::new(Config::config_dir()?), config.request_timeout())
    }

    /// ポップアップ方式で認可URLを開く処理を差し替える
    pub fn with_url_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.url_handler = Arc::new(handler);
        self
    }

    pub fn with_popup_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.popup_timeout = timeout;
        self
    }

    /// 受け取ったリダイレクトのコールバックURLを記録する
    ///
    /// 次の `redirect_result`（通常は `AuthStore::initialize`）で解決される。
    pub fn record_redirect_callback(&self, callback_url: &str) -> Result<()> {
        parse_callback(callback_url)?;
        let mut pending = self.sessions.load_pending().unwrap_or_default();
        pending.callback_url = Some(callback_url.to_string());
        self.sessions.save_pending(&pending)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn authorize_url(&self, provider: OAuthProvider, redirect_to: &str, challenge: &str) -> Result<String> {
        Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map(|url| url.to_string())
        .map_err(|e| AppleScanError::Config(format!("認可URLの作成に失敗: {}", e)))
    }

    async fn post_token(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppleScanError::from_transport(&e))?;

        let token: TokenResponse = read_json(response).await?;
        token.into_session()
    }

    async fn fetch_user(&self, access_token: &str) -> Result<UserResponse> {
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppleScanError::from_transport(&e))?;

        read_json(response).await
    }

    async fn exchange_callback(&self, pending: &PendingOAuth, callback_url: &str) -> Result<Session> {
        let params = parse_callback(callback_url)?;

        if let Some(error) = params.error {
            return Err(AppleScanError::Auth(error));
        }

        if let Some(code) = params.code {
            let verifier = pending.code_verifier.as_deref().ok_or_else(|| {
                AppleScanError::Auth("code_verifier がありません。サインインをやり直してください".into())
            })?;
            return self
                .post_token("pkce", json!({ "auth_code": code, "code_verifier": verifier }))
                .await;
        }

        if let Some(access_token) = params.access_token {
            let user = self.fetch_user(&access_token).await?;
            return Ok(Session {
                access_token,
                refresh_token: params.refresh_token,
                user_id: user.id,
                email: user.email,
                expires_at: expires_at(None, params.expires_in),
            });
        }

        Err(AppleScanError::Auth("コールバックURLに認証情報がありません".into()))
    }

    async fn popup_sign_in(&self, provider: OAuthProvider) -> Result<Session> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_to = format!("http://127.0.0.1:{}/auth/callback", port);

        let verifier = pkce_verifier();
        let url = self.authorize_url(provider, &redirect_to, &pkce_challenge(&verifier))?;
        (self.url_handler)(&url);

        let query = wait_for_callback(listener, self.popup_timeout).await?;
        debug!("auth: loopback callback received");

        let callback_url = format!("{}?{}", redirect_to, query);
        let pending = PendingOAuth {
            code_verifier: Some(verifier),
            redirect_to,
            callback_url: None,
        };
        self.exchange_callback(&pending, &callback_url).await
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.anon_key)
            .json(credentials)
            .send()
            .await
            .map_err(|e| AppleScanError::from_transport(&e))?;

        // メール確認が有効な場合はセッションなしでユーザーだけが返る
        let value: serde_json::Value = read_json(response).await?;
        if value.get("access_token").is_none() {
            return Err(AppleScanError::Auth(
                "確認メールを送信しました。メール内のリンクで確認してからサインインしてください".into(),
            ));
        }

        let session = serde_json::from_value::<TokenResponse>(value)?.into_session()?;
        self.sessions.save_session(&session)?;
        Ok(session)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let session = self
            .post_token("password", json!({ "email": credentials.email, "password": credentials.password }))
            .await?;
        self.sessions.save_session(&session)?;
        Ok(session)
    }

    async fn sign_in_with_provider(
        &self,
        provider: OAuthProvider,
        strategy: SignInStrategy,
    ) -> Result<ProviderSignIn> {
        match strategy {
            SignInStrategy::Popup => {
                let session = self.popup_sign_in(provider).await?;
                self.sessions.save_session(&session)?;
                Ok(ProviderSignIn::Completed(session))
            }
            SignInStrategy::Redirect => {
                let verifier = pkce_verifier();
                let authorize_url =
                    self.authorize_url(provider, NATIVE_CALLBACK_URL, &pkce_challenge(&verifier))?;
                self.sessions.save_pending(&PendingOAuth {
                    code_verifier: Some(verifier),
                    redirect_to: NATIVE_CALLBACK_URL.to_string(),
                    callback_url: None,
                })?;
                Ok(ProviderSignIn::Pending { authorize_url })
            }
        }
    }

    async fn redirect_result(&self) -> Result<Option<Session>> {
        let Some(pending) = self.sessions.load_pending() else {
            return Ok(None);
        };
        let Some(callback_url) = pending.callback_url.clone() else {
            return Ok(None);
        };

        // 認可コードは一度しか使えないため、結果にかかわらず破棄する
        let result = self.exchange_callback(&pending, &callback_url).await;
        self.sessions.clear_pending()?;

        let session = result?;
        self.sessions.save_session(&session)?;
        Ok(Some(session))
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.sessions.load_session() else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            self.sessions.clear_session()?;
            return Ok(None);
        };

        match self
            .post_token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(refreshed) => {
                debug!("auth: session refreshed");
                self.sessions.save_session(&refreshed)?;
                Ok(Some(refreshed))
            }
            Err(AppleScanError::Auth(message)) => {
                warn!(%message, "auth: refresh rejected, clearing session");
                self.sessions.clear_session()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.sessions.load_session() {
            let result = self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "auth: remote logout rejected");
                }
                Err(e) => warn!(error = %e, "auth: remote logout failed"),
                Ok(_) => {}
            }
        }

        self.sessions.clear_session()?;
        self.sessions.clear_pending()?;
        Ok(())
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppleScanError::from_transport(&e))?;

    if !status.is_success() {
        let message = extract_error_detail(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        return Err(AppleScanError::Auth(message));
    }

    serde_json::from_str(&body)
        .map_err(|e| AppleScanError::Auth(format!("応答の解析に失敗: {}", e)))
}

const CALLBACK_PAGE: &str =
    "<html><body>Sign-in complete. You can close this window.</body></html>";

type CallbackSlot = Arc<std::sync::Mutex<Option<oneshot::Sender<String>>>>;

async fn receive_callback(
    State(slot): State<CallbackSlot>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let sender = slot.lock().ok().and_then(|mut slot| slot.take());
    if let Some(sender) = sender {
        let _ = sender.send(query.unwrap_or_default());
    }
    Html(CALLBACK_PAGE)
}

/// ループバックで `/auth/callback` を1件受け取り、クエリ文字列を返す
///
/// favicon などそれ以外のパスは 404 を返して待ち続ける
async fn wait_for_callback(listener: TcpListener, timeout: std::time::Duration) -> Result<String> {
    let (query_tx, query_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let slot: CallbackSlot = Arc::new(std::sync::Mutex::new(Some(query_tx)));

    let app = Router::new()
        .route("/auth/callback", get(receive_callback))
        .with_state(slot);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        if let Err(e) = server.await {
            warn!(error = %e, "auth: loopback server stopped");
        }
    });

    let received = tokio::time::timeout(timeout, query_rx).await;
    let _ = shutdown_tx.send(());

    match received {
        Ok(Ok(query)) => Ok(query),
        Ok(Err(_)) => Err(AppleScanError::Auth("コールバックを受け取れませんでした".into())),
        Err(_) => Err(AppleScanError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_challenge_rfc7636_vector() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_pkce_verifier_charset() {
        let verifier = pkce_verifier();
        assert_eq!(verifier.len(), PKCE_VERIFIER_LEN);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c)));
        assert_ne!(verifier, pkce_verifier());
    }

    #[test]
    fn test_parse_callback_code() {
        let params = parse_callback("applescan://auth/callback?code=abc-123").unwrap();
        assert_eq!(params.code.as_deref(), Some("abc-123"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn test_parse_callback_fragment_tokens() {
        let params = parse_callback(
            "applescan://auth/callback#access_token=tok&refresh_token=ref&expires_in=3600&token_type=bearer",
        )
        .unwrap();
        assert_eq!(params.access_token.as_deref(), Some("tok"));
        assert_eq!(params.refresh_token.as_deref(), Some("ref"));
        assert_eq!(params.expires_in, Some(3600));
        assert_eq!(params.code, None);
    }

    #[test]
    fn test_parse_callback_error_prefers_description() {
        let params = parse_callback(
            "applescan://auth/callback?error=access_denied&error_description=User+cancelled+login",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("User cancelled login"));

        let params = parse_callback("applescan://auth/callback?error=server_error").unwrap();
        assert_eq!(params.error.as_deref(), Some("server_error"));
    }

    #[test]
    fn test_parse_callback_invalid() {
        assert!(matches!(parse_callback("not a url"), Err(AppleScanError::Auth(_))));
    }

    #[test]
    fn test_expires_at_prefers_absolute() {
        let at = expires_at(Some(1_700_000_000), Some(10)).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);

        let relative = expires_at(None, Some(3600)).unwrap();
        assert!(relative > Utc::now() + Duration::seconds(3500));
        assert!(expires_at(None, None).is_none());
    }

    #[test]
    fn test_authorize_url() {
        let dir = tempfile::tempdir().unwrap();
        let auth = SupabaseAuth::new(
            "https://demo.supabase.co/",
            "anon",
            SessionFile::new(dir.path()),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let url = auth
            .authorize_url(OAuthProvider::Apple, NATIVE_CALLBACK_URL, "challenge")
            .unwrap();
        assert!(url.starts_with("https://demo.supabase.co/auth/v1/authorize?"));
        assert!(url.contains("provider=apple"));
        assert!(url.contains("redirect_to=applescan%3A%2F%2Fauth%2Fcallback"));
        assert!(url.contains("code_challenge_method=s256"));
    }

    /// 他のパスは無視してコールバックのクエリだけを返す
    #[tokio::test]
    async fn test_wait_for_callback_ignores_other_paths() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let waiting = tokio::spawn(wait_for_callback(listener, std::time::Duration::from_secs(5)));

        let favicon = reqwest::get(format!("{}/favicon.ico", base)).await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let page = reqwest::get(format!("{}/auth/callback?code=abc&state=xyz", base))
            .await
            .unwrap();
        assert!(page.status().is_success());
        assert!(page.text().await.unwrap().contains("Sign-in complete"));

        let query = waiting.await.unwrap().unwrap();
        assert_eq!(query, "code=abc&state=xyz");
    }

    #[tokio::test]
    async fn test_wait_for_callback_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = wait_for_callback(listener, std::time::Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AppleScanError::Timeout)));
    }
}
