//! 認証
//!
//! サインイン状態は `AuthStore` が保持し、実際の処理はすべて
//! `IdentityProvider`（外部のIDプロバイダ）に委譲する。

mod session_file;
mod store;
mod supabase;

pub use session_file::{PendingOAuth, SessionFile};
pub use store::{AuthListener, AuthState, AuthStore};
pub use supabase::{parse_callback, CallbackParams, SupabaseAuth};

use crate::error::{AppleScanError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 期限切れ判定の余裕
const EXPIRY_LEEWAY_SECS: i64 = 30;

const MIN_PASSWORD_LEN: usize = 6;

/// OAuthのコールバックURL（ネイティブのリダイレクト方式）
pub const NATIVE_CALLBACK_URL: &str = "applescan://auth/callback";

/// プロバイダが発行したセッションのキャッシュ（読み取り専用）
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|t| t <= now + Duration::seconds(EXPIRY_LEEWAY_SECS))
            .unwrap_or(false)
    }

    /// 表示用のユーザー名
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user_id)
    }
}

// トークンをログに出さない
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// メールアドレス/パスワード
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: password.into(),
        }
    }

    /// プロバイダに送る前のクライアント側チェック
    pub fn validate(&self) -> Result<()> {
        lazy_static::lazy_static! {
            static ref EMAIL_RE: regex::Regex =
                regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex");
        }

        if !EMAIL_RE.is_match(&self.email) {
            return Err(AppleScanError::Validation(format!(
                "メールアドレスの形式が正しくありません: {}", self.email
            )));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppleScanError::Validation(format!(
                "パスワードは{}文字以上にしてください", MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }

    /// 新規登録時のチェック（確認用パスワードの一致を含む）
    pub fn validate_sign_up(&self, confirm_password: &str) -> Result<()> {
        self.validate()?;
        if self.password != confirm_password {
            return Err(AppleScanError::Validation("パスワードが一致しません".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// OAuthプロバイダ
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }
}

/// 実行環境
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// ネイティブシェル（リダイレクト方式）
    #[default]
    Native,
    /// ブラウザ相当（ポップアップ方式）
    Web,
}

/// OAuthのサインイン方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignInStrategy {
    /// その場で完了し、セッションが返る
    Popup,
    /// 認可URLへ遷移し、セッションはコールバック経由で届く
    Redirect,
}

impl SignInStrategy {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Web => SignInStrategy::Popup,
            Environment::Native => SignInStrategy::Redirect,
        }
    }
}

/// OAuthサインインの結果
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSignIn {
    Completed(Session),
    Pending { authorize_url: String },
}

/// IDプロバイダ
///
/// セッションの発行・更新・破棄はすべてプロバイダが行う。
/// エラーは `AppleScanError::Auth` にプロバイダのメッセージをそのまま入れて返す。
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_in_with_provider(
        &self,
        provider: OAuthProvider,
        strategy: SignInStrategy,
    ) -> Result<ProviderSignIn>;

    /// 保留中のOAuthリダイレクトを解決する（なければNone）
    async fn redirect_result(&self) -> Result<Option<Session>>;

    /// 現在のセッション（期限切れなら更新を試みる）
    async fn current_session(&self) -> Result<Option<Session>>;

    async fn sign_out(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_credentials_validate() {
        assert!(Credentials::new("a@example.com", "secret1").validate().is_ok());
        assert!(matches!(
            Credentials::new("not-an-email", "secret1").validate(),
            Err(AppleScanError::Validation(_))
        ));
        assert!(matches!(
            Credentials::new("a@example.com", "12345").validate(),
            Err(AppleScanError::Validation(_))
        ));
    }

    #[test]
    fn test_credentials_trim_email() {
        let creds = Credentials::new("  a@example.com ", "secret1");
        assert_eq!(creds.email, "a@example.com");
    }

    #[test]
    fn test_sign_up_password_mismatch() {
        let creds = Credentials::new("a@example.com", "secret1");
        assert!(creds.validate_sign_up("secret1").is_ok());
        let err = creds.validate_sign_up("secret2").unwrap_err();
        assert!(matches!(err, AppleScanError::Validation(_)));
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut session = Session {
            access_token: "t".into(),
            refresh_token: None,
            user_id: "u".into(),
            email: None,
            expires_at: None,
        };
        assert!(!session.is_expired(now));

        session.expires_at = Some(now + Duration::seconds(10));
        assert!(session.is_expired(now));

        session.expires_at = Some(now + Duration::hours(1));
        assert!(!session.is_expired(now));
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session {
            access_token: "very-secret-token".into(),
            refresh_token: Some("refresh-secret".into()),
            user_id: "user-1".into(),
            email: Some("a@example.com".into()),
            expires_at: None,
        };
        let debug = format!("{:?}", session);
        assert!(debug.contains("user-1"));
        assert!(!debug.contains("very-secret-token"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[test]
    fn test_strategy_for_environment() {
        assert_eq!(SignInStrategy::for_environment(Environment::Web), SignInStrategy::Popup);
        assert_eq!(SignInStrategy::for_environment(Environment::Native), SignInStrategy::Redirect);
    }
}
