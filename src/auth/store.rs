//! 認証状態ストア
//!
//! 状態遷移: `Uninitialized → Initializing → {Authenticated, Unauthenticated}`
//! サインアウトで `Unauthenticated` に戻る。
//!
//! 初期化の順序は固定:
//! 1. 保留中のOAuthリダイレクト結果を先に解決する
//! 2. リダイレクトがなければ現在のセッションを確認する
//! 3. 状態を確定する
//!
//! 1より先に2を行うと、リダイレクト直後のユーザーを未ログインと誤判定する。

use super::{Credentials, Environment, IdentityProvider, OAuthProvider, ProviderSignIn, Session, SignInStrategy};
use crate::api::TokenSource;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

/// 認証状態
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Uninitialized,
    Initializing,
    Authenticated(Session),
    Unauthenticated,
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session().map(|s| s.user_id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    /// 初期化が終わっているか
    pub fn is_settled(&self) -> bool {
        matches!(self, AuthState::Authenticated(_) | AuthState::Unauthenticated)
    }
}

/// サインイン中のユーザーが変わったときの通知先
///
/// サインアウト時は `None` で呼ばれる。
pub trait AuthListener: Send + Sync {
    fn on_identity_changed(&self, user_id: Option<&str>);
}

#[derive(Debug, Default)]
struct Status {
    loading: bool,
    error: Option<String>,
}

pub struct AuthStore {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<AuthState>,
    status: Mutex<Status>,
    listeners: Mutex<Vec<Weak<dyn AuthListener>>>,
    init: OnceCell<()>,
}

impl AuthStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(AuthState::Uninitialized);
        Self {
            provider,
            state,
            status: Mutex::new(Status::default()),
            listeners: Mutex::new(Vec::new()),
            init: OnceCell::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }

    pub fn is_loading(&self) -> bool {
        self.lock_status().loading
    }

    /// 直近のエラーメッセージ
    pub fn last_error(&self) -> Option<String> {
        self.lock_status().error.clone()
    }

    pub fn clear_error(&self) {
        self.lock_status().error = None;
    }

    /// 通知先を登録（弱参照で保持するため、破棄されたものは自動的に外れる）
    pub fn add_listener(&self, listener: Weak<dyn AuthListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// 初期化（プロセス中で一度だけ実行される）
    ///
    /// 同時に呼ばれた場合は最初の実行の完了を待つ。
    pub async fn initialize(&self) -> AuthState {
        self.init.get_or_init(|| self.run_initialize()).await;
        self.state()
    }

    async fn run_initialize(&self) {
        info!("auth: initializing");
        self.state.send_replace(AuthState::Initializing);

        // 1. リダイレクト結果（失敗は致命的ではない）
        let redirect_session = match self.provider.redirect_result().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "auth: redirect check failed (non-fatal)");
                self.lock_status().error = Some(e.to_string());
                None
            }
        };

        // 2. リダイレクトがなければ現在のセッション
        let settled = match redirect_session {
            Some(session) => {
                info!(user = %session.display_name(), "auth: OAuth redirect completed");
                AuthState::Authenticated(session)
            }
            None => match self.provider.current_session().await {
                Ok(Some(session)) => AuthState::Authenticated(session),
                Ok(None) => AuthState::Unauthenticated,
                Err(e) => {
                    warn!(error = %e, "auth: session check failed");
                    self.lock_status().error = Some(e.to_string());
                    AuthState::Unauthenticated
                }
            },
        };

        // 3. 確定
        self.settle(settled);
        info!(authenticated = self.state.borrow().is_authenticated(), "auth: initialized");
    }

    pub async fn sign_up(&self, credentials: &Credentials, confirm_password: &str) -> Result<Session> {
        credentials.validate_sign_up(confirm_password)?;
        self.initialize().await;

        self.begin();
        let result = self.provider.sign_up(credentials).await;
        self.finish_with_session(result)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        credentials.validate()?;
        self.initialize().await;

        self.begin();
        let result = self.provider.sign_in(credentials).await;
        self.finish_with_session(result)
    }

    /// OAuthサインイン
    ///
    /// 環境によって方式が決まる（Web: ポップアップ / Native: リダイレクト）。
    /// リダイレクト方式では状態は変わらず、セッションはコールバック後の
    /// `initialize` または `complete_redirect` で反映される。
    pub async fn sign_in_with_provider(
        &self,
        provider: OAuthProvider,
        environment: Environment,
    ) -> Result<ProviderSignIn> {
        self.initialize().await;
        let strategy = SignInStrategy::for_environment(environment);
        debug!(provider = provider.as_str(), ?strategy, "auth: OAuth sign-in");

        self.begin();
        match self.provider.sign_in_with_provider(provider, strategy).await {
            Ok(ProviderSignIn::Completed(session)) => {
                info!(user = %session.display_name(), "auth: popup sign-in success");
                self.end(None);
                self.settle(AuthState::Authenticated(session.clone()));
                Ok(ProviderSignIn::Completed(session))
            }
            Ok(pending @ ProviderSignIn::Pending { .. }) => {
                self.end(None);
                Ok(pending)
            }
            Err(e) => {
                warn!(provider = provider.as_str(), error = %e, "auth: OAuth error");
                self.end(Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// 初期化後に届いたリダイレクト結果を反映する
    pub async fn complete_redirect(&self) -> Result<AuthState> {
        self.initialize().await;
        match self.provider.redirect_result().await {
            Ok(Some(session)) => {
                self.settle(AuthState::Authenticated(session));
                Ok(self.state())
            }
            Ok(None) => Ok(self.state()),
            Err(e) => {
                self.lock_status().error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// サインアウト（履歴キャッシュはリスナー経由で破棄される）
    pub async fn sign_out(&self) -> Result<()> {
        self.initialize().await;

        self.begin();
        match self.provider.sign_out().await {
            Ok(()) => {
                self.end(None);
                self.settle(AuthState::Unauthenticated);
                info!("auth: signed out");
                Ok(())
            }
            Err(e) => {
                self.end(Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// 有効なセッションを返す（期限切れならプロバイダに更新させる）
    pub async fn fresh_session(&self) -> Option<Session> {
        let session = self.session()?;
        if !session.is_expired(Utc::now()) {
            return Some(session);
        }

        debug!("auth: cached session expired, asking provider");
        match self.provider.current_session().await {
            Ok(Some(refreshed)) => {
                self.settle(AuthState::Authenticated(refreshed.clone()));
                Some(refreshed)
            }
            Ok(None) => {
                self.settle(AuthState::Unauthenticated);
                None
            }
            Err(e) => {
                warn!(error = %e, "auth: session refresh failed");
                None
            }
        }
    }

    fn finish_with_session(&self, result: Result<Session>) -> Result<Session> {
        match result {
            Ok(session) => {
                self.end(None);
                self.settle(AuthState::Authenticated(session.clone()));
                Ok(session)
            }
            Err(e) => {
                self.end(Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn begin(&self) {
        let mut status = self.lock_status();
        status.loading = true;
        status.error = None;
    }

    fn end(&self, error: Option<String>) {
        let mut status = self.lock_status();
        status.loading = false;
        status.error = error;
    }

    /// 状態を更新し、ユーザーが変わった場合はリスナーへ通知
    fn settle(&self, next: AuthState) {
        let previous = self.state.send_replace(next);
        let current_user = self.user_id();

        if previous.user_id() != current_user.as_deref() {
            let listeners: Vec<Arc<dyn AuthListener>> = {
                let mut registered = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
                registered.retain(|l| l.strong_count() > 0);
                registered.iter().filter_map(Weak::upgrade).collect()
            };
            for listener in listeners {
                listener.on_identity_changed(current_user.as_deref());
            }
        }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenSource for AuthStore {
    async fn access_token(&self) -> Option<String> {
        self.fresh_session().await.map(|s| s.access_token)
    }
}
