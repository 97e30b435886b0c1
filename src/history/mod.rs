//! スキャン履歴
//!
//! サインイン中のユーザーの履歴をテーブル（リモート or ローカルファイル）から
//! 読み書きし、新しい順のキャッシュを保持する。
//! 未サインイン時はすべての操作が何もしない（空を返す）。

mod local;
mod postgrest;

pub use local::LocalScanTable;
pub use postgrest::PostgrestScanTable;

use crate::auth::{AuthListener, AuthStore, Session};
use crate::error::{AppleScanError, Result};
use apple_scan_common::{HistoryStats, ScanHistoryItem};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// ユーザー単位のスキャン履歴テーブル
///
/// 行は `session.user_id` に紐づき、他ユーザーの行は見えない。
#[async_trait]
pub trait ScanTable: Send + Sync {
    /// 新しい順
    async fn list(&self, session: &Session) -> Result<Vec<ScanHistoryItem>>;

    /// 挿入して採番されたIDを返す
    async fn insert(&self, session: &Session, item: &ScanHistoryItem) -> Result<String>;

    /// 存在しないIDはエラーにしない
    async fn delete(&self, session: &Session, id: &str) -> Result<()>;

    async fn delete_all(&self, session: &Session) -> Result<()>;
}

/// 履歴キャッシュの状態
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryState {
    /// キャッシュの持ち主
    pub owner: Option<String>,
    /// 新しい順
    pub items: Vec<ScanHistoryItem>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct HistoryStore {
    table: Arc<dyn ScanTable>,
    auth: Arc<AuthStore>,
    state: watch::Sender<HistoryState>,
}

impl HistoryStore {
    /// 作成して認証ストアに登録する（ユーザーが変わるとキャッシュを破棄）
    pub fn new(table: Arc<dyn ScanTable>, auth: Arc<AuthStore>) -> Arc<Self> {
        let (state, _) = watch::channel(HistoryState::default());
        let store = Arc::new(Self { table, auth, state });

        let weak: Weak<Self> = Arc::downgrade(&store);
        store.auth.add_listener(weak);
        store
    }

    pub fn subscribe(&self) -> watch::Receiver<HistoryState> {
        self.state.subscribe()
    }

    /// 現在のユーザーのキャッシュ済み履歴
    pub fn items(&self) -> Vec<ScanHistoryItem> {
        let state = self.state.borrow();
        if state.owner.is_some() && state.owner == self.auth.user_id() {
            state.items.clone()
        } else {
            Vec::new()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats::from_history(&self.items())
    }

    /// リモートから読み直してキャッシュを置き換える
    pub async fn load(&self) -> Result<Vec<ScanHistoryItem>> {
        let Some(session) = self.auth.fresh_session().await else {
            debug!("history: not signed in, nothing to load");
            self.state.send_replace(HistoryState::default());
            return Ok(Vec::new());
        };

        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.table.list(&session).await {
            Ok(mut items) => {
                sort_newest_first(&mut items);
                debug!(count = items.len(), "history: loaded");
                self.state.send_replace(HistoryState {
                    owner: Some(session.user_id.clone()),
                    items: items.clone(),
                    loading: false,
                    error: None,
                });
                Ok(items)
            }
            Err(e) => Err(self.fail("load", e)),
        }
    }

    /// 追加（未サインインなら何もせず `None`）
    ///
    /// 保存後のIDはテーブル側の採番で置き換わる。
    pub async fn add(&self, item: ScanHistoryItem) -> Result<Option<ScanHistoryItem>> {
        let Some(session) = self.auth.fresh_session().await else {
            debug!("history: not signed in, skip add");
            return Ok(None);
        };

        let id = match self.table.insert(&session, &item).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail("add", e)),
        };
        let saved = ScanHistoryItem { id, ..item };
        info!(id = %saved.id, "history: scan saved");

        self.state.send_modify(|s| {
            if s.owner.as_deref() != Some(session.user_id.as_str()) {
                s.owner = Some(session.user_id.clone());
                s.items.clear();
            }
            s.items.retain(|existing| existing.id != saved.id);
            let at = s
                .items
                .iter()
                .position(|existing| existing.timestamp <= saved.timestamp)
                .unwrap_or(s.items.len());
            s.items.insert(at, saved.clone());
            s.error = None;
        });
        Ok(Some(saved))
    }

    /// 1件削除（存在しないIDは何もしない）
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(session) = self.auth.fresh_session().await else {
            return Ok(());
        };

        if let Err(e) = self.table.delete(&session, id).await {
            return Err(self.fail("delete", e));
        }
        self.state.send_modify(|s| {
            s.items.retain(|item| item.id != id);
            s.error = None;
        });
        Ok(())
    }

    /// 全件削除
    pub async fn clear_all(&self) -> Result<()> {
        let Some(session) = self.auth.fresh_session().await else {
            return Ok(());
        };

        if let Err(e) = self.table.delete_all(&session).await {
            return Err(self.fail("clear", e));
        }
        info!("history: cleared");
        self.state.send_replace(HistoryState {
            owner: Some(session.user_id),
            ..HistoryState::default()
        });
        Ok(())
    }

    fn fail(&self, operation: &str, err: AppleScanError) -> AppleScanError {
        let err = match err {
            AppleScanError::Persistence(_) => err,
            other => AppleScanError::Persistence(other.to_string()),
        };
        warn!(operation, error = %err, "history: operation failed");
        let message = err.to_string();
        self.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(message);
        });
        err
    }
}

impl AuthListener for HistoryStore {
    fn on_identity_changed(&self, user_id: Option<&str>) {
        debug!(user = ?user_id, "history: identity changed, dropping cache");
        self.state.send_replace(HistoryState::default());
    }
}

pub(crate) fn sort_newest_first(items: &mut [ScanHistoryItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
