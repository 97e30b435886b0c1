//! ローカルファイルの履歴テーブル
//!
//! リモートを使わない場合の保存先。ユーザーIDごとに行を分けて
//! `history.json` に保存する。

use super::{sort_newest_first, ScanTable};
use crate::auth::Session;
use crate::error::{AppleScanError, Result};
use apple_scan_common::ScanHistoryItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

const HISTORY_FILE_NAME: &str = "history.json";

/// 履歴ファイルの構造
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    /// バージョン（互換性チェック用）
    version: u32,
    /// ユーザーID → 履歴
    entries: HashMap<String, Vec<ScanHistoryItem>>,
}

impl HistoryFile {
    const CURRENT_VERSION: u32 = 1;

    /// ファイルがなければ空。読めない・壊れている・バージョン違いはエラー（保存しない）
    fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(AppleScanError::Persistence(format!(
                    "履歴ファイルを開けません ({}): {}",
                    path.display(),
                    e
                )))
            }
        };

        let history: HistoryFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            warn!(error = %e, path = %path.display(), "history file unreadable");
            AppleScanError::Persistence(format!("履歴ファイルが壊れています: {}", e))
        })?;

        if history.version != Self::CURRENT_VERSION {
            warn!(version = history.version, "history file version mismatch");
            return Err(AppleScanError::Persistence(format!(
                "履歴ファイルのバージョンが違います: {} (対応: {})",
                history.version,
                Self::CURRENT_VERSION
            )));
        }
        Ok(history)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}

pub struct LocalScanTable {
    path: PathBuf,
    // 読み込み→更新→保存を直列化する
    lock: Mutex<()>,
}

impl LocalScanTable {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(HISTORY_FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn update<T>(&self, f: impl FnOnce(&mut HistoryFile) -> T) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut history = HistoryFile::load(&self.path)?;
        let out = f(&mut history);
        history.save(&self.path).map_err(persistence)?;
        Ok(out)
    }
}

fn persistence(err: AppleScanError) -> AppleScanError {
    AppleScanError::Persistence(err.to_string())
}

#[async_trait]
impl ScanTable for LocalScanTable {
    async fn list(&self, session: &Session) -> Result<Vec<ScanHistoryItem>> {
        let _guard = self.lock.lock().await;
        let mut history = HistoryFile::load(&self.path)?;
        let mut items = history.entries.remove(&session.user_id).unwrap_or_default();
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn insert(&self, session: &Session, item: &ScanHistoryItem) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = ScanHistoryItem {
            id: id.clone(),
            ..item.clone()
        };
        self.update(|history| {
            history
                .entries
                .entry(session.user_id.clone())
                .or_default()
                .push(row);
        })
        .await?;
        Ok(id)
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        self.update(|history| {
            if let Some(items) = history.entries.get_mut(&session.user_id) {
                items.retain(|item| item.id != id);
            }
        })
        .await
    }

    async fn delete_all(&self, session: &Session) -> Result<()> {
        self.update(|history| {
            history.entries.remove(&session.user_id);
        })
        .await
    }
}
