//! セッションの永続化
//!
//! プロセスをまたいでセッションと保留中のOAuth情報を保持する。

use super::Session;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const SESSION_FILE_NAME: &str = "session.json";
const PENDING_FILE_NAME: &str = "pending-oauth.json";

/// 保留中のOAuthサインイン
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingOAuth {
    /// PKCEのcode_verifier（インプリシットフローではNone）
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub redirect_to: String,
    /// 受け取ったコールバックURL（未着ならNone）
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionFile {
    dir: PathBuf,
}

impl SessionFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_session(&self) -> Option<Session> {
        read_json(&self.dir.join(SESSION_FILE_NAME))
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        write_json(&self.dir.join(SESSION_FILE_NAME), session)
    }

    pub fn clear_session(&self) -> Result<bool> {
        remove_if_exists(&self.dir.join(SESSION_FILE_NAME))
    }

    pub fn load_pending(&self) -> Option<PendingOAuth> {
        read_json(&self.dir.join(PENDING_FILE_NAME))
    }

    pub fn save_pending(&self, pending: &PendingOAuth) -> Result<()> {
        write_json(&self.dir.join(PENDING_FILE_NAME), pending)
    }

    pub fn clear_pending(&self) -> Result<bool> {
        remove_if_exists(&self.dir.join(PENDING_FILE_NAME))
    }
}

// 壊れたファイルは存在しないものとして扱う
fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let file = File::open(path).ok()?;
    serde_json::from_reader(BufReader::new(file)).ok()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        std::fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            user_id: "user-1".into(),
            email: Some("a@example.com".into()),
            expires_at: None,
        }
    }

    #[test]
    fn test_session_save_load_clear() {
        let dir = tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("nested"));

        assert!(file.load_session().is_none());
        file.save_session(&session()).unwrap();
        assert_eq!(file.load_session(), Some(session()));

        assert!(file.clear_session().unwrap());
        assert!(!file.clear_session().unwrap());
        assert!(file.load_session().is_none());
    }

    #[test]
    fn test_corrupt_session_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE_NAME), "{not json").unwrap();

        let file = SessionFile::new(dir.path());
        assert!(file.load_session().is_none());
    }

    #[test]
    fn test_pending_roundtrip() {
        let dir = tempdir().unwrap();
        let file = SessionFile::new(dir.path());
        let pending = PendingOAuth {
            code_verifier: Some("verifier".into()),
            redirect_to: "applescan://auth/callback".into(),
            callback_url: None,
        };

        file.save_pending(&pending).unwrap();
        assert_eq!(file.load_pending(), Some(pending));
        assert!(file.clear_pending().unwrap());
        assert!(file.load_pending().is_none());
    }
}
