use crate::auth::Environment;
use crate::error::{AppleScanError, Result};
use apple_scan_common::AppleVariety;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 履歴の保存先
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// ホスティングされたテーブル `user_scans`
    #[default]
    Remote,
    /// 設定ディレクトリ内のJSONファイル（オフライン用）
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_upload_kb: u64,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub default_variety: AppleVariety,
    pub environment: Environment,
    pub history_backend: HistoryBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            supabase_url: None,
            supabase_anon_key: None,
            timeout_seconds: 30,  // 画像アップロードを考慮
            max_upload_kb: 500,
            max_dimension: 1024,
            jpeg_quality: 85,
            default_variety: AppleVariety::Combined,
            environment: Environment::Native,
            history_backend: HistoryBackend::Remote,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// 設定ディレクトリ（セッション・ローカル履歴もここに置く）
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppleScanError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("apple-scan"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    // 環境変数を優先
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("APPLE_SCAN_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            if !url.trim().is_empty() {
                self.supabase_url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
            if !key.trim().is_empty() {
                self.supabase_anon_key = Some(key);
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Supabaseの接続情報（URL, anonキー）
    pub fn supabase(&self) -> Result<(String, String)> {
        let url = self.supabase_url.clone().ok_or_else(|| {
            AppleScanError::Config("supabase_url が設定されていません（環境変数 SUPABASE_URL）".into())
        })?;
        let key = self.supabase_anon_key.clone().ok_or_else(|| {
            AppleScanError::Config("supabase_anon_key が設定されていません（環境変数 SUPABASE_ANON_KEY）".into())
        })?;
        Ok((url.trim_end_matches('/').to_string(), key))
    }

    /// 推定APIのURLを設定（http/https のみ）
    pub fn set_api_url(&mut self, url: &str) -> Result<()> {
        self.api_base_url = parse_http_url(url)?;
        Ok(())
    }

    /// SupabaseのURLを設定（http/https のみ）
    pub fn set_supabase_url(&mut self, url: &str) -> Result<()> {
        self.supabase_url = Some(parse_http_url(url)?);
        Ok(())
    }
}

fn parse_http_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| AppleScanError::Config(format!("URLが不正です ({}): {}", trimmed, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AppleScanError::Config(format!(
            "http(s) のURLを指定してください: {}",
            trimmed
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
