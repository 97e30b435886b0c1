//! スキャンの流れ
//!
//! `Idle → PhotoPending → Analyzing → Result` の状態機械。
//! - 写真の取得: キャンセルは何も起こさない、その他の失敗は Idle にエラーを表示
//! - 解析: 圧縮してから推定APIへ送る。失敗したら Idle に戻してエラーを表示
//! - 保存: 履歴への保存失敗は結果表示を妨げない
//!
//! どの操作もサインイン済みでなければ `Unauthenticated` を返し、状態を変えない。

use crate::api::AnalyzeApi;
use crate::auth::AuthStore;
use crate::config::Config;
use crate::error::{AppleScanError, Result};
use crate::history::HistoryStore;
use crate::photo::{compress_with, CompressOptions, ImagePayload, PhotoSource};
use apple_scan_common::{AnalyzeResponse, AppleVariety, ScanHistoryItem};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum ScanPhase {
    Idle {
        error: Option<Arc<AppleScanError>>,
    },
    /// 撮影/選択済み、確認待ち
    PhotoPending { photo: ImagePayload },
    Analyzing,
    Result {
        response: AnalyzeResponse,
        /// 保存されていれば採番後の履歴アイテム
        saved: Option<ScanHistoryItem>,
        save_error: Option<Arc<AppleScanError>>,
    },
}

impl ScanPhase {
    pub fn idle() -> Self {
        ScanPhase::Idle { error: None }
    }

    pub fn error(&self) -> Option<&AppleScanError> {
        match self {
            ScanPhase::Idle { error } => error.as_deref(),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanPhase::Idle { .. } => "idle",
            ScanPhase::PhotoPending { .. } => "photo-pending",
            ScanPhase::Analyzing => "analyzing",
            ScanPhase::Result { .. } => "result",
        }
    }
}

pub struct ScanFlow {
    auth: Arc<AuthStore>,
    api: Arc<dyn AnalyzeApi>,
    history: Arc<HistoryStore>,
    compress: CompressOptions,
    variety: AppleVariety,
    phase: watch::Sender<ScanPhase>,
}

impl ScanFlow {
    pub fn new(auth: Arc<AuthStore>, api: Arc<dyn AnalyzeApi>, history: Arc<HistoryStore>) -> Self {
        let (phase, _) = watch::channel(ScanPhase::idle());
        Self {
            auth,
            api,
            history,
            compress: CompressOptions::default(),
            variety: AppleVariety::default(),
            phase,
        }
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.compress = CompressOptions {
            max_size_kb: config.max_upload_kb,
            max_dimension: config.max_dimension,
            quality: config.jpeg_quality,
        };
        self.variety = config.default_variety;
        self
    }

    pub fn with_compress_options(mut self, options: CompressOptions) -> Self {
        self.compress = options;
        self
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanPhase> {
        self.phase.subscribe()
    }

    pub fn variety(&self) -> AppleVariety {
        self.variety
    }

    /// 次の解析で使う品種（解析中でなければいつでも変更できる）
    pub fn set_variety(&mut self, variety: AppleVariety) {
        debug!(variety = variety.as_str(), "scan: variety selected");
        self.variety = variety;
    }

    /// 写真を取得して確認待ちにする
    pub async fn select_photo(&mut self, source: &dyn PhotoSource) -> Result<ScanPhase> {
        self.require_auth()?;
        if matches!(*self.phase.borrow(), ScanPhase::Analyzing) {
            return Err(AppleScanError::Validation("解析中は写真を変更できません".into()));
        }

        match source.capture().await {
            Ok(photo) => {
                debug!(bytes = photo.len(), mime = %photo.mime_type, "scan: photo captured");
                self.phase.send_replace(ScanPhase::PhotoPending { photo });
            }
            Err(AppleScanError::UserCancelled) => {
                debug!("scan: photo selection cancelled");
            }
            Err(e) => {
                warn!(error = %e, "scan: photo capture failed");
                self.phase.send_replace(ScanPhase::Idle {
                    error: Some(Arc::new(e)),
                });
            }
        }
        Ok(self.phase())
    }

    /// 確認待ちの写真を破棄
    pub fn cancel(&mut self) -> ScanPhase {
        if matches!(*self.phase.borrow(), ScanPhase::PhotoPending { .. }) {
            self.phase.send_replace(ScanPhase::idle());
        }
        self.phase()
    }

    /// 結果/エラーを閉じて最初に戻る
    pub fn reset(&mut self) -> ScanPhase {
        if !matches!(*self.phase.borrow(), ScanPhase::Analyzing) {
            self.phase.send_replace(ScanPhase::idle());
        }
        self.phase()
    }

    /// 確認待ちの写真を解析し、結果を履歴に保存する
    pub async fn confirm(&mut self) -> Result<ScanPhase> {
        self.require_auth()?;
        let photo = match &*self.phase.borrow() {
            ScanPhase::PhotoPending { photo } => photo.clone(),
            _ => {
                return Err(AppleScanError::Validation("解析する写真がありません".into()));
            }
        };

        self.phase.send_replace(ScanPhase::Analyzing);
        let image_uri = photo.source_uri.clone();

        let response = match self.analyze(photo).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "scan: analysis failed");
                self.phase.send_replace(ScanPhase::Idle {
                    error: Some(Arc::new(e)),
                });
                return Ok(self.phase());
            }
        };
        info!(
            days = response.prediction.days_since_cut,
            level = response.prediction.oxidation_level.as_str(),
            "scan: analysis complete"
        );

        let item = ScanHistoryItem::from_response(
            uuid::Uuid::new_v4().to_string(),
            image_uri,
            &response,
            Utc::now(),
        );
        let (saved, save_error) = match self.history.add(item).await {
            Ok(saved) => (saved, None),
            Err(e) => {
                warn!(error = %e, "scan: result not saved to history");
                (None, Some(Arc::new(e)))
            }
        };

        self.phase.send_replace(ScanPhase::Result {
            response,
            saved,
            save_error,
        });
        Ok(self.phase())
    }

    async fn analyze(&self, photo: ImagePayload) -> Result<AnalyzeResponse> {
        let options = self.compress;
        let payload = tokio::task::spawn_blocking(move || compress_with(photo, &options))
            .await
            .map_err(|e| AppleScanError::ImageLoad(e.to_string()))??;
        self.api.analyze(&payload, self.variety).await
    }

    fn require_auth(&self) -> Result<()> {
        if self.auth.state().is_authenticated() {
            Ok(())
        } else {
            Err(AppleScanError::Unauthenticated)
        }
    }
}
