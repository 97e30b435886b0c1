//! スキャン関連の型定義
//!
//! CLIとライブラリで共有される型:
//! - AnalyzeResponse: 推論APIの応答
//! - ScanHistoryItem: 履歴に保存されるスキャン結果
//! - ScanRow: リモートテーブル `user_scans` の1行

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// りんごの品種（モデル選択に使用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppleVariety {
    #[default]
    Combined,
    Gala,
    Smith,
    RedDelicious,
}

impl AppleVariety {
    pub const ALL: [AppleVariety; 4] = [
        AppleVariety::Combined,
        AppleVariety::Gala,
        AppleVariety::Smith,
        AppleVariety::RedDelicious,
    ];

    /// APIクエリに載せる名前
    pub fn as_str(&self) -> &'static str {
        match self {
            AppleVariety::Combined => "combined",
            AppleVariety::Gala => "gala",
            AppleVariety::Smith => "smith",
            AppleVariety::RedDelicious => "red_delicious",
        }
    }

    /// 統計表示用の短い名前
    pub fn display_name(&self) -> &'static str {
        match self {
            AppleVariety::Combined => "Mixed",
            AppleVariety::Gala => "Gala",
            AppleVariety::Smith => "G. Smith",
            AppleVariety::RedDelicious => "Red Del.",
        }
    }
}

impl std::str::FromStr for AppleVariety {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "combined" | "mixed" => Ok(AppleVariety::Combined),
            "gala" => Ok(AppleVariety::Gala),
            "smith" | "granny_smith" => Ok(AppleVariety::Smith),
            "red_delicious" => Ok(AppleVariety::RedDelicious),
            _ => Err(format!(
                "Unknown variety: {}. Use combined, gala, smith, or red_delicious",
                s
            )),
        }
    }
}

impl std::fmt::Display for AppleVariety {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 酸化レベル（表示の色分け専用、クライアントでは計算しない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OxidationLevel {
    None,
    Minimal,
    Light,
    Medium,
    MediumHeavy,
    Heavy,
}

/// 表示用の重症度バケット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fresh,    // green
    Slight,   // yellow
    Moderate, // orange
    Severe,   // red
}

impl OxidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OxidationLevel::None => "none",
            OxidationLevel::Minimal => "minimal",
            OxidationLevel::Light => "light",
            OxidationLevel::Medium => "medium",
            OxidationLevel::MediumHeavy => "medium-heavy",
            OxidationLevel::Heavy => "heavy",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            OxidationLevel::None | OxidationLevel::Minimal => Severity::Fresh,
            OxidationLevel::Light => Severity::Slight,
            OxidationLevel::Medium => Severity::Moderate,
            OxidationLevel::MediumHeavy | OxidationLevel::Heavy => Severity::Severe,
        }
    }
}

impl std::fmt::Display for OxidationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 信頼区間（日数）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// 推論結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub days_since_cut: f64,
    pub confidence_interval: ConfidenceInterval,
    pub interpretation: String,
    pub oxidation_level: OxidationLevel,
}

/// 使用モデルのメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub variety_used: AppleVariety,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_mae: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_samples: Option<u64>,
}

/// `POST /analyze` の応答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub prediction: Prediction,
    pub model_info: ModelInfo,
}

/// `GET /health` の応答
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckResponse {
    pub status: String,
    pub models_loaded: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// スキャン履歴アイテム
///
/// 解析成功時に作成され、削除以外では変更されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanHistoryItem {
    pub id: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
    pub variety: AppleVariety,
    pub days_since_cut: f64,
    pub oxidation_level: OxidationLevel,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub interpretation: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanHistoryItem {
    /// 解析応答から履歴アイテムを作成
    ///
    /// 品種はリクエストした値ではなくモデルが実際に使用した値を記録する
    pub fn from_response(
        id: impl Into<String>,
        image_uri: impl Into<String>,
        response: &AnalyzeResponse,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let prediction = &response.prediction;
        Self {
            id: id.into(),
            image_uri: image_uri.into(),
            variety: response.model_info.variety_used,
            days_since_cut: prediction.days_since_cut,
            oxidation_level: prediction.oxidation_level,
            confidence_lower: prediction.confidence_interval.lower,
            confidence_upper: prediction.confidence_interval.upper,
            interpretation: prediction.interpretation.clone(),
            timestamp,
        }
    }
}

/// リモートテーブル `user_scans` の行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    /// 挿入時はNone（リモート側で採番）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub image_uri: String,
    pub variety: AppleVariety,
    pub days_since_cut: f64,
    pub oxidation_level: OxidationLevel,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub interpretation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ScanRow {
    /// 履歴アイテムから挿入用の行を作成（クライアント採番のIDは送らない）
    pub fn for_insert(user_id: impl Into<String>, item: &ScanHistoryItem) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            image_uri: item.image_uri.clone(),
            variety: item.variety,
            days_since_cut: item.days_since_cut,
            oxidation_level: item.oxidation_level,
            confidence_lower: item.confidence_lower,
            confidence_upper: item.confidence_upper,
            interpretation: item.interpretation.clone(),
            created_at: Some(item.timestamp),
        }
    }

    /// 行を履歴アイテムに変換
    ///
    /// 作成日時が欠けている行は現在時刻で補う
    pub fn into_item(self) -> ScanHistoryItem {
        ScanHistoryItem {
            id: self.id.unwrap_or_default(),
            image_uri: self.image_uri,
            variety: self.variety,
            days_since_cut: self.days_since_cut,
            oxidation_level: self.oxidation_level,
            confidence_lower: self.confidence_lower,
            confidence_upper: self.confidence_upper,
            interpretation: self.interpretation,
            timestamp: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}
