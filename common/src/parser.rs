//! APIレスポンスパーサー
//!
//! 推論APIの応答・エラー本文のパースと、Data URLの変換を行う

use crate::error::{Error, Result};
use crate::types::{AnalyzeResponse, HealthCheckResponse};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Data URLからBase64データ部分を抽出
///
/// # Arguments
/// * `data_url` - "data:image/jpeg;base64,/9j/4AAQ..." 形式のData URL
///
/// # Returns
/// Base64エンコードされたデータ部分、または抽出失敗時はNone
pub fn extract_base64_from_data_url(data_url: &str) -> Option<&str> {
    if !data_url.starts_with("data:") {
        return None;
    }
    data_url.split_once(',').map(|(_, data)| data)
}

/// Data URLからMIMEタイプを抽出
///
/// 抽出失敗時は"image/jpeg"をデフォルトとして返す
pub fn extract_mime_type_from_data_url(data_url: &str) -> &str {
    data_url
        .strip_prefix("data:")
        .and_then(|s| s.split([';', ',']).next())
        .filter(|s| !s.is_empty())
        .unwrap_or("image/jpeg")
}

/// Data URLをデコードして (MIMEタイプ, バイト列) を返す
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let data = extract_base64_from_data_url(data_url)
        .ok_or_else(|| Error::Parse("data URLではありません".into()))?;
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Parse(format!("Base64デコード失敗: {}", e)))?;
    Ok((extract_mime_type_from_data_url(data_url).to_string(), bytes))
}

/// バイト列をData URLにエンコード
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// `POST /analyze` の応答本文をパース
pub fn parse_analyze_response(body: &str) -> Result<AnalyzeResponse> {
    let response: AnalyzeResponse = serde_json::from_str(body)?;
    if !response.success {
        return Err(Error::Parse("success=false の応答".into()));
    }
    Ok(response)
}

/// `GET /health` の応答本文をパース
pub fn parse_health_response(body: &str) -> Result<HealthCheckResponse> {
    Ok(serde_json::from_str(body)?)
}

/// エラー応答本文からサーバーのメッセージを取り出す
///
/// 対応する形式:
/// 1. `{"detail": "..."}`（FastAPI）
/// 2. `{"detail": [{"msg": "..."}]}`（FastAPIのバリデーションエラー）
/// 3. `{"message": "..."}` / `{"msg": "..."}` / `{"error_description": "..."}`
///
/// 見つからない場合はNone
pub fn extract_error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    ["error_description", "message", "msg", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
