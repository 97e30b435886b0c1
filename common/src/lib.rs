//! Apple Scan Common Library
//!
//! CLIとライブラリ本体で共有される型とユーティリティ

pub mod types;
pub mod error;
pub mod parser;
pub mod stats;

pub use types::{
    AnalyzeResponse, AppleVariety, ConfidenceInterval, HealthCheckResponse, ModelInfo,
    OxidationLevel, Prediction, ScanHistoryItem, ScanRow, Severity,
};
pub use error::{Error, Result};
pub use parser::{
    decode_data_url, encode_data_url, extract_base64_from_data_url, extract_error_detail,
    extract_mime_type_from_data_url, parse_analyze_response, parse_health_response,
};
pub use stats::HistoryStats;
