use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppleScanError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("カメラ/写真ライブラリへのアクセスが拒否されました: {0}")]
    PermissionDenied(String),

    #[error("写真の選択がキャンセルされました")]
    UserCancelled,

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("画像が見つかりません: {0}")]
    NoImagesFound(String),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("認証エラー: {0}")]
    Auth(String),

    #[error("サインインしていません。`apple-scan auth signin` でサインインしてください")]
    Unauthenticated,

    #[error("入力エラー: {0}")]
    Validation(String),

    #[error("ネットワークエラー: {0}")]
    Network(String),

    #[error("リクエストがタイムアウトしました")]
    Timeout,

    #[error("リクエストエラー ({status}): {message}")]
    HttpClient { status: u16, message: String },

    #[error("サーバーエラー ({status}): {message}")]
    HttpServer { status: u16, message: String },

    #[error("履歴の保存/読み込みエラー: {0}")]
    Persistence(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl AppleScanError {
    /// HTTPステータスとサーバーメッセージからエラーを作る
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 {
            AppleScanError::HttpServer { status, message }
        } else {
            AppleScanError::HttpClient { status, message }
        }
    }

    /// reqwestの送信エラーを分類
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            AppleScanError::Timeout
        } else {
            AppleScanError::Network(err.to_string())
        }
    }

    /// ユーザー操作で再試行できるエラーか
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppleScanError::Network(_)
                | AppleScanError::Timeout
                | AppleScanError::HttpServer { .. }
                | AppleScanError::Persistence(_)
        )
    }
}

impl From<apple_scan_common::Error> for AppleScanError {
    fn from(err: apple_scan_common::Error) -> Self {
        match err {
            apple_scan_common::Error::Io(e) => AppleScanError::Io(e),
            apple_scan_common::Error::Json(e) => AppleScanError::JsonParse(e),
            apple_scan_common::Error::Parse(msg) => AppleScanError::ImageLoad(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppleScanError>;
