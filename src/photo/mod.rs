//! 画像パイプライン
//!
//! 撮影/選択した写真をバイナリペイロードに正規化し、
//! アップロード前に大きすぎる画像を縮小する。

mod scanner;
mod source;

pub use scanner::{scan_folder, GalleryEntry};
pub use source::{FilePhotoSource, GalleryPhotoSource, PhotoSource, Selection};

use crate::error::{AppleScanError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, GenericImageView, RgbImage};
use tracing::debug;

pub const DEFAULT_MAX_SIZE_KB: u64 = 500;
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

const MIN_JPEG_QUALITY: u8 = 40;
const QUALITY_STEP: u8 = 15;

/// アップロード用の画像ペイロード
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// 取得元（ファイルURIまたはData URL）、履歴の imageUri に使う
    pub source_uri: String,
}

impl ImagePayload {
    /// バイト列から作成（MIMEタイプは内容から推定）
    pub fn new(bytes: Vec<u8>, source_uri: impl Into<String>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Self {
            bytes,
            mime_type,
            source_uri: source_uri.into(),
        }
    }

    pub fn from_data_url(data_url: &str) -> Result<Self> {
        let (mime_type, bytes) = apple_scan_common::decode_data_url(data_url)?;
        Ok(Self {
            bytes,
            mime_type,
            source_uri: data_url.to_string(),
        })
    }

    pub fn to_data_url(&self) -> String {
        apple_scan_common::encode_data_url(&self.mime_type, &self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 画像の縦横サイズ（ヘッダのみ読む）
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        image::ImageReader::new(std::io::Cursor::new(&self.bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| AppleScanError::ImageLoad(e.to_string()))
    }
}

/// 圧縮パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_size_kb: u64,
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_size_kb: DEFAULT_MAX_SIZE_KB,
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// 必要なら画像を圧縮（既定の最大寸法・品質を使用）
pub fn compress(payload: ImagePayload, max_size_kb: u64) -> Result<ImagePayload> {
    compress_with(
        payload,
        &CompressOptions {
            max_size_kb,
            ..Default::default()
        },
    )
}

/// 必要なら画像を圧縮
///
/// - サイズが閾値以下: そのまま返す（バイト単位で同一）
/// - 閾値超過: 長辺が `max_dimension` 以下になるよう縮小し、JPEGで再エンコード
///
/// 出力は元より大きくならない。品質を下げても収まらない場合、
/// 縮小不要な画像は元のまま返し、縮小した画像はさらに半分ずつ小さくする
pub fn compress_with(payload: ImagePayload, options: &CompressOptions) -> Result<ImagePayload> {
    let threshold = options.max_size_kb.saturating_mul(1024);
    if payload.len() as u64 <= threshold {
        debug!(size = payload.len(), threshold, "compression skipped");
        return Ok(payload);
    }

    let decoded = image::load_from_memory(&payload.bytes)
        .map_err(|e| AppleScanError::ImageLoad(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    let (target_w, target_h) = fit_within(width, height, options.max_dimension);
    let resized = (target_w, target_h) != (width, height);

    let mut rgb: RgbImage = if resized {
        decoded
            .resize_exact(target_w, target_h, FilterType::Triangle)
            .to_rgb8()
    } else {
        decoded.to_rgb8()
    };
    drop(decoded);

    let mut quality = options.quality.clamp(1, 100);
    let bytes = loop {
        let encoded = encode_jpeg(&rgb, quality)?;
        if encoded.len() <= payload.len() {
            break encoded;
        }
        if quality > MIN_JPEG_QUALITY {
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_JPEG_QUALITY);
            continue;
        }
        if !resized {
            debug!(size = payload.len(), "re-encoding would grow the image, keeping original");
            return Ok(payload);
        }
        let (w, h) = rgb.dimensions();
        if w <= 1 && h <= 1 {
            return Err(AppleScanError::ImageLoad(
                "元のサイズ以下に圧縮できません".to_string(),
            ));
        }
        rgb = image::imageops::resize(&rgb, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
    };

    debug!(
        from = payload.len(),
        to = bytes.len(),
        width = rgb.width(),
        height = rgb.height(),
        quality,
        "image compressed"
    );

    Ok(ImagePayload {
        bytes,
        mime_type: "image/jpeg".to_string(),
        source_uri: payload.source_uri,
    })
}

/// アスペクト比を保って長辺を `max_dimension` 以下に収める
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale = |short: u32, long: u32| -> u32 {
        ((short as u64 * max_dimension as u64 + long as u64 / 2) / long as u64).max(1) as u32
    };

    if width >= height {
        (max_dimension, scale(height, width))
    } else {
        (scale(width, height), max_dimension)
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| AppleScanError::ImageLoad(format!("JPEGエンコード失敗: {}", e)))?;
    Ok(buf)
}
