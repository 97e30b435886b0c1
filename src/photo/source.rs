//! 写真の取得元
//!
//! カメラ/ギャラリーに相当する取得処理を `PhotoSource` として抽象化する。

use super::scanner::{scan_folder, GalleryEntry};
use super::ImagePayload;
use crate::error::{AppleScanError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 写真の取得
///
/// 失敗は `PermissionDenied` または `UserCancelled`（およびファイル系エラー）
#[async_trait]
pub trait PhotoSource: Send + Sync {
    async fn capture(&self) -> Result<ImagePayload>;
}

/// 指定パスの画像ファイル
#[derive(Debug, Clone)]
pub struct FilePhotoSource {
    path: PathBuf,
}

impl FilePhotoSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PhotoSource for FilePhotoSource {
    async fn capture(&self) -> Result<ImagePayload> {
        read_photo(&self.path).await
    }
}

/// ギャラリーの選択方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// 対話的に選ぶ（Escでキャンセル）
    Interactive,
    /// ファイル名順のインデックスで選ぶ
    Index(usize),
}

/// フォルダをギャラリーとして扱い、1枚選ぶ
#[derive(Debug, Clone)]
pub struct GalleryPhotoSource {
    folder: PathBuf,
    selection: Selection,
}

impl GalleryPhotoSource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            selection: Selection::Interactive,
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

#[async_trait]
impl PhotoSource for GalleryPhotoSource {
    async fn capture(&self) -> Result<ImagePayload> {
        let folder = self.folder.clone();
        let images = tokio::task::spawn_blocking(move || scan_folder(&folder))
            .await
            .map_err(|e| AppleScanError::Io(std::io::Error::other(e)))??;

        if images.is_empty() {
            return Err(AppleScanError::NoImagesFound(self.folder.display().to_string()));
        }

        let chosen = match self.selection {
            Selection::Index(index) => images
                .get(index)
                .cloned()
                .ok_or_else(|| AppleScanError::Validation(format!(
                    "インデックス {} は範囲外です（{}枚）", index, images.len()
                )))?,
            Selection::Interactive => tokio::task::spawn_blocking(move || pick_interactive(images))
                .await
                .map_err(|e| AppleScanError::Io(std::io::Error::other(e)))??,
        };

        debug!(file = %chosen.file_name, "gallery photo selected");
        read_photo(&chosen.path).await
    }
}

fn pick_interactive(images: Vec<GalleryEntry>) -> Result<GalleryEntry> {
    let labels: Vec<String> = images
        .iter()
        .map(|img| format!("{} ({} KB)", img.file_name, img.size_bytes / 1024))
        .collect();

    let index = dialoguer::Select::new()
        .with_prompt("写真を選択（Escでキャンセル）")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(|e| AppleScanError::Io(std::io::Error::other(e)))?
        .ok_or(AppleScanError::UserCancelled)?;

    images
        .into_iter()
        .nth(index)
        .ok_or(AppleScanError::UserCancelled)
}

async fn read_photo(path: &Path) -> Result<ImagePayload> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| map_io_error(e, path))?;
    if bytes.is_empty() {
        return Err(AppleScanError::ImageLoad(format!("空のファイルです: {}", path.display())));
    }
    Ok(ImagePayload::new(bytes, file_uri(path)))
}

fn map_io_error(err: std::io::Error, path: &Path) -> AppleScanError {
    match err.kind() {
        std::io::ErrorKind::NotFound => AppleScanError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => {
            AppleScanError::PermissionDenied(path.display().to_string())
        }
        _ => AppleScanError::Io(err),
    }
}

fn file_uri(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display().to_string().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_source_not_found() {
        let source = FilePhotoSource::new("/nonexistent/apple.jpg");
        let result = source.capture().await;
        assert!(matches!(result, Err(AppleScanError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_file_source_reads_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("apple.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap();

        let payload = FilePhotoSource::new(&path).capture().await.unwrap();
        assert_eq!(payload.len(), 5);
        assert_eq!(payload.mime_type, "image/jpeg");
        assert!(payload.source_uri.starts_with("file://"));
        assert!(payload.source_uri.ends_with("apple.jpg"));
    }

    #[tokio::test]
    async fn test_file_source_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();

        let result = FilePhotoSource::new(&path).capture().await;
        assert!(matches!(result, Err(AppleScanError::ImageLoad(_))));
    }

    #[tokio::test]
    async fn test_gallery_empty_folder() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let result = GalleryPhotoSource::new(dir.path()).capture().await;
        assert!(matches!(result, Err(AppleScanError::NoImagesFound(_))));
    }

    #[tokio::test]
    async fn test_gallery_index_selection() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), [0xFF, 0xD8, 0xFF, 1]).unwrap();
        std::fs::write(dir.path().join("b.jpg"), [0xFF, 0xD8, 0xFF, 2, 2]).unwrap();

        let source = GalleryPhotoSource::new(dir.path()).with_selection(Selection::Index(1));
        let payload = source.capture().await.unwrap();
        assert_eq!(payload.len(), 5);

        let out_of_range = GalleryPhotoSource::new(dir.path()).with_selection(Selection::Index(5));
        assert!(matches!(out_of_range.capture().await, Err(AppleScanError::Validation(_))));
    }
}
