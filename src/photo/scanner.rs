//! ギャラリー用のフォルダ走査

use crate::error::{AppleScanError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// ギャラリーに並べる写真1枚
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// フォルダ直下の jpg/jpeg/png をファイル名順に列挙（拡張子の大小文字は問わない）
pub fn scan_folder(folder: &Path) -> Result<Vec<GalleryEntry>> {
    if !folder.is_dir() {
        return Err(AppleScanError::FileNotFound(folder.display().to_string()));
    }

    let entries = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_photo(e.path()))
        .map(|e| GalleryEntry {
            size_bytes: e.metadata().map(|m| m.len()).unwrap_or(0),
            file_name: e.file_name().to_string_lossy().into_owned(),
            path: e.into_path(),
        })
        .collect();

    Ok(entries)
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PHOTO_EXTENSIONS.iter().any(|p| ext.eq_ignore_ascii_case(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_photo_ignores_case() {
        assert!(is_photo(Path::new("apple.jpg")));
        assert!(is_photo(Path::new("APPLE.JPEG")));
        assert!(is_photo(Path::new("cut.Jpg")));
        assert!(is_photo(Path::new("cut.pNg")));
        assert!(!is_photo(Path::new("notes.txt")));
        assert!(!is_photo(Path::new("apple.gif")));
        assert!(!is_photo(Path::new("noext")));
        assert!(!is_photo(Path::new(".jpg")));
    }

    #[test]
    fn test_scan_folder_not_found() {
        let result = scan_folder(Path::new("/nonexistent/folder"));
        assert!(matches!(result, Err(AppleScanError::FileNotFound(_))));
    }

    #[test]
    fn test_scan_folder_sorted_by_name() {
        let dir = tempdir().expect("Failed to create temp dir");

        std::fs::write(dir.path().join("c.jpg"), b"dummy").unwrap();
        std::fs::write(dir.path().join("a.PNG"), b"dummy!").unwrap();
        std::fs::write(dir.path().join("b.Jpeg"), b"").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();
        std::fs::write(dir.path().join("nested.jpg").join("inner.jpg"), b"").unwrap();

        let result = scan_folder(dir.path()).unwrap();
        let names: Vec<_> = result.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.PNG", "b.Jpeg", "c.jpg"]);
        assert_eq!(result[0].size_bytes, 6);
        assert_eq!(result[0].path, dir.path().join("a.PNG"));
    }
}
