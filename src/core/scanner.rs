use crate::config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Recursively list photo files under `dir`.
///
/// Entries are visited depth-first with siblings sorted by file name, so the
/// result (and therefore which of two duplicates is kept) is the same on every
/// platform. Unreadable entries below the root are logged and skipped.
pub fn scan_directory(dir: &Path, config: &Config) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::InvalidPath {
            path: dir.to_string_lossy().to_string(),
        });
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_file() && config.is_photo(path) {
            images.push(path.to_path_buf());
        }
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("b_dir")).unwrap();
        fs::create_dir_all(root.join("a_dir")).unwrap();
        for name in ["b_dir/2.jpg", "b_dir/1.PNG", "a_dir/z.jpeg", "top.bmp", "notes.txt"] {
            fs::write(root.join(name), b"x").unwrap();
        }

        let found = scan_directory(root, &Config::default()).unwrap();
        let relative: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(relative, vec!["a_dir/z.jpeg", "b_dir/1.PNG", "b_dir/2.jpg", "top.bmp"]);
    }

    #[test]
    fn test_scan_missing_root_is_fatal() {
        let result = scan_directory(Path::new("/non/existent/dir"), &Config::default());
        assert!(matches!(result, Err(ScanError::InvalidPath { .. })));
    }
}
