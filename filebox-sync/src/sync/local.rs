use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extensions that take part in sync; everything else is invisible.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".py", ".jpg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    /// Lowercase, dot included.
    pub extension: String,
    pub modified: Option<SystemTime>,
}

pub fn normalized_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

pub fn is_allowed(path: &Path) -> bool {
    normalized_extension(path)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lists eligible regular files directly inside `folder`, sorted by name.
pub async fn scan_eligible(folder: &Path) -> io::Result<Vec<LocalFile>> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_allowed(&path) {
            continue;
        }
        // Follows symlinks; a dangling entry is simply not a file.
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            tracing::debug!(path = %path.display(), "skipping non-utf8 file name");
            continue;
        };
        let Some(extension) = normalized_extension(&path) else {
            continue;
        };
        files.push(LocalFile {
            name,
            path,
            extension,
            modified: meta.modified().ok(),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
