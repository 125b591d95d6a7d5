use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote file name is empty")]
    Empty,
    #[error("remote file name `{0}` is not a plain file name")]
    UnsupportedComponent(String),
}

/// Maps a remote file name to its location directly inside `folder`.
pub fn local_path_for(folder: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }

    // Sync is flat: exactly one normal component, no separators or `..`.
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(folder.join(part)),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}
