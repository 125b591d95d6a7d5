use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use filebox_core::{FileKind, FileboxClient, FileboxError, ListQuery, RemoteFile, SortBy, SortOrder};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Remote descriptors keyed by file name.
pub type RemoteListing = BTreeMap<String, RemoteFile>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("api error: {0}")]
    Api(#[from] FileboxError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// The server refused the bearer token; retrying with it is pointless.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransferError::Api(err) if err.is_auth_failure())
    }
}

#[derive(Clone)]
pub struct RemoteDirectory {
    client: FileboxClient,
}

impl RemoteDirectory {
    pub fn new(client: FileboxClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FileboxClient {
        &self.client
    }

    /// The server keeps one row per upload, so a name can repeat. Oldest
    /// first means the newest descriptor for a name wins.
    pub async fn list_remote(&self) -> Result<RemoteListing, TransferError> {
        let files = self
            .client
            .list_files(&ListQuery {
                kind: FileKind::All,
                sort_by: SortBy::UpdatedAt,
                order: SortOrder::Asc,
            })
            .await?;
        Ok(files
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect())
    }

    pub async fn upload_one(&self, source: &Path) -> Result<(), TransferError> {
        if let Some(created) = self.client.upload_path(source).await? {
            tracing::debug!(id = created.id, name = %created.name, "uploaded");
        }
        Ok(())
    }

    /// Streams the remote bytes next to `target` and renames over it.
    pub async fn download_one(
        &self,
        descriptor: &RemoteFile,
        target: &Path,
    ) -> Result<(), TransferError> {
        let response = self.client.download_file(descriptor.id).await?;
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();

        let written = async {
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, TransferError>(())
        }
        .await;
        if let Err(err) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        drop(file);

        if let Err(err) = tokio::fs::rename(&partial, target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
