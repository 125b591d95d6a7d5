use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum FileboxError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("path has no usable file name: {0}")]
    InvalidFileName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct FileboxClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl FileboxClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, FileboxError> {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, FileboxError> {
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            token: token.into(),
        })
    }

    pub async fn list_files(&self, query: &ListQuery) -> Result<Vec<RemoteFile>, FileboxError> {
        let mut url = self.endpoint("files")?;
        url.query_pairs_mut()
            .append_pair("type", query.kind.as_str())
            .append_pair("sort_by", query.sort_by.as_str())
            .append_pair("order", query.order.as_str());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Sends `body` as the multipart field `file` under `file_name`. Any 2xx
    /// is success; the created descriptor is returned when the body has one.
    pub async fn upload_file(
        &self,
        file_name: &str,
        body: Body,
        length: Option<u64>,
    ) -> Result<Option<RemoteFile>, FileboxError> {
        let url = self.endpoint("files")?;
        let part = match length {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        }
        .file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<RemoteFile>().await.ok())
    }

    pub async fn upload_path(&self, source: &Path) -> Result<Option<RemoteFile>, FileboxError> {
        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| FileboxError::InvalidFileName(source.display().to_string()))?
            .to_string();
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = Body::wrap_stream(ReaderStream::new(file));
        self.upload_file(&file_name, body, Some(length)).await
    }

    /// Returns the status-checked response so the caller can stream the body.
    pub async fn download_file(&self, id: i64) -> Result<reqwest::Response, FileboxError> {
        let url = self.endpoint(&format!("files/{id}/download"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn delete_file(&self, id: i64) -> Result<(), FileboxError> {
        let url = self.endpoint(&format!("files/{id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    pub async fn preview_file(&self, id: i64) -> Result<Preview, FileboxError> {
        let url = self.endpoint(&format!("files/{id}/preview"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if content_type.starts_with("application/json") {
            let text: TextPreview = response.json().await?;
            return Ok(Preview::Text {
                name: text.name,
                content: text.content,
            });
        }
        let bytes = response.bytes().await?;
        Ok(Preview::Image {
            content_type,
            bytes: bytes.to_vec(),
        })
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// `path` is relative so a prefix on the base url is kept.
    fn endpoint(&self, path: &str) -> Result<Url, FileboxError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FileboxError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FileboxError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, FileboxError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl FileboxError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            FileboxError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }
}

/// Parses `base_url` with a trailing slash so relative joins append to its path.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, url::ParseError> {
    let trimmed = base_url.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/"))
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    // flask-jwt answers malformed tokens with 422
    if matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY
    ) {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub editor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileKind {
    #[default]
    All,
    Py,
    Jpg,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::All => "all",
            FileKind::Py => "py",
            FileKind::Jpg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    Uploader,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::UpdatedAt => "updated_at",
            SortBy::Uploader => "uploader",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub kind: FileKind,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Text { name: String, content: String },
    Image { content_type: String, bytes: Vec<u8> },
}

#[derive(Debug, Deserialize)]
struct TextPreview {
    name: String,
    content: String,
}
