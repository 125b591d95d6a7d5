use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::client::parse_base_url;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base_url(base_url)?,
        })
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let url = self.base_url.join("auth/register")?;
        let response = self
            .http
            .post(url)
            .json(&Credentials { username, password })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Api { status, body })
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let url = self.base_url.join("auth/login")?;
        let response = self
            .http
            .post(url)
            .json(&Credentials { username, password })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<LoginResponse>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Api { status, body })
        }
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserInfo,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
}
