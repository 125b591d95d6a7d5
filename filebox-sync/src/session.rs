use std::sync::Arc;

use filebox_core::{AuthClient, AuthError, FileboxClient, FileboxError};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::sync::engine::{SyncEngine, SyncMode};
use crate::sync::report::SyncResult;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a sync pass is already running")]
    Busy,
    #[error("no credentials: set FILEBOX_TOKEN or FILEBOX_USERNAME and FILEBOX_PASSWORD")]
    MissingCredentials,
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),
    #[error("client error: {0}")]
    Client(#[from] FileboxError),
}

/// Authenticated context for one user, passed explicitly to whatever needs
/// to talk to the API.
#[derive(Debug, Clone)]
pub struct Session {
    pub api_url: String,
    pub token: String,
}

impl Session {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    pub async fn resolve(config: &SyncConfig) -> Result<Self, SessionError> {
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Self::new(&config.api_url, token));
        }
        match (config.username.as_deref(), config.password.as_deref()) {
            (Some(username), Some(password)) => {
                Self::login(&config.api_url, username, password).await
            }
            _ => Err(SessionError::MissingCredentials),
        }
    }

    pub async fn login(api_url: &str, username: &str, password: &str) -> Result<Self, SessionError> {
        let auth = AuthClient::new(api_url)?;
        let response = auth.login(username, password).await?;
        tracing::info!(user = %response.user.username, "logged in");
        Ok(Self::new(api_url, response.access_token))
    }

    pub fn client(&self) -> Result<FileboxClient, SessionError> {
        Ok(FileboxClient::new(&self.api_url, self.token.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started(SyncMode),
    Finished { mode: SyncMode, result: SyncResult },
    Rejected(SyncMode),
}

/// One engine per session, with at most one pass in flight. The mutex doubles
/// as the busy flag: a pass that cannot take it is rejected, not queued.
#[derive(Clone)]
pub struct SyncSession {
    engine: Arc<Mutex<SyncEngine>>,
}

impl SyncSession {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    pub async fn try_sync(&self, mode: SyncMode) -> Result<SyncResult, SessionError> {
        let mut engine = self.engine.try_lock().map_err(|_| SessionError::Busy)?;
        Ok(engine.sync_once(mode).await)
    }

    /// Runs a pass on a background task and reports through `events`.
    /// Returns `None` when a pass is already running.
    pub fn spawn_sync(
        &self,
        mode: SyncMode,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Option<JoinHandle<()>> {
        let Ok(mut engine) = Arc::clone(&self.engine).try_lock_owned() else {
            let _ = events.send(SyncEvent::Rejected(mode));
            return None;
        };
        Some(tokio::spawn(async move {
            let _ = events.send(SyncEvent::Started(mode));
            let result = engine.sync_once(mode).await;
            drop(engine);
            let _ = events.send(SyncEvent::Finished { mode, result });
        }))
    }
}
