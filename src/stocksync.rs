use std::result;

use log::{error, info, trace};
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;
use warp::http::StatusCode;

use crate::auth::{self, BearerToken, Identity, Tokens};
use crate::backend::StoreError;
use crate::inventory;
use crate::store::Store;
use crate::time::Timestamp;
use crate::user::{SharedDocument, User};

/// Every failure a request can end in. The display strings are what
/// clients see in the `error` field.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(&'static str),

    #[error("未授权")]
    Unauthorized,

    #[error("账号或密码错误")]
    BadCredentials,

    #[error("用户名已存在")]
    Conflict,

    #[error("用户不存在")]
    UserNotFound,

    #[error("接口不存在")]
    NoRoute { url: String, method: String },

    #[error("请求体过大")]
    PayloadTooLarge,

    #[error("数据库未配置")]
    Unconfigured,

    #[error("服务器错误")]
    Internal(String),
}

pub type Result<T> = result::Result<T, Error>;

pub const MISSING_CREDENTIALS: &str = "账号和密码不能为空";
pub const MISSING_DATA: &str = "数据不能为空";

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized | Error::BadCredentials => StatusCode::UNAUTHORIZED,
            Error::Conflict => StatusCode::CONFLICT,
            Error::UserNotFound | Error::NoRoute { .. } => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Unconfigured | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// JSON body of an error response.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    error: String,
    message: Option<String>,
    url: Option<String>,
    method: Option<String>,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        let mut body = ErrorBody {
            error: e.to_string(),
            message: None,
            url: None,
            method: None,
        };

        match e {
            Error::NoRoute { url, method } => {
                body.url = Some(url.clone());
                body.method = Some(method.clone());
            }
            Error::Unconfigured => {
                body.message = Some("请设置 STORE_URL 环境变量".into());
            }
            Error::Internal(message) => {
                body.message = Some(message.clone());
            }
            _ => {}
        }

        body
    }
}

/// A document plus when it was last synced.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Value,
    pub last_sync: Option<Timestamp>,
}

/// A successful register or login.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub data: Value,
}

pub struct StockSync {
    store: Store,
    tokens: Tokens,
}

pub struct StockSyncAuthed<'a> {
    sync: &'a StockSync,
    id: Uuid,
    username: String,
}

/// Pulls a required non-empty string field out of a request body.
fn credential<'b>(body: &'b serde_json::Map<String, Value>, key: &str) -> Result<&'b str> {
    match body.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(Error::Validation(MISSING_CREDENTIALS)),
    }
}

/// The `data` field of a sync body.
fn sync_payload(body: &serde_json::Map<String, Value>) -> Result<&Value> {
    match body.get("data") {
        Some(data) if inventory::is_present(Some(data)) => Ok(data),
        _ => Err(Error::Validation(MISSING_DATA)),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("blocking task failed: {e}");
        Error::Internal(e.to_string())
    })
}

impl StockSync {
    pub fn new(store: Store, tokens: Tokens) -> Self {
        Self { store, tokens }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn register(&self, body: &serde_json::Map<String, Value>) -> Result<Session> {
        let username = credential(body, "username")?.to_string();
        let password = credential(body, "password")?.to_string();
        let backend = self.store.get().await?;

        let pwhash = blocking(move || auth::hash_password(&password)).await??;
        let user = User {
            id: Uuid::new_v4(),
            username,
            pwhash,
            data: inventory::default_document(),
            created_at: Timestamp::now(),
            last_sync: None,
        };

        backend.create_user(&user).await.map_err(|e| match e {
            StoreError::Conflict => {
                info!("{} register: username taken", user.username);
                Error::Conflict
            }
            e => {
                error!("couldn't register {}: {e}", user.username);
                e.into()
            }
        })?;

        info!("{} registered", user.username);
        let token = self.tokens.issue(user.id, &user.username)?;

        Ok(Session {
            token,
            data: user.data,
        })
    }

    pub async fn login(&self, body: &serde_json::Map<String, Value>) -> Result<Session> {
        let username = credential(body, "username")?;
        let password = credential(body, "password")?.to_string();
        let backend = self.store.get().await?;

        let user = backend.find_user(username).await.map_err(|e| match e {
            StoreError::NotFound => {
                error!("rejecting nonexistent user {username}");
                Error::BadCredentials
            }
            e => {
                error!("couldn't authenticate user {username}: {e}");
                e.into()
            }
        })?;

        let pwhash = user.pwhash.clone();
        if !blocking(move || auth::verify_password(&password, &pwhash)).await? {
            error!("wrong password for user {username}");
            return Err(Error::BadCredentials);
        }

        info!("{username} login");
        let token = self.tokens.issue(user.id, &user.username)?;

        Ok(Session {
            token,
            data: user.data,
        })
    }

    /// Checks an `Authorization` header value. Missing, malformed, forged
    /// and expired credentials all come back as `Unauthorized`.
    pub fn authenticate(&self, header: Option<&str>) -> Result<StockSyncAuthed<'_>> {
        let token: BearerToken = header
            .ok_or(Error::Unauthorized)?
            .parse()
            .map_err(|e| {
                trace!("bad auth header: {e}");
                Error::Unauthorized
            })?;

        let Identity { id, username } = self.tokens.verify(&token)?;

        Ok(StockSyncAuthed {
            sync: self,
            id,
            username,
        })
    }

    /// The shared document, seeded with the default taxonomy on first use.
    pub async fn shared_data(&self) -> Result<Snapshot> {
        let backend = self.store.get().await?;
        let seed = SharedDocument {
            data: inventory::default_document(),
            last_sync: Timestamp::now(),
        };

        let doc = backend.shared_document_or_insert(seed).await?;
        trace!("shared document read");

        Ok(Snapshot {
            data: doc.data,
            last_sync: Some(doc.last_sync),
        })
    }

    /// Overwrites the shared document. Last writer wins.
    pub async fn sync_shared(&self, body: &serde_json::Map<String, Value>) -> Result<Timestamp> {
        let data = sync_payload(body)?;
        let backend = self.store.get().await?;
        let now = Timestamp::now();

        backend
            .replace_shared_document(&SharedDocument {
                data: data.clone(),
                last_sync: now,
            })
            .await?;

        info!("shared document synced at {now}");
        Ok(now)
    }
}

impl StockSyncAuthed<'_> {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn data(&self) -> Result<Snapshot> {
        let username = self.username();
        trace!("{username} getting data");

        let backend = self.sync.store.get().await?;
        let user = backend.find_user_by_id(self.id).await.map_err(|e| match e {
            StoreError::NotFound => {
                error!("{username} has a token but no account");
                Error::UserNotFound
            }
            e => e.into(),
        })?;

        Ok(Snapshot {
            data: user.data,
            last_sync: user.last_sync,
        })
    }

    /// Overwrites the account's document. Last writer wins.
    pub async fn sync(&self, body: &serde_json::Map<String, Value>) -> Result<Timestamp> {
        let username = self.username();
        let data = sync_payload(body)?;
        let backend = self.sync.store.get().await?;
        let now = Timestamp::now();

        backend
            .update_user_data(self.id, data, now)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => Error::UserNotFound,
                e => {
                    error!("{username} sync failed: {e}");
                    e.into()
                }
            })?;

        info!("{username} synced at {now}");
        Ok(now)
    }
}
