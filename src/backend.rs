use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::time::Timestamp;
use crate::user::{SharedDocument, User};

mod backend_file;
mod backend_memory;
#[cfg(feature = "backend-sql")]
mod backend_sql;

pub use backend_file::FileBackend;
pub use backend_memory::MemoryBackend;
#[cfg(feature = "backend-sql")]
pub use backend_sql::SqlBackend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    Conflict,

    #[error("store connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("unsupported store: {0}")]
    Unsupported(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "backend-sql")]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[cfg(feature = "backend-sql")]
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Where documents live, parsed from the `STORE_URL` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    /// Process memory; lost on restart.
    Memory,
    /// One JSON file per record below a directory.
    File(PathBuf),
    /// An SQLite database, kept as the full `sqlite://` url.
    Sqlite(String),
}

impl FromStr for StoreUrl {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();

        if matches!(s, "memory" | "memory:" | "memory://") {
            return Ok(Self::Memory);
        }

        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| format!("no scheme in store url \"{s}\""))?;

        if rest.is_empty() {
            return Err(format!("empty location in store url \"{s}\""));
        }

        match scheme {
            "file" => Ok(Self::File(rest.into())),
            "sqlite" => Ok(Self::Sqlite(s.into())),
            _ => Err(format!("unknown store scheme \"{scheme}\"")),
        }
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(fmt, "memory:"),
            Self::File(path) => write!(fmt, "file://{}", path.display()),
            Self::Sqlite(url) => write!(fmt, "{url}"),
        }
    }
}

pub enum Backend {
    Memory(MemoryBackend),
    File(FileBackend),
    #[cfg(feature = "backend-sql")]
    Sql(SqlBackend),
}

macro_rules! dispatch {
    ($self: expr, $backend: ident => $call: expr) => {
        match $self {
            Backend::Memory($backend) => $call,
            Backend::File($backend) => $call,
            #[cfg(feature = "backend-sql")]
            Backend::Sql($backend) => $call,
        }
    };
}

impl Backend {
    pub async fn connect(url: &StoreUrl) -> Result<Self> {
        let backend = match url {
            StoreUrl::Memory => Self::Memory(MemoryBackend::default()),
            StoreUrl::File(root) => Self::File(FileBackend::open(root).await?),
            #[cfg(feature = "backend-sql")]
            StoreUrl::Sqlite(url) => Self::Sql(SqlBackend::connect(url).await?),
            #[cfg(not(feature = "backend-sql"))]
            StoreUrl::Sqlite(_) => {
                return Err(StoreError::Unsupported(
                    "sqlite requires the backend-sql feature".into(),
                ))
            }
        };

        info!("connected to store {url}");
        Ok(backend)
    }
}

impl Backend {
    pub async fn find_user(&self, username: &str) -> Result<User> {
        dispatch!(self, b => b.find_user(username).await)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User> {
        dispatch!(self, b => b.find_user_by_id(id).await)
    }

    /// Fails with [`StoreError::Conflict`] if the username is taken,
    /// leaving the existing account untouched.
    pub async fn create_user(&self, user: &User) -> Result<()> {
        dispatch!(self, b => b.create_user(user).await)
    }

    /// Replaces the account's whole `data` document.
    pub async fn update_user_data(&self, id: Uuid, data: &Value, now: Timestamp) -> Result<()> {
        dispatch!(self, b => b.update_user_data(id, data, now).await)
    }

    /// Returns the shared document, storing `seed` first if there is none.
    pub async fn shared_document_or_insert(&self, seed: SharedDocument) -> Result<SharedDocument> {
        dispatch!(self, b => b.shared_document_or_insert(seed).await)
    }

    pub async fn replace_shared_document(&self, doc: &SharedDocument) -> Result<()> {
        dispatch!(self, b => b.replace_shared_document(doc).await)
    }
}
