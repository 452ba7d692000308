use std::str::FromStr;

use log::error;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{query, Row};
use uuid::Uuid;

use super::{Result, StoreError};
use crate::time::Timestamp;
use crate::user::{SharedDocument, User, SHARED_DOCUMENT_ID};

pub struct SqlBackend(pub SqlitePool);

impl SqlBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            error!("migrating {url}: {e:?}");
            e
        })?;

        Ok(Self(pool))
    }
}

fn parse_time(s: &str) -> Result<Timestamp> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("timestamp \"{s}\": {e}")))
}

fn user_from_row(row: SqliteRow) -> Result<User> {
    let id: String = row.try_get("id")?;
    let data: String = row.try_get("data")?;
    let created_at: String = row.try_get("created_at")?;
    let last_sync: Option<String> = row.try_get("last_sync")?;

    Ok(User {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("id \"{id}\": {e}")))?,
        username: row.try_get("username")?,
        pwhash: row.try_get("pwhash")?,
        data: serde_json::from_str(&data)?,
        created_at: parse_time(&created_at)?,
        last_sync: last_sync.as_deref().map(parse_time).transpose()?,
    })
}

fn shared_from_row(row: SqliteRow) -> Result<SharedDocument> {
    let data: String = row.try_get("data")?;
    let last_sync: String = row.try_get("last_sync")?;

    Ok(SharedDocument {
        data: serde_json::from_str(&data)?,
        last_sync: parse_time(&last_sync)?,
    })
}

fn not_found(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        e => e.into(),
    }
}

impl SqlBackend {
    pub async fn find_user(&self, username: &str) -> Result<User> {
        let row = query(
            "
            SELECT *
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(not_found)?;

        user_from_row(row)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User> {
        let row = query(
            "
            SELECT *
            FROM users
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_one(&self.0)
        .await
        .map_err(not_found)?;

        user_from_row(row)
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_string(&user.data)?;

        query(
            "
            INSERT INTO users
            (id, username, pwhash, data, created_at, last_sync)
            VALUES
            (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.pwhash)
        .bind(data)
        .bind(user.created_at.to_string())
        .bind(user.last_sync.map(|t| t.to_string()))
        .execute(&self.0)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Conflict,
            e => {
                error!("couldn't create user {}: {e:?}", user.username);
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn update_user_data(&self, id: Uuid, data: &Value, now: Timestamp) -> Result<()> {
        let data = serde_json::to_string(data)?;

        let result = query(
            "
            UPDATE users
            SET data = ?, last_sync = ?
            WHERE id = ?
            ",
        )
        .bind(data)
        .bind(now.to_string())
        .bind(id.to_string())
        .execute(&self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn shared_document_or_insert(&self, seed: SharedDocument) -> Result<SharedDocument> {
        let data = serde_json::to_string(&seed.data)?;
        let mut tx = self.0.begin().await?;

        query(
            "
            INSERT INTO shared_documents
            (id, data, last_sync)
            VALUES
            (?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(SHARED_DOCUMENT_ID)
        .bind(data)
        .bind(seed.last_sync.to_string())
        .execute(&mut *tx)
        .await?;

        let row = query(
            "
            SELECT data, last_sync
            FROM shared_documents
            WHERE id = ?
            ",
        )
        .bind(SHARED_DOCUMENT_ID)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        shared_from_row(row)
    }

    pub async fn replace_shared_document(&self, doc: &SharedDocument) -> Result<()> {
        let data = serde_json::to_string(&doc.data)?;

        query(
            "
            INSERT INTO shared_documents
            (id, data, last_sync)
            VALUES
            (?, ?, ?)
            ON CONFLICT (id) DO UPDATE
            SET data = excluded.data, last_sync = excluded.last_sync
            ",
        )
        .bind(SHARED_DOCUMENT_ID)
        .bind(data)
        .bind(doc.last_sync.to_string())
        .execute(&self.0)
        .await?;

        Ok(())
    }
}
