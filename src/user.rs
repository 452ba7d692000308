use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::time::Timestamp;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub pwhash: String,
    pub data: Value,
    pub created_at: Timestamp,
    pub last_sync: Option<Timestamp>,
}

/// The single shared record used in public-data mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDocument {
    pub data: Value,
    pub last_sync: Timestamp,
}

/// Key the shared document is stored under.
pub const SHARED_DOCUMENT_ID: &str = "public";
