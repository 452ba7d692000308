use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use super::{Result, StoreError};
use crate::time::Timestamp;
use crate::user::{SharedDocument, User};

/// Keeps every record in process memory. All state is lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<Uuid, User>>,
    shared: Mutex<Option<SharedDocument>>,
}

// a panic mid-update can't leave a half-written record behind, so poisoning is ignored
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub async fn find_user(&self, username: &str) -> Result<User> {
        lock(&self.users)
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User> {
        lock(&self.users).get(&id).cloned().ok_or(StoreError::NotFound)
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users);

        if users.values().any(|u| u.username == user.username) || users.contains_key(&user.id) {
            return Err(StoreError::Conflict);
        }

        users.insert(user.id, user.clone());
        Ok(())
    }

    pub async fn update_user_data(&self, id: Uuid, data: &Value, now: Timestamp) -> Result<()> {
        let mut users = lock(&self.users);
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;

        user.data = data.clone();
        user.last_sync = Some(now);
        Ok(())
    }

    pub async fn shared_document_or_insert(&self, seed: SharedDocument) -> Result<SharedDocument> {
        Ok(lock(&self.shared).get_or_insert(seed).clone())
    }

    pub async fn replace_shared_document(&self, doc: &SharedDocument) -> Result<()> {
        *lock(&self.shared) = Some(doc.clone());
        Ok(())
    }
}
