use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{error, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Result, StoreError};
use crate::time::Timestamp;
use crate::user::{SharedDocument, User, SHARED_DOCUMENT_ID};

/// Stores each record as a JSON file:
///
/// ```text
/// <root>/users/<account id>.json
/// <root>/usernames/<sha256 of username>.json   (holds the account id)
/// <root>/shared/public.json
/// ```
///
/// Writes land in a temp file first and are moved into place, so readers
/// never observe a partially written record. A username is claimed by
/// hard-linking its index entry, which fails if the entry already exists.
pub struct FileBackend {
    root: PathBuf,
}

macro_rules! path {
    ($root: expr, $($components: expr),*) => {
        {
            let mut p = $root.clone();
            path!(@internal, p, $($components),*);
            p
        }
    };
    (@internal, $p:expr, $next:expr, $($rest: expr),*) => {
        $p.push($next);
        path!(@internal, $p, $($rest),*);
    };
    (@internal, $p:expr, $next:expr) => {
        $p.push($next);
    };
}

impl FileBackend {
    pub async fn open(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();

        for dir in [
            path!(root, "users"),
            path!(root, "usernames"),
            path!(root, "shared"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                error!("create \"{dir:?}\": {e:?}");
                e
            })?;
        }

        Ok(Self { root })
    }
}

// usernames are client-chosen and unbounded, so only a fixed-length digest touches the filesystem
fn file_stem(username: &str) -> String {
    sha256::digest(username)
}

impl FileBackend {
    fn user_path(&self, id: Uuid) -> PathBuf {
        path!(self.root, "users", format!("{id}.json"))
    }

    fn username_path(&self, username: &str) -> PathBuf {
        path!(self.root, "usernames", format!("{}.json", file_stem(username)))
    }

    fn shared_path(&self) -> PathBuf {
        path!(self.root, "shared", format!("{SHARED_DOCUMENT_ID}.json"))
    }

    fn temp_path(&self) -> PathBuf {
        path!(self.root, format!(".tmp-{}", Uuid::new_v4()))
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                return StoreError::NotFound;
            }
            error!("open \"{path:?}\": {e:?}");
            e.into()
        })?;

        serde_json::from_reader(file).map_err(|e| {
            error!("parse \"{path:?}\": {e:?}");
            e.into()
        })
    }

    fn write_temp<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        let tmp = self.temp_path();
        let mut file = File::create(&tmp)?;

        let written = serde_json::to_writer(&mut file, value)
            .map_err(StoreError::from)
            .and_then(|()| Ok(file.flush()?))
            .and_then(|()| Ok(file.sync_all()?));

        if let Err(e) = written {
            error!("write \"{tmp:?}\": {e}");
            drop(file);
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        Ok(tmp)
    }

    /// Moves a fresh copy of `value` over `path`, replacing whatever was there.
    fn replace<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = self.write_temp(value)?;

        fs::rename(&tmp, path).map_err(|e| {
            error!("rename \"{tmp:?}\" -> \"{path:?}\": {e:?}");
            let _ = fs::remove_file(&tmp);
            e.into()
        })
    }

    /// Links a fresh copy of `value` at `path`, failing if it already exists.
    fn create<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = self.write_temp(value)?;
        let linked = fs::hard_link(&tmp, path);

        if let Err(e) = fs::remove_file(&tmp) {
            warn!("couldn't clean up \"{tmp:?}\": {e:?}");
        }

        linked.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                StoreError::Conflict
            } else {
                error!("link \"{path:?}\": {e:?}");
                e.into()
            }
        })
    }
}

impl FileBackend {
    pub async fn find_user(&self, username: &str) -> Result<User> {
        let id: Uuid = self.read(&self.username_path(username))?;
        let user = self.find_user_by_id(id).await?;

        if user.username != username {
            warn!("username index for {username:?} points at {id} ({:?})", user.username);
            return Err(StoreError::NotFound);
        }

        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<User> {
        self.read(&self.user_path(id))
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        let record = self.user_path(user.id);
        self.create(&record, user)?;

        // the record is unreachable by name until its index entry is linked
        match self.create(&self.username_path(&user.username), &user.id) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(e) = fs::remove_file(&record) {
                    warn!("couldn't clean up \"{record:?}\": {e:?}");
                }
                Err(e)
            }
        }
    }

    pub async fn update_user_data(&self, id: Uuid, data: &Value, now: Timestamp) -> Result<()> {
        let mut user = self.find_user_by_id(id).await?;

        user.data = data.clone();
        user.last_sync = Some(now);

        self.replace(&self.user_path(id), &user)
    }

    pub async fn shared_document_or_insert(&self, seed: SharedDocument) -> Result<SharedDocument> {
        let path = self.shared_path();

        match self.read(&path) {
            Err(StoreError::NotFound) => {}
            found => return found,
        }

        match self.create(&path, &seed) {
            Ok(()) => Ok(seed),
            // someone else seeded it first
            Err(StoreError::Conflict) => self.read(&path),
            Err(e) => Err(e),
        }
    }

    pub async fn replace_shared_document(&self, doc: &SharedDocument) -> Result<()> {
        self.replace(&self.shared_path(), doc)
    }
}
