use std::time::Duration;

use log::{error, info};
use tokio::sync::OnceCell;

use crate::backend::{Backend, StoreError, StoreUrl};
use crate::stocksync::{Error, Result};

/// Process-lifetime handle to the document store. The first caller that
/// needs it connects; concurrent callers wait on that same attempt. A
/// failed attempt leaves the handle empty for the next request to retry.
pub struct Store {
    url: Option<StoreUrl>,
    connect_timeout: Duration,
    backend: OnceCell<Backend>,
}

impl Store {
    pub fn new(url: Option<StoreUrl>, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
            backend: OnceCell::new(),
        }
    }

    /// An already-connected store, bypassing lazy connection.
    #[cfg(test)]
    pub fn connected_with(backend: Backend) -> Self {
        Self {
            url: Some(StoreUrl::Memory),
            connect_timeout: Duration::from_secs(1),
            backend: OnceCell::new_with(Some(backend)),
        }
    }

    pub fn configured(&self) -> bool {
        self.url.is_some()
    }

    pub fn connected(&self) -> bool {
        self.backend.initialized()
    }

    pub async fn get(&self) -> Result<&Backend> {
        let url = self.url.as_ref().ok_or(Error::Unconfigured)?;

        self.backend
            .get_or_try_init(|| async {
                info!("connecting to store {url}");

                match tokio::time::timeout(self.connect_timeout, Backend::connect(url)).await {
                    Ok(connected) => connected,
                    Err(_) => Err(StoreError::ConnectTimeout(self.connect_timeout)),
                }
            })
            .await
            .map_err(|e| {
                error!("couldn't connect to store {url}: {e}");
                Error::from(e)
            })
    }
}
