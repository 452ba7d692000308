use std::time::Duration;

use crate::auth::Tokens;
use crate::backend::{Backend, MemoryBackend};
use crate::stocksync::StockSync;
use crate::store::Store;

pub const SECRET: &[u8] = b"test-secret-key-at-least-32-bytes";

pub fn tokens() -> Tokens {
    Tokens::new(SECRET, Duration::from_secs(3600))
}

/// A service over a fresh, already-connected in-memory store.
pub fn stocksync() -> StockSync {
    let store = Store::connected_with(Backend::Memory(MemoryBackend::default()));

    StockSync::new(store, tokens())
}
