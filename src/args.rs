use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use log::warn;

use crate::backend::StoreUrl;
use crate::cors::CorsPolicy;
use crate::routes::DataMode;

/// Used when no `JWT_SECRET` is set. Anyone who knows it can mint tokens.
const FALLBACK_SECRET: &str = "stocksync-insecure-default-secret";

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The address stocksync should listen on. By default
    /// stocksync will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port stocksync listens on.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Where documents are stored: `memory:`, `file://<dir>` or
    /// `sqlite://<path>`. Routes that need the store fail until it's set.
    #[arg(long, env = "STORE_URL")]
    store_url: Option<StoreUrl>,

    /// Secret used to sign session tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Whether `/api/data` and `/api/sync` serve one shared document
    /// or each account's own.
    #[arg(long, env = "DATA_MODE", value_enum, default_value_t = DataMode::Public)]
    data_mode: DataMode,

    /// Which CORS headers every response carries.
    #[arg(long, env = "CORS_POLICY", value_enum, default_value_t = CorsPolicy::Credentials)]
    cors: CorsPolicy,

    /// Seconds to wait for the store connection before giving up.
    #[arg(long, env = "CONNECT_TIMEOUT", default_value_t = 5)]
    connect_timeout: u64,

    /// Seconds an issued session token stays valid.
    #[arg(long, env = "TOKEN_TTL", default_value_t = 7 * 24 * 60 * 60)]
    token_ttl: u64,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn store_url(&self) -> Option<StoreUrl> {
        self.store_url.clone()
    }

    pub fn jwt_secret(&self) -> Vec<u8> {
        match self.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => {
                warn!("JWT_SECRET is not set, tokens are signed with a well-known secret");
                FALLBACK_SECRET.as_bytes().to_vec()
            }
        }
    }

    pub fn data_mode(&self) -> DataMode {
        self.data_mode
    }

    pub fn cors(&self) -> CorsPolicy {
        self.cors
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }
}
