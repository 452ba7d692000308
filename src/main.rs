use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

mod args;
mod auth;
mod backend;
mod cors;
mod inventory;
mod routes;
mod stocksync;
mod store;
mod time;
mod user;

#[cfg(test)]
mod mock;

use args::Args;
use auth::Tokens;
use routes::Router;
use stocksync::StockSync;
use store::Store;

#[tokio::main]
async fn main() {
    // a missing .env is normal, everything can come from the real environment
    let dotenv = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("couldn't load .env: {e}");
        }
    }

    let args = Args::parse();
    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            std::process::exit(2);
        }
    };

    let store_url = args.store_url();
    match &store_url {
        Some(url) => info!("store: {url} (connects on first use)"),
        None => warn!("STORE_URL is not set, data routes will fail until it is"),
    }

    let store = Store::new(store_url, args.connect_timeout());
    let tokens = Tokens::new(&args.jwt_secret(), args.token_ttl());
    let router = Router::new(StockSync::new(store, tokens), args.data_mode(), args.cors());

    info!(
        "listening on {addr}, {:?} data mode, {:?} cors",
        args.data_mode(),
        args.cors()
    );

    warp::serve(routes::routes(Arc::new(router)))
        .run(addr)
        .await;
}
