//! Example: Serve the catalog over WebDAV
//!
//! Usage:
//!   cargo run --example serve -- [--catalog PATH] [--bind 127.0.0.1:8080]

mod cli;

use std::sync::Arc;

use chanstore::Store;
use cli::{config_from_parser, init_tracing, usage_and_exit, ArgParser};

const USAGE: &str =
    "Usage: cargo run --example serve -- [--catalog PATH] [--work-dir DIR] [--bind ADDR]";

#[tokio::main]
async fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let mut config = config_from_parser(&mut parser);
    if let Some(bind) = parser.take_value(&["--bind", "-b"]) {
        config.bind_addr = bind.parse().unwrap_or_else(|_| usage_and_exit(USAGE));
    }
    if !parser.remaining().is_empty() {
        usage_and_exit(USAGE);
    }

    let addr = config.bind_addr;
    let store = Store::connect(config).await?;
    store.session().check().await?;
    println!("Mount http://{}/ as a WebDAV folder", addr);
    chanstore::gateway::serve(Arc::new(store), addr).await
}
