//! Example: List stored objects
//!
//! Usage:
//!   cargo run --example ls -- [--catalog PATH]

mod cli;

use chanstore::{human_size, ObjectCatalog};
use cli::{config_from_parser, init_tracing, usage_and_exit, ArgParser};

const USAGE: &str = "Usage: cargo run --example ls -- [--catalog PATH]";

fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let config = config_from_parser(&mut parser);
    if !parser.remaining().is_empty() {
        usage_and_exit(USAGE);
    }

    // Listing only reads the catalog; no channel connection needed.
    let catalog = ObjectCatalog::open(&config.catalog_path)?;
    let mut objects = catalog.list()?;
    objects.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    if objects.is_empty() {
        println!("  (empty)");
        return Ok(());
    }
    for object in objects {
        let hash = object
            .content_hash_hex
            .as_deref()
            .map(|h| h.get(..8).unwrap_or(h))
            .unwrap_or("--------");
        println!(
            "  {:>6}  {}  {:>10}  {} ({} chunks)",
            object.id,
            hash,
            human_size(object.total_size_bytes),
            object.display_name,
            object.chunk_count()
        );
    }
    Ok(())
}
