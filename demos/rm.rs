//! Example: Remove an object from the catalog
//!
//! Usage:
//!   cargo run --example rm -- [--catalog PATH] <ID>

mod cli;

use chanstore::ObjectCatalog;
use cli::{config_from_parser, init_tracing, usage_and_exit, ArgParser};

const USAGE: &str = "Usage: cargo run --example rm -- [--catalog PATH] <ID>";

fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let config = config_from_parser(&mut parser);
    let positionals = parser.remaining();
    if positionals.len() != 1 {
        usage_and_exit(USAGE);
    }

    let catalog = ObjectCatalog::open(&config.catalog_path)?;
    if catalog.delete(&positionals[0])? {
        println!("Removed {}", positionals[0]);
    } else {
        eprintln!("No object with id {}", positionals[0]);
        std::process::exit(1);
    }
    Ok(())
}
