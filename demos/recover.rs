//! Example: Rebuild an object from raw chunk locators
//!
//! Usage:
//!   cargo run --example recover -- --id ID --name NAME [--hash LOCATOR] [--insert] <DEST> <CHUNK_LOCATOR>...
//!
//! Chunk locators are the attachment URLs of `<id>.0`, `<id>.1`, ... in order.
//! With `--insert` the rebuilt manifest is added back to the catalog.

mod cli;

use chanstore::{IntegrityStatus, Locator, RecoveryRequest, Store, TransferControl};
use cli::{config_from_parser, init_tracing, progress_bar, usage_and_exit, ArgParser};

const USAGE: &str = "Usage: cargo run --example recover -- [--catalog PATH] --id ID --name NAME [--hash LOCATOR] [--insert] <DEST> <CHUNK_LOCATOR>...";

#[tokio::main]
async fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let config = config_from_parser(&mut parser);
    let id = parser
        .take_value(&["--id"])
        .unwrap_or_else(|| usage_and_exit(USAGE));
    let display_name = parser
        .take_value(&["--name", "-n"])
        .unwrap_or_else(|| usage_and_exit(USAGE));
    let hash_locator = parser.take_value(&["--hash"]).map(Locator::new);
    let insert = parser.take_flag(&["--insert"]);
    let mut positionals = parser.remaining();
    if positionals.len() < 2 {
        usage_and_exit(USAGE);
    }
    let dest = positionals.remove(0);
    let request = RecoveryRequest {
        id,
        display_name,
        hash_locator,
        chunk_locators: positionals.into_iter().map(Locator::new).collect(),
    };

    let store = Store::connect(config).await?;
    let mut control = TransferControl::default().with_progress(progress_bar());
    let (manifest, report) = store.recover(&request, &dest, insert, &mut control).await?;

    println!(
        "Recovered {} ({} bytes) to {}",
        manifest.display_name, report.bytes, dest
    );
    match report.integrity {
        IntegrityStatus::Verified => println!("MD5 verified"),
        IntegrityStatus::Unchecked => println!("No digest blob, not verified"),
        IntegrityStatus::Mismatch { expected, actual } => {
            println!("MD5 mismatch: expected {}, got {}", expected, actual)
        }
    }
    if insert {
        println!("Registered as id {}", manifest.id);
    }
    Ok(())
}
