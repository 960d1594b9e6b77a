//! Example: Download an object by id or display name
//!
//! Usage:
//!   cargo run --example download -- [--catalog PATH] [--name] [--strict] <ID|NAME> <LOCAL_PATH>
//!
//! With `--strict` a digest mismatch is an error instead of a warning.

mod cli;

use chanstore::{IntegrityStatus, Store, StoreError, TransferControl};
use cli::{config_from_parser, init_tracing, progress_bar, usage_and_exit, ArgParser};
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage: cargo run --example download -- [--catalog PATH] [--work-dir DIR] [--name] [--strict] <ID|NAME> <LOCAL_PATH>";

#[tokio::main]
async fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let config = config_from_parser(&mut parser);
    let by_name = parser.take_flag(&["--name", "-n"]);
    let strict = parser.take_flag(&["--strict"]);
    let positionals = parser.remaining();
    if positionals.len() != 2 {
        usage_and_exit(USAGE);
    }
    let target = &positionals[0];
    let local_path = &positionals[1];

    let store = Store::connect(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    let mut control = TransferControl::new(cancel).with_progress(progress_bar());

    println!("Downloading to: {}", local_path);
    let mut report = if by_name {
        store.download_by_name(target, local_path, &mut control).await
    } else {
        store.download(target, local_path, &mut control).await
    };
    if strict {
        report = report.and_then(|r| r.require_verified());
    }

    match report {
        Ok(report) => {
            println!("Downloaded {} bytes", report.bytes);
            match report.integrity {
                IntegrityStatus::Verified => println!("MD5 verified"),
                IntegrityStatus::Unchecked => println!("No digest on record, not verified"),
                IntegrityStatus::Mismatch { expected, actual } => {
                    eprintln!("Warning: MD5 mismatch: expected {}, got {}", expected, actual)
                }
            }
        }
        Err(StoreError::IntegrityMismatch { expected, actual }) => {
            eprintln!("MD5 mismatch: expected {}, got {}", expected, actual);
            std::process::exit(2);
        }
        Err(StoreError::Cancelled) => {
            eprintln!("Interrupted. Run the same command again to resume.");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
