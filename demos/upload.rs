//! Example: Upload a file
//!
//! Usage:
//!   cargo run --example upload -- [--catalog PATH] [--name NAME] <LOCAL_FILE>
//!
//! Interrupt with Ctrl-C and run again to resume from the last stored chunk.

mod cli;

use chanstore::{Store, TransferControl};
use cli::{config_from_parser, init_tracing, progress_bar, usage_and_exit, ArgParser};
use tokio_util::sync::CancellationToken;

const USAGE: &str =
    "Usage: cargo run --example upload -- [--catalog PATH] [--work-dir DIR] [--name NAME] <LOCAL_FILE>";

#[tokio::main]
async fn main() -> chanstore::Result<()> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let config = config_from_parser(&mut parser);
    let name = parser.take_value(&["--name", "-n"]);
    let positionals = parser.remaining();
    if positionals.len() != 1 {
        usage_and_exit(USAGE);
    }
    let local_file = &positionals[0];

    let store = Store::connect(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    let mut control = TransferControl::new(cancel).with_progress(progress_bar());

    let manifest = match &name {
        Some(name) => store.upload_as(local_file, name, &mut control).await,
        None => store.upload_file(local_file, &mut control).await,
    };
    match manifest {
        Ok(manifest) => {
            println!("Upload complete!");
            println!(
                "Stored {} as id {} ({} chunks, {} bytes)",
                manifest.display_name,
                manifest.id,
                manifest.chunk_count(),
                manifest.total_size_bytes
            );
        }
        Err(chanstore::StoreError::Cancelled) => {
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
