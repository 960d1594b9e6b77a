use std::env;
use std::process;

use chanstore::progress::TransferProgress;
use chanstore::{ProgressCallback, StoreConfig};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

pub fn usage_and_exit(usage: &str) -> ! {
    eprintln!("{usage}");
    process::exit(1);
}

pub struct ArgParser {
    args: Vec<String>,
    usage: &'static str,
}

impl ArgParser {
    pub fn new(usage: &'static str) -> Self {
        let args: Vec<String> = env::args().skip(1).collect();

        if args.iter().any(|a| a == "--help" || a == "-h") {
            println!("{usage}");
            process::exit(0);
        }

        Self { args, usage }
    }

    pub fn take_value(&mut self, names: &[&str]) -> Option<String> {
        let mut i = 0;
        while i < self.args.len() {
            if names.contains(&self.args[i].as_str()) {
                let value = self.args.get(i + 1).cloned();
                if value.is_none() {
                    usage_and_exit(self.usage);
                }
                self.args.drain(i..=i + 1);
                return value;
            }
            i += 1;
        }
        None
    }

    #[allow(dead_code)] // Only some demos take boolean switches.
    pub fn take_flag(&mut self, names: &[&str]) -> bool {
        match self.args.iter().position(|a| names.contains(&a.as_str())) {
            Some(i) => {
                self.args.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn remaining(self) -> Vec<String> {
        self.args
    }
}

/// `--catalog PATH`, `--work-dir DIR` and `--proxy URL` override the
/// `CHANSTORE_*` environment.
pub fn config_from_parser(parser: &mut ArgParser) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(path) = parser.take_value(&["--catalog", "-c"]) {
        config.catalog_path = path.into();
    }
    if let Some(dir) = parser.take_value(&["--work-dir"]) {
        config.work_dir = dir.into();
    }
    if let Some(proxy) = parser.take_value(&["--proxy"]) {
        config.proxy = Some(proxy);
    }
    config
}

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanstore=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[allow(dead_code)]
pub fn progress_bar() -> ProgressCallback {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    let mut finished = false;
    Box::new(move |progress: &TransferProgress| {
        if progress.total > 0 {
            bar.set_length(progress.total);
            bar.set_position(progress.done.min(progress.total));
        } else {
            bar.set_length(progress.done.max(1));
            bar.set_position(progress.done);
        }
        bar.set_message(format!(
            "{} ({}/{})",
            progress.filename, progress.chunks_done, progress.chunks_total
        ));

        if progress.is_complete() && !finished {
            finished = true;
            bar.finish_with_message(format!("{} complete", progress.filename));
        }
    })
}
