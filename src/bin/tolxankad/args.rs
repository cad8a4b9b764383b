use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Directory of `.toml` configuration fragments, concatenated in
    /// directory order.
    #[arg(short, long, default_value = "config.d")]
    pub config_dir: PathBuf,

    /// Path to the sqlite durable store. Created on first run.
    #[arg(short, long, default_value = "tolxanka.db")]
    pub database: PathBuf,

    /// Enables human-friendly logging instead of JSON.
    #[arg(long, default_value_t)]
    pub debug: bool,
}
