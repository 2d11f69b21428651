use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use symstore_types::TransactionId;

use crate::logging::Verbosity;

#[derive(Parser)]
#[command(
    name = "symstore",
    about = "Manage transactional symbol stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log level (quiet, error, warning, notice, status, verbose, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub verbosity: Option<Verbosity>,

    /// Disable logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Extra configuration file, read after the standard locations
    #[arg(short = 'C', long = "config", global = true, value_name = "PATH")]
    pub config: Vec<PathBuf>,

    /// Store section of the configuration to use
    #[arg(long, global = true, value_name = "NAME")]
    pub config_id: Option<String>,
}

impl Cli {
    /// Effective log level; `--quiet` wins over `--verbosity`.
    pub fn log_level(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            self.verbosity.unwrap_or_default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store files in a new transaction
    Add(AddArgs),
    /// Delete transactions
    Del(DelArgs),
    /// Check whether files are stored
    Query(QueryArgs),
    /// Extract the PDB matching each image
    Fetch(FetchArgs),
    /// Delete old transactions of a product version
    Clean(CleanArgs),
    /// Copy transactions from another store
    Promote(PromoteArgs),
    /// List or delete stored files not accessed recently
    Unused(UnusedArgs),
}

#[derive(Args, Debug)]
pub struct StoreDirArgs {
    /// Root directory of the store
    #[arg(short = 's', long = "store-dir", value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProductArgs {
    #[arg(short = 'p', long = "product-name", value_name = "NAME")]
    pub product: Option<String>,

    #[arg(short = 'v', long = "product-version", value_name = "VERSION")]
    pub version: Option<String>,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    #[command(flatten)]
    pub product: ProductArgs,

    #[arg(short, long)]
    pub comment: Option<String>,

    /// Store files as CAB archives
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// Keep at most this many transactions of the product version
    #[arg(short = 'k', long = "keep-count", value_name = "N")]
    pub keep: Option<usize>,

    /// Overwrite files already stored
    #[arg(short = 'F', long)]
    pub force: bool,

    #[arg(short, long)]
    pub recursive: bool,

    #[arg(required = true, value_name = "FILE_OR_DIR")]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DelArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<TransactionId>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    #[arg(short, long)]
    pub recursive: bool,

    /// Print paths without abbreviation
    #[arg(short = 'F', long = "full-path")]
    pub full_path: bool,

    #[arg(required = true, value_name = "FILE_OR_DIR")]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    #[arg(short, long)]
    pub recursive: bool,

    /// Directory receiving the extracted files
    #[arg(short = 'O', long = "output", value_name = "DIR")]
    pub output: Option<PathBuf>,

    #[arg(short = 'F', long = "full-path")]
    pub full_path: bool,

    #[arg(required = true, value_name = "FILE_OR_DIR")]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    #[command(flatten)]
    pub product: ProductArgs,

    #[arg(short, long)]
    pub comment: Option<String>,

    /// Transactions to keep; negative keeps everything
    #[arg(short = 'k', long = "keep-count", value_name = "N", allow_negative_numbers = true)]
    pub keep: Option<i64>,

    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct PromoteArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    /// Store the transactions are copied from
    #[arg(short = 'I', long = "input-store-dir", value_name = "DIR")]
    pub input: PathBuf,

    #[arg(short, long)]
    pub comment: Option<String>,

    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<TransactionId>,
}

#[derive(Args, Debug)]
pub struct UnusedArgs {
    #[command(flatten)]
    pub store: StoreDirArgs,

    /// Cut-off date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", conflicts_with = "days", required_unless_present = "days")]
    pub date: Option<NaiveDate>,

    /// Cut-off as a number of days before now
    #[arg(long, value_name = "N")]
    pub days: Option<u32>,

    /// Remove the unused files
    #[arg(short, long)]
    pub delete: bool,
}
