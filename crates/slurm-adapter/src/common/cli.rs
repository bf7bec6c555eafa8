use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::resources::config::{
    DEFAULT_INVENTORY_COMMAND, DEFAULT_SLURM_CONFIG_DIR, ExporterConfig, SLURM_CONFIG_FILE_NAME,
};
use crate::resources::registry::UpdatePolicy;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Human readable tables.
    Cli,
    /// One JSON document.
    Json,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets output formatting
    #[arg(
        long,
        env = "SLURM_ADAPTER_OUTPUT_MODE",
        default_value_t = OutputMode::Cli,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: OutputMode,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "SLURM_ADAPTER_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::ADAPTER_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Keep the node inventory up to date until interrupted
    Serve(ServeOpts),
    /// Scan the node inventory once and print the nodes
    Scan(ScanOpts),
    /// Print the nodes found in a saved inventory dump
    Parse(ParseOpts),
}

#[derive(Parser)]
pub struct InventoryOpts {
    /// Shell command that prints one `key=value` line per node
    #[arg(
        long,
        env = "SLURM_ADAPTER_INVENTORY_COMMAND",
        default_value = DEFAULT_INVENTORY_COMMAND
    )]
    pub inventory_command: String,
}

#[derive(Parser)]
pub struct ServeOpts {
    #[clap(flatten)]
    pub inventory: InventoryOpts,

    /// How often is the inventory scanned, `0s` disables periodic scans
    #[arg(
        long,
        env = "SLURM_ADAPTER_SCAN_INTERVAL",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    pub scan_interval: Duration,

    /// Directory (or file) watched for changes of the Slurm configuration
    ///
    /// Can be used multiple times.
    #[arg(
        long = "watch",
        env = "SLURM_ADAPTER_WATCH",
        value_delimiter(','),
        default_value = DEFAULT_SLURM_CONFIG_DIR,
        value_hint = clap::ValueHint::DirPath
    )]
    pub watch_paths: Vec<PathBuf>,

    /// Do not watch the Slurm configuration, scan only periodically
    #[arg(long, conflicts_with("watch_paths"))]
    pub no_watch: bool,

    /// Name of the configuration file whose changes trigger a scan
    #[arg(long, env = "SLURM_ADAPTER_CONFIG_FILE", default_value = SLURM_CONFIG_FILE_NAME)]
    pub config_file_name: String,

    /// What happens when a scan reports an already registered node
    #[arg(
        long,
        env = "SLURM_ADAPTER_UPDATE_POLICY",
        default_value_t = UpdatePolicy::OnceOnly,
        value_enum
    )]
    pub update_policy: UpdatePolicy,

    /// Mark the inventory as stale after this many failed scans in a row
    #[arg(long, env = "SLURM_ADAPTER_STALE_AFTER_FAILURES")]
    pub stale_after_failures: Option<u32>,

    /// Exit if the configuration cannot be watched instead of only scanning periodically
    #[arg(long, env = "SLURM_ADAPTER_REQUIRE_WATCH")]
    pub require_watch: bool,
}

impl ServeOpts {
    pub fn into_config(self) -> ExporterConfig {
        ExporterConfig {
            scan_interval: self.scan_interval,
            watch_paths: if self.no_watch {
                vec![]
            } else {
                self.watch_paths
            },
            config_file_name: self.config_file_name,
            inventory_command: self.inventory.inventory_command,
            update_policy: self.update_policy,
            stale_after_failures: self.stale_after_failures,
            require_watch: self.require_watch,
        }
    }
}

#[derive(Parser)]
pub struct ScanOpts {
    #[clap(flatten)]
    pub inventory: InventoryOpts,

    /// Print per-partition totals instead of individual nodes
    #[arg(long)]
    pub partitions: bool,
}

#[derive(Parser)]
pub struct ParseOpts {
    /// File with the inventory output, `-` reads from stdin
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    /// Print per-partition totals instead of individual nodes
    #[arg(long)]
    pub partitions: bool,
}
