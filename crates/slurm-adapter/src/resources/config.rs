use std::path::PathBuf;
use std::time::Duration;

use crate::resources::registry::UpdatePolicy;

/// How often is the node inventory scanned when nothing else triggers a scan.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Directory that contains the Slurm configuration.
pub const DEFAULT_SLURM_CONFIG_DIR: &str = "/etc/slurm";

/// Changes of this file (inside the watched directories) trigger a scan.
pub const SLURM_CONFIG_FILE_NAME: &str = "slurm.conf";

/// Prints one summary line per node.
pub const DEFAULT_INVENTORY_COMMAND: &str = "scontrol show nodes --oneliner";

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Zero disables the periodic scans.
    pub scan_interval: Duration,
    pub watch_paths: Vec<PathBuf>,
    pub config_file_name: String,
    pub inventory_command: String,
    pub update_policy: UpdatePolicy,
    /// Mark the registry as stale after this many failed scans in a row.
    pub stale_after_failures: Option<u32>,
    /// Fail the startup if the watched paths cannot be watched, instead of only scanning
    /// periodically.
    pub require_watch: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            watch_paths: vec![PathBuf::from(DEFAULT_SLURM_CONFIG_DIR)],
            config_file_name: SLURM_CONFIG_FILE_NAME.to_string(),
            inventory_command: DEFAULT_INVENTORY_COMMAND.to_string(),
            update_policy: UpdatePolicy::default(),
            stale_after_failures: None,
            require_watch: false,
        }
    }
}
