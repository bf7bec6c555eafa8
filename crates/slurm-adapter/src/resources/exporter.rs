use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::resources::config::ExporterConfig;
use crate::resources::inventory::{CommandInventory, InventorySource};
use crate::resources::notifier::{FsEventSource, Notifier, RefreshReceiver, refresh_channel};
use crate::resources::parser::inventory_lines;
use crate::resources::record::NodeRecord;
use crate::resources::registry::{MergeSummary, ResourceRegistry};

/// Records built from the output of the inventory command.
#[derive(Debug, Default)]
pub struct ParsedInventory {
    pub records: Vec<NodeRecord>,
    /// Non-empty lines that did not describe a node.
    pub skipped: usize,
}

pub fn parse_inventory(output: &str) -> ParsedInventory {
    let mut parsed = ParsedInventory::default();
    for line in inventory_lines(output) {
        match NodeRecord::from_inventory_line(line) {
            Some(record) => parsed.records.push(record),
            None => {
                log::debug!("Skipping inventory line without a node name: {line}");
                parsed.skipped += 1;
            }
        }
    }
    parsed
}

#[derive(Debug, Clone, Copy)]
pub struct ScanReport {
    pub nodes: usize,
    pub skipped: usize,
    pub merge: MergeSummary,
    pub succeeded: bool,
    pub duration: Duration,
}

/// Runs the inventory command once and merges its output into the registry.
///
/// A failed command does not abort the scan, whatever it printed is still used and the
/// registered nodes are kept.
pub async fn scan_inventory(
    source: &dyn InventorySource,
    registry: &ResourceRegistry,
) -> ScanReport {
    let start = Instant::now();
    let output = source.fetch().await;
    if let Some(error) = &output.error {
        log::warn!("Node inventory command failed, using its partial output: {error:?}");
    }

    let ParsedInventory { records, skipped } = parse_inventory(&output.stdout);
    let nodes = records.len();
    let merge = registry.apply_scan(records, output.is_success());
    let report = ScanReport {
        nodes,
        skipped,
        merge,
        succeeded: output.is_success(),
        duration: start.elapsed(),
    };
    let level = if merge.inserted + merge.updated > 0 {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log::log!(
        level,
        "Inventory scan finished in {:?}: {} node(s), {} inserted, {} updated, {} skipped line(s)",
        report.duration,
        report.nodes,
        merge.inserted,
        merge.updated,
        report.skipped
    );
    report
}

/// Requests the exporter loop to stop.
///
/// Stopping does not block and can be requested any number of times.
#[derive(Clone)]
pub struct StopHandle {
    sender: mpsc::Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        // A full buffer means that the stop was already requested
        let _ = self.sender.try_send(());
    }
}

/// Keeps the registry up to date by scanning the inventory whenever a refresh signal arrives.
pub struct Exporter {
    registry: Arc<ResourceRegistry>,
    source: Box<dyn InventorySource>,
    signals: RefreshReceiver,
    stop: mpsc::Receiver<()>,
}

impl Exporter {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        source: Box<dyn InventorySource>,
        signals: RefreshReceiver,
    ) -> (Self, StopHandle) {
        let (sender, stop) = mpsc::channel(1);
        let exporter = Self {
            registry,
            source,
            signals,
            stop,
        };
        (exporter, StopHandle { sender })
    }

    pub async fn scan(&self) -> ScanReport {
        scan_inventory(self.source.as_ref(), &self.registry).await
    }

    /// Scans on every refresh signal until a stop is requested.
    ///
    /// Scans run one at a time, signals that arrive during a scan wait in the channel.
    pub async fn run(mut self) {
        let mut signals_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.recv() => {
                    log::debug!("Shutting down resource exporter");
                    break;
                }
                signal = self.signals.recv(), if signals_open => match signal {
                    Some(signal) => {
                        log::trace!("Refresh signal received ({signal}), scanning");
                        self.scan().await;
                    }
                    None => {
                        log::debug!("No more refresh signals will arrive");
                        signals_open = false;
                    }
                }
            }
        }
    }
}

/// Running exporter together with its change notifier.
pub struct ExporterHandle {
    registry: Arc<ResourceRegistry>,
    stop: StopHandle,
    token: CancellationToken,
    exporter: JoinHandle<()>,
    notifier: JoinHandle<()>,
}

impl ExporterHandle {
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Requests both the exporter and the notifier to stop without waiting for them.
    pub fn stop(&self) {
        self.stop.stop();
        self.token.cancel();
    }

    /// Stops the exporter and the notifier and waits until they finish.
    ///
    /// A scan that is in progress is finished first.
    pub async fn shutdown(self) {
        self.stop();
        let (exporter, notifier) = futures::future::join(self.exporter, self.notifier).await;
        if let Err(error) = exporter {
            log::error!("Resource exporter task failed: {error}");
        }
        if let Err(error) = notifier {
            log::error!("Change notifier task failed: {error}");
        }
    }
}

/// Starts watching the configured paths, returns `None` if they cannot be watched and the
/// configuration allows running without the watch.
pub fn watch_config_paths(config: &ExporterConfig) -> crate::Result<Option<FsEventSource>> {
    if config.watch_paths.is_empty() {
        return Ok(None);
    }
    match FsEventSource::watch(&config.watch_paths) {
        Ok(source) => Ok(Some(source)),
        Err(error) if !config.require_watch => {
            log::warn!(
                "Cannot watch Slurm configuration, changes of {} will not trigger a scan: {error}",
                config.config_file_name
            );
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// Starts the resource exporter that runs the configured inventory command.
///
/// The first scan is finished before this function returns.
pub async fn start_exporter(config: ExporterConfig) -> crate::Result<ExporterHandle> {
    let fs_events = watch_config_paths(&config)?;
    let source = Box::new(CommandInventory::new(config.inventory_command.clone()));
    Ok(start_exporter_with(config, source, fs_events).await)
}

/// Starts the resource exporter with a custom inventory and filesystem event source.
pub async fn start_exporter_with(
    config: ExporterConfig,
    source: Box<dyn InventorySource>,
    fs_events: Option<FsEventSource>,
) -> ExporterHandle {
    if config.scan_interval.is_zero() && fs_events.is_none() {
        log::warn!("Periodic scans are disabled and no file is watched, inventory will not be refreshed");
    }

    let registry = Arc::new(ResourceRegistry::new(
        config.update_policy,
        config.stale_after_failures,
    ));
    let (sender, receiver) = refresh_channel();
    let notifier = Notifier::new(
        config.scan_interval,
        fs_events,
        config.config_file_name,
        sender,
    );
    let (exporter, stop) = Exporter::new(registry.clone(), source, receiver);

    let report = exporter.scan().await;
    log::info!(
        "Initial inventory scan registered {} node(s) in {:?}",
        report.merge.inserted,
        report.duration
    );

    let token = CancellationToken::new();
    let notifier = tokio::spawn(notifier.run(token.clone()));
    let exporter = tokio::spawn(exporter.run());

    ExporterHandle {
        registry,
        stop,
        token,
        exporter,
        notifier,
    }
}
