use std::io::Read;
use std::path::Path;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches};

use slurm_adapter::common::cli::{ParseOpts, RootOptions, ScanOpts, ServeOpts, SubCommand};
use slurm_adapter::common::output::{Output, create_output};
use slurm_adapter::common::setup::setup_logging;
use slurm_adapter::resources::exporter::{parse_inventory, scan_inventory, start_exporter};
use slurm_adapter::resources::inventory::CommandInventory;
use slurm_adapter::resources::record::NodeRecord;
use slurm_adapter::resources::registry::ResourceRegistry;

// Commands

async fn command_serve(output: &dyn Output, opts: ServeOpts) -> anyhow::Result<()> {
    let config = opts.into_config();
    log::info!(
        "Starting Slurm resource exporter {} (scan interval {}, watching {:?})",
        slurm_adapter::ADAPTER_VERSION,
        humantime::format_duration(config.scan_interval),
        config.watch_paths
    );
    let handle = start_exporter(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl-C")?;
    log::info!("Interrupted, stopping the resource exporter");

    let registry = handle.registry().clone();
    handle.shutdown().await;
    output.print_registry_info(&registry.snapshot())?;
    Ok(())
}

async fn command_scan(output: &dyn Output, opts: ScanOpts) -> anyhow::Result<()> {
    let source = CommandInventory::new(opts.inventory.inventory_command);
    let registry = ResourceRegistry::default();
    let report = scan_inventory(&source, &registry).await;
    if !report.succeeded && registry.is_empty() {
        anyhow::bail!("Inventory command `{}` failed", source.command());
    }

    let snapshot = registry.snapshot();
    if opts.partitions {
        output.print_partition_list(&snapshot.partitions())?;
    } else {
        output.print_node_list(&snapshot.nodes())?;
    }
    Ok(())
}

fn read_inventory(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Cannot read inventory from stdin")?;
        Ok(content)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read inventory from {}", path.display()))
    }
}

fn command_parse(output: &dyn Output, opts: ParseOpts) -> anyhow::Result<()> {
    let content = read_inventory(&opts.file)?;
    let parsed = parse_inventory(&content);
    if parsed.skipped > 0 {
        log::warn!("{} line(s) without a node name were skipped", parsed.skipped);
    }

    if opts.partitions {
        let registry = ResourceRegistry::default();
        registry.apply_scan(parsed.records, true);
        output.print_partition_list(&registry.partitions())?;
    } else {
        let mut nodes: Vec<&NodeRecord> = parsed.records.iter().collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        output.print_node_list(&nodes)?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> slurm_adapter::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let output = create_output(top_opts.common.output_mode);
    let result = match top_opts.subcmd {
        SubCommand::Serve(opts) => command_serve(output.as_ref(), opts).await,
        SubCommand::Scan(opts) => command_scan(output.as_ref(), opts).await,
        SubCommand::Parse(opts) => command_parse(output.as_ref(), opts),
    };
    if let Err(e) = result {
        log::error!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
