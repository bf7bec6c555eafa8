use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use serde::Serialize;

use crate::common::cli::OutputMode;
use crate::common::format::{human_mem_mb, idle_of_total, idle_of_total_mem};
use crate::resources::record::NodeRecord;
use crate::resources::registry::{PartitionSummary, RegistrySnapshot};
use crate::resources::state::NodeState;

pub trait Output {
    fn print_node_list(&self, nodes: &[&NodeRecord]) -> crate::Result<()>;
    fn print_partition_list(&self, partitions: &[PartitionSummary]) -> crate::Result<()>;
    fn print_registry_info(&self, snapshot: &RegistrySnapshot) -> crate::Result<()>;
}

pub fn create_output(mode: OutputMode) -> Box<dyn Output> {
    match mode {
        OutputMode::Cli => Box::new(CliOutput::new(ColorChoice::Auto)),
        OutputMode::Json => Box::new(JsonOutput),
    }
}

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_vertical_table(&self, rows: Vec<Vec<CellStruct>>) -> crate::Result<()> {
        let table = rows.table().separator(
            Separator::builder()
                .column(Some(Default::default()))
                .build(),
        );
        self.print_table(table)
    }

    fn print_horizontal_table(
        &self,
        rows: Vec<Vec<CellStruct>>,
        header: Vec<CellStruct>,
    ) -> crate::Result<()> {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table)
    }

    fn print_table(&self, table: TableStruct) -> crate::Result<()> {
        print_stdout(table.color_choice(self.color_policy))?;
        Ok(())
    }
}

fn state_cell(state: NodeState) -> CellStruct {
    let color = match state {
        NodeState::Idle => Color::Green,
        NodeState::Running => Color::Cyan,
        NodeState::NotAvailable => Color::Red,
    };
    state.as_str().cell().foreground_color(Some(color))
}

impl Output for CliOutput {
    fn print_node_list(&self, nodes: &[&NodeRecord]) -> crate::Result<()> {
        let rows: Vec<_> = nodes
            .iter()
            .map(|node| {
                vec![
                    node.name().cell(),
                    node.partitions().join(",").cell(),
                    state_cell(node.state()),
                    idle_of_total(node.cpus()).cell().justify(Justify::Right),
                    idle_of_total_mem(node.memory_mb())
                        .cell()
                        .justify(Justify::Right),
                    idle_of_total(node.gpus()).cell().justify(Justify::Right),
                ]
            })
            .collect();

        let header = vec![
            "Node".cell().bold(true),
            "Partitions".cell().bold(true),
            "State".cell().bold(true),
            "Idle CPUs".cell().bold(true),
            "Idle memory".cell().bold(true),
            "Idle GPUs".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header)
    }

    fn print_partition_list(&self, partitions: &[PartitionSummary]) -> crate::Result<()> {
        let rows: Vec<_> = partitions
            .iter()
            .map(|partition| {
                vec![
                    partition.name.as_str().cell(),
                    format!("{}/{}", partition.available_nodes, partition.nodes)
                        .cell()
                        .justify(Justify::Right),
                    format!("{}/{}", partition.idle_cores, partition.cores)
                        .cell()
                        .justify(Justify::Right),
                    format!(
                        "{}/{}",
                        human_mem_mb(partition.idle_mem_mb),
                        human_mem_mb(partition.mem_mb)
                    )
                    .cell()
                    .justify(Justify::Right),
                    format!("{}/{}", partition.idle_gpus, partition.gpus)
                        .cell()
                        .justify(Justify::Right),
                ]
            })
            .collect();

        let header = vec![
            "Partition".cell().bold(true),
            "Available nodes".cell().bold(true),
            "Idle CPUs".cell().bold(true),
            "Idle memory".cell().bold(true),
            "Idle GPUs".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header)
    }

    fn print_registry_info(&self, snapshot: &RegistrySnapshot) -> crate::Result<()> {
        let rows = vec![
            vec!["Nodes".cell().bold(true), snapshot.len().cell()],
            vec!["Scans".cell().bold(true), snapshot.scans().cell()],
            vec![
                "Last scan".cell().bold(true),
                snapshot
                    .last_scan()
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
                    .cell(),
            ],
            vec![
                "Failed scans in a row".cell().bold(true),
                snapshot.failed_scans_in_row().cell(),
            ],
            vec!["Stale".cell().bold(true), snapshot.is_stale().cell()],
        ];
        self.print_vertical_table(rows)
    }
}

pub struct JsonOutput;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> crate::Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl Output for JsonOutput {
    fn print_node_list(&self, nodes: &[&NodeRecord]) -> crate::Result<()> {
        println!("{}", to_json(nodes)?);
        Ok(())
    }

    fn print_partition_list(&self, partitions: &[PartitionSummary]) -> crate::Result<()> {
        println!("{}", to_json(partitions)?);
        Ok(())
    }

    fn print_registry_info(&self, snapshot: &RegistrySnapshot) -> crate::Result<()> {
        let json = serde_json::json!({
            "nodes": snapshot.len(),
            "scans": snapshot.scans(),
            "last_scan": snapshot.last_scan(),
            "failed_scans_in_row": snapshot.failed_scans_in_row(),
            "stale": snapshot.is_stale(),
        });
        println!("{}", to_json(&json)?);
        Ok(())
    }
}
