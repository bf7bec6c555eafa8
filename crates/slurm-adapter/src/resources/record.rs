use serde::Serialize;

use crate::resources::parser::{NULL_VALUE, extract_value};
use crate::resources::state::{NodeState, classify_node_state};

/// Name of the generic resource that represents GPUs in `Gres` and `AllocTRES`.
pub const GPU_RESOURCE_NAME: &str = "gpu";

// Keys of `scontrol show nodes --oneliner` used to build a node record
const KEY_NODE_NAME: &str = "NodeName";
const KEY_PARTITIONS: &str = "Partitions";
const KEY_STATE: &str = "State";
const KEY_REAL_MEMORY: &str = "RealMemory";
const KEY_ALLOC_MEMORY: &str = "AllocMem";
const KEY_CPU_TOTAL: &str = "CPUTot";
const KEY_CPU_ALLOC: &str = "CPUAlloc";
const KEY_GRES: &str = "Gres";
const KEY_ALLOC_TRES: &str = "AllocTRES";

/// Total and allocated amount of a single resource kind of a node.
///
/// The idle amount is derived when the value is created and cannot be changed afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capacity {
    total: u64,
    allocated: u64,
    idle: u64,
}

impl Capacity {
    /// Idle amount is floored at zero when more is allocated than available.
    pub fn new(total: u64, allocated: u64) -> Self {
        Self {
            total,
            allocated,
            idle: total.saturating_sub(allocated),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn idle(&self) -> u64 {
        self.idle
    }

    pub fn is_consistent(&self) -> bool {
        self.allocated <= self.total
    }
}

/// Capacity and allocation snapshot of a single compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    name: String,
    partitions: Vec<String>,
    state: NodeState,
    cpus: Capacity,
    memory_mb: Capacity,
    gpus: Capacity,
}

impl NodeRecord {
    pub fn new(
        name: String,
        partitions: Vec<String>,
        state: NodeState,
        cpus: Capacity,
        memory_mb: Capacity,
        gpus: Capacity,
    ) -> Self {
        Self {
            name,
            partitions,
            state,
            cpus,
            memory_mb,
            gpus,
        }
    }

    /// Builds a record from one line of `scontrol show nodes --oneliner`.
    ///
    /// Missing or malformed numeric fields are treated as zero. Returns `None` only if the
    /// line does not name a node.
    pub fn from_inventory_line(line: &str) -> Option<Self> {
        let name = extract_value(line, KEY_NODE_NAME);
        if name.is_empty() {
            return None;
        }

        let cpus = checked_capacity(
            name,
            "CPUs",
            parse_count(extract_value(line, KEY_CPU_TOTAL)),
            parse_count(extract_value(line, KEY_CPU_ALLOC)),
        );
        let memory_mb = checked_capacity(
            name,
            "memory",
            parse_count(extract_value(line, KEY_REAL_MEMORY)),
            parse_count(extract_value(line, KEY_ALLOC_MEMORY)),
        );
        let gpus = checked_capacity(
            name,
            "GPUs",
            parse_gpu_total(extract_value(line, KEY_GRES)),
            parse_gpu_allocated(extract_value(line, KEY_ALLOC_TRES)),
        );

        Some(Self::new(
            name.to_string(),
            parse_partitions(extract_value(line, KEY_PARTITIONS)),
            classify_node_state(extract_value(line, KEY_STATE)),
            cpus,
            memory_mb,
            gpus,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn cpus(&self) -> &Capacity {
        &self.cpus
    }

    pub fn memory_mb(&self) -> &Capacity {
        &self.memory_mb
    }

    pub fn gpus(&self) -> &Capacity {
        &self.gpus
    }
}

fn checked_capacity(node: &str, resource: &str, total: u64, allocated: u64) -> Capacity {
    let capacity = Capacity::new(total, allocated);
    if !capacity.is_consistent() {
        log::warn!(
            "Node {node} reports more allocated {resource} ({allocated}) than available ({total}), \
            idle {resource} set to zero"
        );
    }
    capacity
}

fn parse_count(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}

/// Splits the comma separated `Partitions` field, keeping the order and dropping duplicates.
pub fn parse_partitions(value: &str) -> Vec<String> {
    if value == NULL_VALUE {
        return vec![];
    }
    let mut partitions: Vec<String> = Vec::new();
    for partition in value.split(',').filter(|p| !p.is_empty()) {
        if !partitions.iter().any(|p| p == partition) {
            partitions.push(partition.to_string());
        }
    }
    partitions
}

/// Number of GPUs from the `Gres` field, e.g. `gpu:4`, `gpu:a100:2(S:0-1)` or `(null)`.
///
/// Entries of other generic resources are ignored, entries without a count are zero.
pub fn parse_gpu_total(gres: &str) -> u64 {
    if gres.is_empty() || gres == NULL_VALUE {
        return 0;
    }
    gres.split(',')
        .map(|item| item.split('(').next().unwrap_or(item))
        .filter(|item| item.split(':').next() == Some(GPU_RESOURCE_NAME))
        .filter_map(|item| item.rsplit_once(':'))
        .map(|(_, count)| parse_count(count))
        .fold(0, u64::saturating_add)
}

/// Number of allocated GPUs from the `AllocTRES` field, e.g. `cpu=2,mem=100,gres/gpu=2`.
pub fn parse_gpu_allocated(alloc_tres: &str) -> u64 {
    alloc_tres
        .split(',')
        .find(|item| item.contains(GPU_RESOURCE_NAME))
        .and_then(|item| item.split_once('='))
        .map(|(_, count)| parse_count(count))
        .unwrap_or(0)
}
