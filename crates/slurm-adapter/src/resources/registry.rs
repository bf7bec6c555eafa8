use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Map;
use crate::resources::record::NodeRecord;

/// What happens when a scan reports a node that is already registered.
///
/// `OnceOnly` keeps the record from the first observation of the node for the lifetime of the
/// registry, so later scans only add new nodes. Allocation numbers of known nodes are therefore
/// never refreshed with this policy.
#[derive(
    clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    #[default]
    OnceOnly,
    AlwaysOverwrite,
}

/// How a scan changed the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Resources of all registered nodes of one partition.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub name: String,
    pub nodes: u32,
    pub available_nodes: u32,
    pub cores: u64,
    pub idle_cores: u64,
    pub mem_mb: u64,
    pub idle_mem_mb: u64,
    pub gpus: u64,
    pub idle_gpus: u64,
}

/// Immutable view of the registry after a completed scan.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    nodes: Map<String, NodeRecord>,
    scans: u64,
    failed_scans_in_row: u32,
    last_scan: Option<DateTime<Utc>>,
    stale: bool,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    /// Records sorted by node name.
    pub fn nodes(&self) -> Vec<&NodeRecord> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_unstable_by(|a, b| a.name().cmp(b.name()));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of scans merged into the registry, including failed ones.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    pub fn failed_scans_in_row(&self) -> u32 {
        self.failed_scans_in_row
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Aggregates the registered nodes per partition, sorted by partition name.
    ///
    /// Idle resources are only counted for nodes that are available.
    pub fn partitions(&self) -> Vec<PartitionSummary> {
        let mut partitions: BTreeMap<&str, PartitionSummary> = BTreeMap::new();
        for node in self.nodes.values() {
            let available = node.state().is_available();
            for name in node.partitions() {
                let summary = partitions
                    .entry(name.as_str())
                    .or_insert_with(|| PartitionSummary {
                        name: name.clone(),
                        ..Default::default()
                    });
                summary.nodes = summary.nodes.saturating_add(1);
                summary.cores = summary.cores.saturating_add(node.cpus().total());
                summary.mem_mb = summary.mem_mb.saturating_add(node.memory_mb().total());
                summary.gpus = summary.gpus.saturating_add(node.gpus().total());
                if available {
                    summary.available_nodes = summary.available_nodes.saturating_add(1);
                    summary.idle_cores = summary.idle_cores.saturating_add(node.cpus().idle());
                    summary.idle_mem_mb =
                        summary.idle_mem_mb.saturating_add(node.memory_mb().idle());
                    summary.idle_gpus = summary.idle_gpus.saturating_add(node.gpus().idle());
                }
            }
        }
        partitions.into_values().collect()
    }
}

/// Shared map of node name to [`NodeRecord`].
///
/// The exporter is the only writer. Every scan is merged into a copy of the current snapshot
/// which then replaces it, so readers always see the state after a whole scan.
pub struct ResourceRegistry {
    policy: UpdatePolicy,
    stale_after_failures: Option<u32>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl ResourceRegistry {
    pub fn new(policy: UpdatePolicy, stale_after_failures: Option<u32>) -> Self {
        Self {
            policy,
            stale_after_failures,
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<NodeRecord> {
        self.snapshot().get(name).cloned()
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.snapshot().nodes().into_iter().cloned().collect()
    }

    pub fn partitions(&self) -> Vec<PartitionSummary> {
        self.snapshot().partitions()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot().is_stale()
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_scan()
    }

    /// Merges the records of one scan and publishes the result.
    ///
    /// Nodes that are missing from the scan are kept. `succeeded` tells whether the inventory
    /// command finished without an error, it drives the staleness of the registry.
    pub fn apply_scan(
        &self,
        records: impl IntoIterator<Item = NodeRecord>,
        succeeded: bool,
    ) -> MergeSummary {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RegistrySnapshot::clone(&current);
        let mut summary = MergeSummary::default();

        for record in records {
            match next.nodes.get_mut(record.name()) {
                None => {
                    summary.inserted += 1;
                    next.nodes.insert(record.name().to_string(), record);
                }
                Some(existing) if *existing == record => summary.unchanged += 1,
                Some(existing) => match self.policy {
                    UpdatePolicy::OnceOnly => summary.unchanged += 1,
                    UpdatePolicy::AlwaysOverwrite => {
                        summary.updated += 1;
                        *existing = record;
                    }
                },
            }
        }

        next.scans += 1;
        next.last_scan = Some(Utc::now());
        if succeeded {
            if next.stale {
                log::info!("Node inventory is up to date again");
            }
            next.failed_scans_in_row = 0;
            next.stale = false;
        } else {
            next.failed_scans_in_row += 1;
            let stale = self
                .stale_after_failures
                .is_some_and(|limit| next.failed_scans_in_row >= limit);
            if stale && !next.stale {
                log::warn!(
                    "Node inventory failed {} times in a row, marking registered nodes as stale",
                    next.failed_scans_in_row
                );
            }
            next.stale = stale;
        }

        *current = Arc::new(next);
        summary
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(UpdatePolicy::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::{MergeSummary, PartitionSummary, ResourceRegistry, UpdatePolicy};
    use crate::resources::record::NodeRecord;
    use crate::tests::utils::{NODE01_LINE, NODE02_LINE, record};

    #[test]
    fn test_empty_registry() {
        let registry = ResourceRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.last_scan().is_none());
        assert!(registry.get("node01").is_none());
    }

    #[test]
    fn test_insert_and_query() {
        let registry = ResourceRegistry::default();
        let summary = registry.apply_scan([record(NODE02_LINE), record(NODE01_LINE)], true);
        assert_eq!(
            summary,
            MergeSummary {
                inserted: 2,
                updated: 0,
                unchanged: 0
            }
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("node01"), Some(record(NODE01_LINE)));
        assert!(registry.get("node03").is_none());
        let names: Vec<_> = registry
            .nodes()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["node01", "node02"]);
        assert!(registry.last_scan().is_some());
    }

    #[test]
    fn test_once_only_keeps_first_observation() {
        let registry = ResourceRegistry::new(UpdatePolicy::OnceOnly, None);
        registry.apply_scan([record(NODE02_LINE)], true);
        let first = registry.get("node02").unwrap();

        let changed = record(
            "NodeName=node02 Partitions=compute State=IDLE CPUTot=64 CPUAlloc=0 \
             RealMemory=256000 AllocMem=0 Gres=gpu:2 AllocTRES=",
        );
        let summary = registry.apply_scan([changed], true);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(registry.get("node02").unwrap(), first);
    }

    #[test]
    fn test_always_overwrite_replaces_record() {
        let registry = ResourceRegistry::new(UpdatePolicy::AlwaysOverwrite, None);
        registry.apply_scan([record(NODE02_LINE)], true);

        let changed = record(
            "NodeName=node02 Partitions=compute State=IDLE CPUTot=64 CPUAlloc=0 \
             RealMemory=256000 AllocMem=0 Gres=gpu:2 AllocTRES=",
        );
        let summary = registry.apply_scan([changed.clone()], true);
        assert_eq!(summary.updated, 1);
        assert_eq!(registry.get("node02").unwrap(), changed);
    }

    #[test]
    fn test_missing_nodes_are_kept() {
        for policy in [UpdatePolicy::OnceOnly, UpdatePolicy::AlwaysOverwrite] {
            let registry = ResourceRegistry::new(policy, None);
            registry.apply_scan([record(NODE01_LINE), record(NODE02_LINE)], true);
            registry.apply_scan([record(NODE01_LINE)], true);
            assert_eq!(registry.len(), 2);
        }
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_scans() {
        let registry = ResourceRegistry::default();
        registry.apply_scan([record(NODE01_LINE)], true);
        let snapshot = registry.snapshot();
        registry.apply_scan([record(NODE02_LINE)], true);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.scans(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_after_failures() {
        let registry = ResourceRegistry::new(UpdatePolicy::OnceOnly, Some(2));
        registry.apply_scan([record(NODE01_LINE)], true);
        registry.apply_scan(Vec::<NodeRecord>::new(), false);
        assert!(!registry.is_stale());
        registry.apply_scan(Vec::<NodeRecord>::new(), false);
        assert!(registry.is_stale());
        assert_eq!(registry.snapshot().failed_scans_in_row(), 2);
        // Records are kept while stale
        assert!(registry.get("node01").is_some());

        registry.apply_scan([record(NODE01_LINE)], true);
        assert!(!registry.is_stale());
        assert_eq!(registry.snapshot().failed_scans_in_row(), 0);
    }

    #[test]
    fn test_never_stale_without_limit() {
        let registry = ResourceRegistry::default();
        for _ in 0..10 {
            registry.apply_scan(Vec::<NodeRecord>::new(), false);
        }
        assert!(!registry.is_stale());
        assert_eq!(registry.snapshot().scans(), 10);
    }

    #[test]
    fn test_partition_summary() {
        let registry = ResourceRegistry::default();
        registry.apply_scan(
            [
                record(NODE01_LINE),
                record(NODE02_LINE),
                record(
                    "NodeName=node03 Partitions=gpu State=DOWN CPUTot=8 CPUAlloc=0 \
                     RealMemory=1000 AllocMem=0 Gres=gpu:4 AllocTRES=",
                ),
            ],
            true,
        );
        let partitions = registry.partitions();
        assert_eq!(
            partitions,
            vec![
                PartitionSummary {
                    name: "compute".to_string(),
                    nodes: 2,
                    available_nodes: 2,
                    cores: 96,
                    idle_cores: 32,
                    mem_mb: 384000,
                    idle_mem_mb: 128000,
                    gpus: 2,
                    idle_gpus: 1,
                },
                PartitionSummary {
                    name: "gpu".to_string(),
                    nodes: 2,
                    available_nodes: 1,
                    cores: 72,
                    idle_cores: 0,
                    mem_mb: 257000,
                    idle_mem_mb: 0,
                    gpus: 6,
                    idle_gpus: 1,
                },
            ]
        );
    }

    #[test]
    fn test_partition_totals_saturate() {
        let registry = ResourceRegistry::default();
        registry.apply_scan(
            [
                record(
                    "NodeName=big1 Partitions=huge State=IDLE CPUTot=18446744073709551615 \
                     CPUAlloc=0 RealMemory=1 AllocMem=0",
                ),
                record(
                    "NodeName=big2 Partitions=huge State=IDLE CPUTot=10 CPUAlloc=0 \
                     RealMemory=1 AllocMem=0",
                ),
            ],
            true,
        );
        let partitions = registry.partitions();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].cores, u64::MAX);
        assert_eq!(partitions[0].idle_cores, u64::MAX);
        assert_eq!(partitions[0].mem_mb, 2);
    }
}
