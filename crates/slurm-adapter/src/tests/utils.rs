use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::LevelFilter;

use crate::resources::inventory::{InventoryOutput, InventorySource};
use crate::resources::record::NodeRecord;

pub const NODE01_LINE: &str = "NodeName=node01 Partitions=compute State=IDLE CPUTot=32 CPUAlloc=0 RealMemory=128000 AllocMem=0 Gres=(null) AllocTRES=";
pub const NODE02_LINE: &str = "NodeName=node02 Partitions=compute,gpu State=MIXED CPUTot=64 CPUAlloc=64 RealMemory=256000 AllocMem=256000 Gres=gpu:2 AllocTRES=cpu=64,mem=256000M,gpu=1";

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn record(line: &str) -> NodeRecord {
    NodeRecord::from_inventory_line(line).unwrap()
}

pub fn two_node_inventory() -> String {
    format!("{NODE01_LINE}\n{NODE02_LINE}\n")
}

/// Result of one scripted invocation, an error carries the partial stdout and a message.
pub type ScriptedOutput = Result<String, (String, &'static str)>;

/// Inventory that replays prepared outputs, the last one is repeated forever.
pub struct ScriptedInventory {
    outputs: Vec<ScriptedOutput>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedInventory {
    pub fn new(outputs: Vec<ScriptedOutput>) -> Self {
        assert!(!outputs.is_empty());
        Self {
            outputs,
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl InventorySource for ScriptedInventory {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = InventoryOutput> + Send + '_>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let output = match &self.outputs[index.min(self.outputs.len() - 1)] {
            Ok(stdout) => InventoryOutput::success(stdout.clone()),
            Err((stdout, message)) => {
                InventoryOutput::failed(stdout.clone(), anyhow::anyhow!(*message))
            }
        };
        Box::pin(async move { output })
    }
}

/// Polls `condition` until it holds, panics after a few seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Condition was not fulfilled in time");
}
