use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Coarse operational state of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    Running,
    NotAvailable,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Idle => "IDLE",
            NodeState::Running => "RUNNING",
            NodeState::NotAvailable => "NOT_AVAILABLE",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, NodeState::NotAvailable)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the raw `State` field of `scontrol show nodes` to a [`NodeState`].
///
/// Anything that is not known to be idle or running (drained, down, not responding, states
/// added by newer Slurm versions, ...) is reported as [`NodeState::NotAvailable`].
pub fn classify_node_state(state: &str) -> NodeState {
    match state {
        "IDLE" | "IDLE+PLANNED" => NodeState::Idle,
        "ALLOCATED" | "MIXED" => NodeState::Running,
        "DOWN"
        | "DOWN+NOT_RESPONDING"
        | "ALLOCATED+DRAIN"
        | "IDLE+DRAIN"
        | "IDLE+DRAIN+NOT_RESPONDING"
        | "DOWN+DRAIN+INVALID_REG"
        | "IDLE+NOT_RESPONDING" => NodeState::NotAvailable,
        other => {
            log::trace!("Unknown Slurm node state {other:?}, treating it as not available");
            NodeState::NotAvailable
        }
    }
}
