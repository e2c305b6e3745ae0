use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use shared::domain::{LogEntry, NodeId, NodeStatus, RunId};
use tokio::sync::RwLock;

pub type SharedExecutionStore = Arc<RwLock<ExecutionStore>>;

/// Per-run node statuses and log. Holds no I/O; every mutation is total.
#[derive(Debug, Default, Clone)]
pub struct ExecutionStore {
    run_id: Option<RunId>,
    node_statuses: HashMap<NodeId, NodeStatus>,
    node_logs: Vec<LogEntry>,
    is_executing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSnapshot {
    pub run_id: Option<RunId>,
    pub node_statuses: HashMap<NodeId, NodeStatus>,
    pub node_logs: Vec<LogEntry>,
    pub is_executing: bool,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedExecutionStore {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn start_execution(&mut self, run_id: RunId) {
        self.run_id = Some(run_id);
        self.node_statuses.clear();
        self.node_logs.clear();
        self.is_executing = true;
    }

    pub fn set_node_status(&mut self, node_id: NodeId, status: NodeStatus) {
        self.node_statuses.insert(node_id, status);
    }

    pub fn add_node_log(&mut self, entry: LogEntry) {
        self.node_logs.push(entry);
    }

    /// Marks the run as no longer executing; statuses and log stay readable.
    pub fn finish_execution(&mut self) {
        self.is_executing = false;
    }

    pub fn reset(&mut self) {
        self.run_id = None;
        self.node_statuses.clear();
        self.node_logs.clear();
        self.is_executing = false;
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn node_statuses(&self) -> &HashMap<NodeId, NodeStatus> {
        &self.node_statuses
    }

    pub fn node_status(&self, node_id: &NodeId) -> NodeStatus {
        self.node_statuses.get(node_id).copied().unwrap_or_default()
    }

    pub fn node_logs(&self) -> &[LogEntry] {
        &self.node_logs
    }

    pub fn is_executing(&self) -> bool {
        self.is_executing
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            run_id: self.run_id.clone(),
            node_statuses: self.node_statuses.clone(),
            node_logs: self.node_logs.clone(),
            is_executing: self.is_executing,
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
