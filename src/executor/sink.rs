//! Per-run result buffers
//!
//! Both phases write into index-addressed slots sized to the target list, so
//! concurrent probes never append to a shared vector. The sink outlives the
//! phases and is what gets persisted, including after cancellation or a fault.

use crate::models::{HostMapping, NodeResult, SpeedTestResult, Target};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Slots {
    nodes: Vec<Option<NodeResult>>,
    rows: Vec<Option<SpeedTestResult>>,
    hosts: Vec<HostMapping>,
}

#[derive(Debug)]
pub struct ResultSink {
    slots: Mutex<Slots>,
}

impl ResultSink {
    pub fn new(total: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                nodes: vec![None; total],
                rows: vec![None; total],
                hosts: Vec::new(),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.slots().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store the latency outcome for a slot; a slot is only written once
    pub fn record_node(&self, index: usize, node: NodeResult) -> bool {
        let mut slots = self.slots();
        match slots.nodes.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(node);
                true
            }
            _ => false,
        }
    }

    pub fn node(&self, index: usize) -> Option<NodeResult> {
        self.slots().nodes.get(index).cloned().flatten()
    }

    /// Indices and latency results of targets that passed the latency phase
    pub fn survivors(&self) -> Vec<(usize, NodeResult)> {
        self.slots()
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| match node {
                Some(node) if !node.failed => Some((i, node.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn probed_count(&self) -> usize {
        self.slots().nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Store the final row for a slot; a slot is only written once
    pub fn put_row(&self, index: usize, row: SpeedTestResult) -> bool {
        let mut slots = self.slots();
        match slots.rows.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(row);
                true
            }
            _ => false,
        }
    }

    pub fn push_host(&self, mapping: HostMapping) {
        self.slots().hosts.push(mapping);
    }

    /// Host mappings deduplicated by hostname, last write wins
    pub fn hosts(&self) -> Vec<HostMapping> {
        let mut unique: BTreeMap<String, HostMapping> = BTreeMap::new();
        for mapping in self.slots().hosts.iter() {
            unique.insert(mapping.hostname.clone(), mapping.clone());
        }
        unique.into_values().collect()
    }

    /// Give every surviving target without a row a latency-only row
    pub fn fill_latency_only(&self, targets: &[Target]) -> usize {
        let mut slots = self.slots();
        let Slots { nodes, rows, .. } = &mut *slots;
        let mut filled = 0;
        for ((node, row), target) in nodes.iter().zip(rows.iter_mut()).zip(targets) {
            if row.is_some() {
                continue;
            }
            if let Some(node) = node.as_ref().filter(|n| !n.failed) {
                *row = Some(SpeedTestResult::latency_only(target.id, node));
                filled += 1;
            }
        }
        filled
    }

    /// Rows written so far, in target order
    pub fn rows(&self) -> Vec<SpeedTestResult> {
        self.slots().rows.iter().flatten().cloned().collect()
    }
}
