//! Structural snapshots
//!
//! A visitor-based accessor over the network and working memory for
//! external diagnostics: node kinds, memory sizes, and bounded samples of
//! the tuples and facts held. Rendering lives outside the engine; the
//! description types serialize so a consumer can ship them as JSON.

use serde::Serialize;

use crate::rete::memory::NodeMemory;
use crate::rete::network::ReteNetwork;
use crate::rete::working_memory::WorkingMemory;

/// How many entries of a memory a snapshot samples.
const SAMPLE_LIMIT: usize = 3;

/// Structural description of one network node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    /// Arena index of the node
    pub id: usize,
    /// Node kind: `type`, `select`, `alpha-memory`, `adapter`, `join`,
    /// `filter`, `binding`, `not`, `exists`, `aggregate`, `terminal`
    pub kind: String,
    /// Human label: predicate/join name, type name, or empty
    pub label: String,
    /// Entries in the node's memory; 0 for memory-less nodes
    pub memory_len: usize,
    /// Debug renderings of up to a few memory entries
    pub samples: Vec<String>,
}

/// Summary of the fact registry.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingMemorySummary {
    /// Number of facts currently present
    pub fact_count: usize,
    /// Debug renderings of up to a few facts, in insertion order
    pub facts: Vec<String>,
}

/// Receiver for a structural walk of the session.
pub trait NetworkVisitor {
    /// Called once per network node, in arena order.
    fn visit_node(&mut self, _node: &NodeDescription) {}
    /// Called once with the fact registry summary.
    fn visit_working_memory(&mut self, _summary: &WorkingMemorySummary) {}
}

fn samples_for(memory: &NodeMemory) -> Vec<String> {
    match memory {
        NodeMemory::Alpha(m) => {
            m.facts.values().take(SAMPLE_LIMIT).map(|cell| format!("{:?}", cell.value())).collect()
        }
        NodeMemory::Join(m) => {
            m.children.values().take(SAMPLE_LIMIT).map(|t| format!("{t:?}")).collect()
        }
        NodeMemory::Filter(m) => {
            m.admitted.values().take(SAMPLE_LIMIT).map(|t| format!("{t:?}")).collect()
        }
        NodeMemory::Binding(m) => {
            m.children.values().take(SAMPLE_LIMIT).map(|t| format!("{t:?}")).collect()
        }
        NodeMemory::Quantifier(m) => {
            m.emitting.values().take(SAMPLE_LIMIT).map(|t| format!("{t:?}")).collect()
        }
        NodeMemory::Aggregate(m) => m
            .groups
            .values()
            .flat_map(|groups| groups.values())
            .filter_map(|group| group.child.as_ref())
            .take(SAMPLE_LIMIT)
            .map(|t| format!("{t:?}"))
            .collect(),
        NodeMemory::Terminal(m) => {
            m.matches.values().take(SAMPLE_LIMIT).map(|t| format!("{t:?}")).collect()
        }
    }
}

/// Walk the network and the fact registry, feeding the visitor.
pub(crate) fn walk(
    network: &ReteNetwork,
    wm: &WorkingMemory,
    visitor: &mut dyn NetworkVisitor,
) {
    for (id, node) in network.iter_nodes() {
        let (memory_len, samples) = match wm.memory(id) {
            Some(memory) => (memory.len(), samples_for(memory)),
            None => (0, Vec::new()),
        };
        visitor.visit_node(&NodeDescription {
            id: id.0,
            kind: node.kind().to_string(),
            label: node.label(),
            memory_len,
            samples,
        });
    }
    let summary = WorkingMemorySummary {
        fact_count: wm.fact_count(),
        facts: wm
            .iter_facts()
            .take(SAMPLE_LIMIT)
            .map(|cell| format!("{:?}", cell.value()))
            .collect(),
    };
    visitor.visit_working_memory(&summary);
}
