// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Stage dependency graph
//!
//! Edges come from `StageCompleted` preconditions and from the inventory
//! producer to every stage needing the inventory artifact.

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::{ProxError, ProxResult};
use crate::pipeline::{Precondition, StageDescriptor, StageId, StageTask};

/// Dependency graph over stage ids
#[derive(Debug)]
pub struct StageGraph {
    graph: DiGraph<StageId, ()>,
    nodes: HashMap<StageId, NodeIndex>,
    /// Stage ids and names in sequence order
    order: Vec<(StageId, String)>,
}

impl StageGraph {
    /// Build and check a graph for a stage list
    pub fn build(stages: &[StageDescriptor]) -> ProxResult<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for stage in stages {
            nodes.insert(stage.id, graph.add_node(stage.id));
        }

        let producer = stages
            .iter()
            .find(|s| s.task == StageTask::GenerateInventory)
            .map(|s| s.id);

        for stage in stages {
            let to = nodes[&stage.id];
            for pre in &stage.preconditions {
                let dep = match pre {
                    Precondition::StageCompleted(id) => Some(*id),
                    Precondition::InventoryArtifact => producer,
                };
                let Some(dep) = dep else { continue };

                let from = *nodes.get(&dep).ok_or_else(|| ProxError::InvalidRegistry {
                    reason: format!("stage {} waits on unknown stage {}", stage.id, dep),
                })?;
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(ProxError::InvalidRegistry {
                reason: format!("dependency cycle through stage {}", graph[cycle.node_id()]),
            });
        }

        Ok(Self {
            graph,
            nodes,
            order: stages.iter().map(|s| (s.id, s.name.clone())).collect(),
        })
    }

    /// Direct dependencies of a stage, in sequence order
    pub fn dependencies(&self, id: StageId) -> Vec<StageId> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// Stages directly waiting on a stage
    pub fn dependents(&self, id: StageId) -> Vec<StageId> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    /// Whether `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: StageId, b: StageId) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(a), Some(b)) if a != b => has_path_connecting(&self.graph, *b, *a, None),
            _ => false,
        }
    }

    fn neighbors(&self, id: StageId, dir: petgraph::Direction) -> Vec<StageId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut ids: Vec<StageId> = self
            .graph
            .neighbors_directed(*node, dir)
            .map(|n| self.graph[n])
            .collect();
        ids.sort();
        ids
    }

    /// Numbered stage list with dependencies
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (id, name) in &self.order {
            out.push_str(&format!("{} {}", id, name));

            let deps = self.dependencies(*id);
            if !deps.is_empty() {
                let deps: Vec<String> = deps.iter().map(StageId::to_string).collect();
                out.push_str(&format!(" [after: {}]", deps.join(", ")));
            }
            out.push('\n');
        }

        out
    }

    /// Graphviz rendering
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (id, name) in &self.order {
            out.push_str(&format!("    \"{}\" [label=\"{} {}\"];\n", id, id, name));
        }
        out.push('\n');
        for (id, _) in &self.order {
            for dep in self.dependencies(*id) {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", dep, id));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Mermaid rendering
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (id, name) in &self.order {
            out.push_str(&format!("    s{}[\"{} {}\"]\n", id, id, name));
        }
        for (id, _) in &self.order {
            for dep in self.dependencies(*id) {
                out.push_str(&format!("    s{} --> s{}\n", dep, id));
            }
        }

        out
    }
}
