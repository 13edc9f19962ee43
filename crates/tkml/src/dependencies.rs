// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::document::DocumentId;
use std::collections::{HashMap, HashSet};

/// Reverse include edges: included document -> documents that include it.
///
/// Edges accumulate across requests and are only dropped by [`clear`], so
/// the graph may over-approximate but never misses a dependent.
///
/// [`clear`]: DependencyGraph::clear
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    dependents: HashMap<DocumentId, HashSet<DocumentId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `includer` includes `included`.
    pub fn add_edge(&mut self, included: &DocumentId, includer: &DocumentId) {
        self.dependents
            .entry(included.clone())
            .or_default()
            .insert(includer.clone());
    }

    /// Documents that directly include `id`.
    pub fn dependents_of(&self, id: &DocumentId) -> Vec<DocumentId> {
        let mut result: Vec<DocumentId> = self
            .dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        result.sort();
        result
    }

    /// Every document that includes `id` at any depth, in breadth-first
    /// order. `id` itself is only listed when it sits on an include cycle.
    pub fn transitive_dependents(&self, id: &DocumentId) -> Vec<DocumentId> {
        let mut visited: HashSet<DocumentId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from(self.dependents_of(id));

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            queue.extend(self.dependents_of(&next));
            order.push(next);
        }

        order
    }

    /// Removes every edge.
    pub fn clear(&mut self) {
        self.dependents.clear();
    }

    /// Number of documents with at least one recorded dependent.
    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    /// True when no edges are recorded.
    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}
