// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashMap};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use petgraph::Direction;
use ydb_types::base_types::TransactionId;

#[cfg(test)]
#[path = "unit_tests/wait_for_graph_tests.rs"]
mod wait_for_graph_tests;

/// Edge `a -> b` means transaction `a` waits for a lock that `b` holds or is
/// also waiting for.
#[derive(Clone, Debug, Default)]
pub struct WaitForGraph {
    graph: DiGraphMap<TransactionId, ()>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `from`.
    pub fn set_edges(&mut self, from: TransactionId, to: BTreeSet<TransactionId>) {
        for target in self.edges(from) {
            self.graph.remove_edge(from, target);
        }
        for target in to {
            self.graph.add_edge(from, target, ());
        }
    }

    /// Forget `txn`, both its row and every edge pointing at it.
    pub fn remove(&mut self, txn: TransactionId) {
        self.graph.remove_node(txn);
    }

    pub fn clear(&mut self) {
        self.graph = DiGraphMap::new();
    }

    pub fn edges(&self, from: TransactionId) -> BTreeSet<TransactionId> {
        if !self.graph.contains_node(from) {
            return BTreeSet::new();
        }
        self.graph
            .neighbors_directed(from, Direction::Outgoing)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    /// Return the transactions along some cycle, if the graph has one.
    ///
    /// A back edge `u -> v` found by the depth-first search closes the cycle
    /// `v -> .. -> u -> v` along the current search path.
    pub fn find_cycle(&self) -> Option<Vec<TransactionId>> {
        let mut parent = HashMap::new();
        let back_edge = depth_first_search(&self.graph, self.graph.nodes(), |event| match event {
            DfsEvent::TreeEdge(from, to) => {
                parent.insert(to, from);
                Control::Continue
            }
            DfsEvent::BackEdge(from, to) => Control::Break((from, to)),
            _ => Control::Continue,
        });
        let Control::Break((last, first)) = back_edge else {
            return None;
        };

        let mut cycle = vec![last];
        let mut node = last;
        while node != first {
            node = *parent.get(&node)?;
            cycle.push(node);
        }
        cycle.reverse();
        Some(cycle)
    }
}
