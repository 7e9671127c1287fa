// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! The dependency graph between user-defined formulas.
//!
//! Formulas are nodes, and there is an edge from every formula to each of the
//! formulas it references.  Cycles are detected once, when the graph is
//! built, and never during evaluation.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::Error;

pub(crate) struct DependencyGraph {
    graph: DiGraph<usize, ()>,
}

impl DependencyGraph {
    /// Creates a graph with one node per formula, where `references[i]` lists
    /// the formulas that formula `i` references.
    pub(crate) fn new(references: &[Vec<usize>]) -> Self {
        let mut graph = DiGraph::with_capacity(references.len(), 0);
        for index in 0..references.len() {
            graph.add_node(index);
        }
        for (index, targets) in references.iter().enumerate() {
            for target in targets {
                graph.update_edge(NodeIndex::new(index), NodeIndex::new(*target), ());
            }
        }
        Self { graph }
    }

    /// Returns the direct dependencies of a formula, in ascending order.
    pub(crate) fn dependencies(&self, index: usize) -> Vec<usize> {
        let mut deps = self
            .graph
            .neighbors(NodeIndex::new(index))
            .map(|n| self.graph[n])
            .collect::<Vec<_>>();
        deps.sort_unstable();
        deps
    }

    /// Returns a cycle path for every formula that is part of a cycle.
    ///
    /// The path starts and ends with the formula itself, for example
    /// `[a, b, a]`.
    pub(crate) fn cycles(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut cycles = BTreeMap::new();
        for component in tarjan_scc(&self.graph) {
            let is_cycle = component.len() > 1
                || self.graph.contains_edge(component[0], component[0]);
            if !is_cycle {
                continue;
            }
            let members: BTreeSet<usize> = component.iter().map(|n| self.graph[*n]).collect();
            for &start in &members {
                let mut path = vec![];
                if self.find_cycle(start, start, &members, &mut path, &mut BTreeSet::new()) {
                    cycles.insert(start, path);
                }
            }
        }
        cycles
    }

    /// Depth first search for a path from `node` back to `start`, staying
    /// inside `members`.
    fn find_cycle(
        &self,
        node: usize,
        start: usize,
        members: &BTreeSet<usize>,
        path: &mut Vec<usize>,
        visited: &mut BTreeSet<usize>,
    ) -> bool {
        path.push(node);
        for successor in self.dependencies(node) {
            if successor == start {
                path.push(start);
                return true;
            }
            if members.contains(&successor)
                && visited.insert(successor)
                && self.find_cycle(successor, start, members, path, visited)
            {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Returns the formulas that are not `excluded` in an order where every
    /// formula comes after all of its dependencies.
    ///
    /// Returns an error if the remaining formulas still contain a cycle.
    pub(crate) fn evaluation_order(&self, excluded: &BTreeSet<usize>) -> Result<Vec<usize>, Error> {
        let healthy = self.graph.filter_map(
            |_, index| (!excluded.contains(index)).then_some(*index),
            |_, _| Some(()),
        );
        let mut order = toposort(&healthy, None)
            .map_err(|cycle| {
                Error::internal(format!(
                    "Formula {} is part of a cycle that was not excluded.",
                    healthy[cycle.node_id()]
                ))
            })?
            .into_iter()
            .map(|node| healthy[node])
            .collect::<Vec<_>>();
        // Edges point from a formula to its dependencies, so the topological
        // order lists dependents first.
        order.reverse();
        Ok(order)
    }
}
