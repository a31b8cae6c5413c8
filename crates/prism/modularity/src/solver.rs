// Prism
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dependency solver for module names.
//!
//! Orders a set of named modules so that every module comes after the modules it
//! depends on. Cycles (including self-dependencies) are reported with the name of
//! the module where the cycle was closed.

use crate::error::{ModularityError, Result};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Traversal marking used while solving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// One pending node of the depth-first walk
struct Frame {
    node: NodeIndex,
    dependencies: Vec<NodeIndex>,
    cursor: usize,
}

/// Graph of module names with "depends on" edges, solved depth-first
#[derive(Debug, Clone, Default)]
pub struct ModuleDependencySolver {
    /// Edges point from a dependent module to the module it requires
    graph: DiGraph<String, ()>,

    /// Mapping from module names to node indices
    node_indices: HashMap<String, NodeIndex>,
}

impl ModuleDependencySolver {
    /// Creates an empty solver
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Adding the same name twice keeps a single node.
    pub fn add_module(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ModularityError::invalid_argument("module name cannot be empty"));
        }
        if !self.node_indices.contains_key(name) {
            let index = self.graph.add_node(name.to_string());
            self.node_indices.insert(name.to_string(), index);
        }
        Ok(())
    }

    /// Records that `dependent` requires `dependency` to come first.
    /// Both modules must have been added beforehand.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        let dependent_index = self.index_of(dependent)?;
        let dependency_index = self.index_of(dependency)?;
        self.graph.add_edge(dependent_index, dependency_index, ());
        Ok(())
    }

    /// Number of distinct modules known to the solver
    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of a module, in the order they were declared
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        match self.node_indices.get(name) {
            Some(&index) => self.ordered_dependencies(index).into_iter().map(|dep| self.graph[dep].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Produces all module names, dependencies first.
    ///
    /// Modules are visited in the order they were added, so the result is stable for a
    /// given sequence of calls. Disconnected groups of modules are each ordered correctly.
    pub fn solve(&self) -> Result<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            marks[start.index()] = Mark::InProgress;
            let mut stack = vec![self.frame(start)];

            loop {
                let Some(frame) = stack.last_mut() else {
                    break;
                };

                match frame.dependencies.get(frame.cursor).copied() {
                    Some(dependency) => {
                        frame.cursor += 1;
                        match marks[dependency.index()] {
                            Mark::Unvisited => {
                                marks[dependency.index()] = Mark::InProgress;
                                stack.push(self.frame(dependency));
                            }
                            Mark::InProgress => {
                                return Err(ModularityError::CyclicDependency {
                                    module: self.graph[dependency].clone(),
                                });
                            }
                            Mark::Done => {}
                        }
                    }
                    None => {
                        let node = frame.node;
                        marks[node.index()] = Mark::Done;
                        order.push(self.graph[node].clone());
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }

    fn index_of(&self, name: &str) -> Result<NodeIndex> {
        if name.is_empty() {
            return Err(ModularityError::invalid_argument("module name cannot be empty"));
        }
        self.node_indices
            .get(name)
            .copied()
            .ok_or_else(|| ModularityError::invalid_argument(format!("cannot add dependency for unknown module {name}")))
    }

    fn frame(&self, node: NodeIndex) -> Frame {
        Frame {
            node,
            dependencies: self.ordered_dependencies(node),
            cursor: 0,
        }
    }

    fn ordered_dependencies(&self, node: NodeIndex) -> Vec<NodeIndex> {
        // petgraph yields the most recently added edge first
        let mut dependencies: Vec<NodeIndex> = self.graph.neighbors_directed(node, Direction::Outgoing).collect();
        dependencies.reverse();
        dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_add_module_is_idempotent() {
        let mut solver = ModuleDependencySolver::new();
        solver.add_module("ModuleA").unwrap();
        solver.add_module("ModuleA").unwrap();
        assert_eq!(solver.module_count(), 1);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut solver = ModuleDependencySolver::new();
        assert!(matches!(solver.add_module(""), Err(ModularityError::InvalidArgument { .. })));
    }

    #[test]
    fn test_dependency_on_unknown_module_is_rejected() {
        let mut solver = ModuleDependencySolver::new();
        solver.add_module("ModuleA").unwrap();
        assert!(matches!(solver.add_dependency("ModuleA", "ModuleB"), Err(ModularityError::InvalidArgument { .. })));
        assert!(matches!(solver.add_dependency("ModuleB", "ModuleA"), Err(ModularityError::InvalidArgument { .. })));
    }

    #[test]
    fn test_chain_is_ordered_dependencies_first() {
        let mut solver = ModuleDependencySolver::new();
        for name in ["ModuleC", "ModuleB", "ModuleA"] {
            solver.add_module(name).unwrap();
        }
        solver.add_dependency("ModuleC", "ModuleB").unwrap();
        solver.add_dependency("ModuleB", "ModuleA").unwrap();

        assert_eq!(solver.solve().unwrap(), vec!["ModuleA", "ModuleB", "ModuleC"]);
    }

    #[test]
    fn test_forest_is_solved() {
        let mut solver = ModuleDependencySolver::new();
        for name in ["ModuleA", "ModuleB", "ModuleC", "ModuleD", "ModuleE"] {
            solver.add_module(name).unwrap();
        }
        solver.add_dependency("ModuleB", "ModuleA").unwrap();
        solver.add_dependency("ModuleD", "ModuleC").unwrap();
        solver.add_dependency("ModuleE", "ModuleD").unwrap();

        let order = solver.solve().unwrap();
        assert_eq!(order.len(), 5);
        assert!(position(&order, "ModuleA") < position(&order, "ModuleB"));
        assert!(position(&order, "ModuleC") < position(&order, "ModuleD"));
        assert!(position(&order, "ModuleD") < position(&order, "ModuleE"));
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut solver = ModuleDependencySolver::new();
        for name in ["ModuleA", "ModuleB", "ModuleC"] {
            solver.add_module(name).unwrap();
        }
        solver.add_dependency("ModuleA", "ModuleB").unwrap();
        solver.add_dependency("ModuleB", "ModuleC").unwrap();
        solver.add_dependency("ModuleC", "ModuleA").unwrap();

        match solver.solve() {
            Err(ModularityError::CyclicDependency { module }) => assert_eq!(module, "ModuleA"),
            other => panic!("expected cyclic dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut solver = ModuleDependencySolver::new();
        solver.add_module("ModuleA").unwrap();
        solver.add_dependency("ModuleA", "ModuleA").unwrap();
        assert!(matches!(solver.solve(), Err(ModularityError::CyclicDependency { module }) if module == "ModuleA"));
    }

    #[test]
    fn test_dependencies_keep_declaration_order() {
        let mut solver = ModuleDependencySolver::new();
        for name in ["ModuleA", "ModuleB", "ModuleC"] {
            solver.add_module(name).unwrap();
        }
        solver.add_dependency("ModuleA", "ModuleC").unwrap();
        solver.add_dependency("ModuleA", "ModuleB").unwrap();
        assert_eq!(solver.dependencies_of("ModuleA"), vec!["ModuleC", "ModuleB"]);
        assert_eq!(solver.solve().unwrap(), vec!["ModuleC", "ModuleB", "ModuleA"]);
    }

    proptest! {
        #[test]
        fn prop_dag_orders_every_edge(edges in proptest::collection::vec((1usize..12, 0usize..12), 0..40)) {
            let mut solver = ModuleDependencySolver::new();
            for i in 0..12 {
                solver.add_module(&format!("M{i}")).unwrap();
            }
            // only point from higher to lower indices so the graph stays acyclic
            let edges: Vec<(usize, usize)> = edges.into_iter().filter(|(a, b)| a > b).collect();
            for (dependent, dependency) in &edges {
                solver.add_dependency(&format!("M{dependent}"), &format!("M{dependency}")).unwrap();
            }

            let order = solver.solve().unwrap();
            prop_assert_eq!(order.len(), 12);
            for (dependent, dependency) in &edges {
                let dependency_name = format!("M{dependency}");
                let dependent_name = format!("M{dependent}");
                prop_assert!(position(&order, &dependency_name) < position(&order, &dependent_name));
            }
        }

        #[test]
        fn prop_back_edge_closes_a_cycle(length in 2usize..10) {
            let mut solver = ModuleDependencySolver::new();
            for i in 0..length {
                solver.add_module(&format!("M{i}")).unwrap();
            }
            for i in 1..length {
                solver.add_dependency(&format!("M{i}"), &format!("M{}", i - 1)).unwrap();
            }
            solver.add_dependency("M0", &format!("M{}", length - 1)).unwrap();

            prop_assert!(
                matches!(solver.solve(), Err(ModularityError::CyclicDependency { .. })),
                "expected a cyclic dependency error"
            );
        }
    }
}
