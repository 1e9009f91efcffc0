// src/recipe/graph.rs

//! Recipe dependency graph for build ordering
//!
//! Catalogue entries name the recipes they depend on (`libsolv` needs
//! `zchunk`, `librpm` needs `libcomps`, `libsolv` and `librepo`). The graph
//! yields a deterministic topological order, groups recipes into waves
//! that can run in parallel, and answers which recipes are affected when
//! one of them fails.
//!
//! # Example
//!
//! ```
//! use forgeline::recipe::RecipeGraph;
//!
//! let mut graph = RecipeGraph::new();
//! graph.add_recipe("solv", &["zchunk"]);
//! graph.add_recipe("zchunk", &[]);
//! graph.add_recipe("rpm", &["comps", "solv"]);
//! graph.add_recipe("comps", &[]);
//!
//! let order = graph.topological_sort().unwrap();
//! assert_eq!(order, vec!["comps", "zchunk", "solv", "rpm"]);
//! ```

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A directed graph of recipe dependencies
#[derive(Debug, Default, Clone)]
pub struct RecipeGraph {
    /// Recipe name to the recipes it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Recipe name to the recipes that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl RecipeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe with its dependencies
    ///
    /// Adding an existing recipe again merges the dependency sets.
    /// Dependencies that are not recipes yet are added as nodes.
    pub fn add_recipe(&mut self, name: &str, dependencies: &[&str]) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();

        for dep in dependencies {
            self.edges.entry(dep.to_string()).or_default();
            self.reverse_edges
                .entry(dep.to_string())
                .or_default()
                .insert(name.to_string());
            if let Some(deps) = self.edges.get_mut(name) {
                deps.insert(dep.to_string());
            }
        }
    }

    pub fn recipe_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    fn in_degrees(&self) -> BTreeMap<&str, usize> {
        self.edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect()
    }

    /// Kahn's algorithm; ties are broken alphabetically
    ///
    /// Returns dependencies before dependents, or a resolution error naming
    /// the recipes caught in a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Group recipes into waves whose members only depend on earlier waves
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degrees = self.in_degrees();
        let mut current: Vec<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut waves = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for node in &current {
                if let Some(dependents) = self.reverse_edges.get(*node) {
                    for dependent in dependents {
                        if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                            *deg = deg.saturating_sub(1);
                            if *deg == 0 {
                                next.insert(dependent.as_str());
                            }
                        }
                    }
                }
            }
            placed += current.len();
            waves.push(current.iter().map(|s| s.to_string()).collect());
            current = next.into_iter().collect();
        }

        if placed != self.edges.len() {
            let cycles = self.find_cycles();
            let described: Vec<String> = cycles
                .iter()
                .map(|cycle| {
                    let mut path = cycle.clone();
                    if let Some(first) = cycle.first() {
                        path.push(first.clone());
                    }
                    path.join(" -> ")
                })
                .collect();
            return Err(Error::ResolutionError(format!(
                "Circular dependency detected: {}",
                described.join("; ")
            )));
        }

        Ok(waves)
    }

    /// Find all cycles in the graph
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut on_stack = BTreeSet::new();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if !visited.contains(start) {
                self.find_cycles_dfs(start, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn find_cycles_dfs(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        on_stack: &mut BTreeSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string());
        on_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !visited.contains(dep) {
                    self.find_cycles_dfs(dep, visited, on_stack, path, cycles);
                } else if on_stack.contains(dep)
                    && let Some(start) = path.iter().position(|x| x == dep)
                {
                    cycles.push(path[start..].to_vec());
                }
            }
        }

        path.pop();
        on_stack.remove(node);
    }

    /// Every recipe `name` depends on, directly or not
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        walk(&self.edges, name)
    }

    /// Every recipe that depends on `name`, directly or not
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        walk(&self.reverse_edges, name)
    }

    /// Restrict the graph to `roots` and everything they depend on
    pub fn closure(&self, roots: &[&str]) -> RecipeGraph {
        let mut keep: BTreeSet<String> = BTreeSet::new();
        for root in roots {
            if self.contains(root) {
                keep.insert(root.to_string());
                keep.extend(self.transitive_dependencies(root));
            }
        }

        let mut graph = RecipeGraph::new();
        for name in &keep {
            let deps: Vec<&str> = self
                .edges
                .get(name)
                .map(|d| d.iter().map(String::as_str).collect())
                .unwrap_or_default();
            graph.add_recipe(name, &deps);
        }
        graph
    }
}

fn walk(adjacency: &BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = adjacency
        .get(start)
        .map(|next| next.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(node) = queue.pop_front() {
        if seen.insert(node.to_string())
            && let Some(next) = adjacency.get(node)
        {
            queue.extend(next.iter().map(String::as_str));
        }
    }
    seen
}
