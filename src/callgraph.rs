//! # Call Graph
//!
//! Direct-call edges between the functions of a module, with
//! strongly-connected-component analysis. The recursive-guard
//! specialization policy consults this graph to refuse functions that sit
//! on a call cycle.
//!
//! Indirect calls contribute no edges; the graph is a conservative
//! under-approximation of the real call relation.

use std::collections::{BTreeSet, HashMap};

use crate::ir::{Module, TerminatorKind};

/// Direct-call graph over a module's functions.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
    on_cycle: Vec<bool>,
}

impl CallGraph {
    /// Build the graph from a module's direct call sites.
    pub fn build(module: &Module) -> Self {
        let nodes: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut edge_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        for (i, func) in module.functions.iter().enumerate() {
            let Some(body) = &func.body else { continue };
            for bb in &body.blocks {
                if let Some(term) = &bb.terminator {
                    if let TerminatorKind::Call(call) = &term.kind {
                        if let Some(callee) = call.callee_global() {
                            if let Some(&j) = index.get(callee) {
                                edge_sets[i].insert(j);
                            }
                        }
                    }
                }
            }
        }
        let edges: Vec<Vec<usize>> = edge_sets
            .into_iter()
            .map(|set| set.into_iter().collect())
            .collect();

        let on_cycle = compute_cycle_membership(&edges);
        Self { nodes, index, edges, on_cycle }
    }

    /// Check whether a function sits on a call cycle (including direct
    /// self-recursion).
    pub fn is_recursive(&self, name: &str) -> bool {
        self.index
            .get(name)
            .is_some_and(|&i| self.on_cycle[i])
    }

    /// Direct callees of a function.
    pub fn callees<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        let targets = self
            .index
            .get(name)
            .map(|&i| self.edges[i].as_slice())
            .unwrap_or(&[]);
        targets.iter().map(|&j| self.nodes[j].as_str())
    }
}

/// Kosaraju's algorithm; a node is on a cycle iff its component has more
/// than one member or it has a self-edge.
fn compute_cycle_membership(adj: &[Vec<usize>]) -> Vec<bool> {
    let n = adj.len();

    // First pass: order nodes by DFS finish time.
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let v = frame.0;
            if frame.1 < adj[v].len() {
                let w = adj[v][frame.1];
                frame.1 += 1;
                if !visited[w] {
                    visited[w] = true;
                    stack.push((w, 0));
                }
            } else {
                order.push(v);
                stack.pop();
            }
        }
    }

    // Second pass: components on the transposed graph.
    let mut radj = vec![Vec::new(); n];
    for (v, targets) in adj.iter().enumerate() {
        for &w in targets {
            radj[w].push(v);
        }
    }
    let mut comp = vec![usize::MAX; n];
    let mut ncomp = 0;
    for &v in order.iter().rev() {
        if comp[v] != usize::MAX {
            continue;
        }
        comp[v] = ncomp;
        let mut stack = vec![v];
        while let Some(u) = stack.pop() {
            for &w in &radj[u] {
                if comp[w] == usize::MAX {
                    comp[w] = ncomp;
                    stack.push(w);
                }
            }
        }
        ncomp += 1;
    }

    let mut comp_size = vec![0usize; ncomp];
    for v in 0..n {
        comp_size[comp[v]] += 1;
    }
    (0..n)
        .map(|v| comp_size[comp[v]] > 1 || adj[v].contains(&v))
        .collect()
}
