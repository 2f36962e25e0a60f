//! Fact dependency graph.
//!
//! Every entailed fact points at the body facts of the grounding that
//! justified it. Decompression re-derives facts from facts, so a cycle of
//! entailed facts would have nothing to start from: a feedback vertex set of
//! facts is kept verbatim in the residual to break every cycle.

use std::collections::{HashMap, HashSet};

use crate::search::Evidence;

/// A fact: `(relation id, row)`.
pub type FactId = (usize, u32);

/// Directed graph over facts.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    index: HashMap<FactId, usize>,
    nodes: Vec<FactId>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, fact: FactId) -> usize {
        if let Some(&idx) = self.index.get(&fact) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(fact, idx);
        self.nodes.push(fact);
        self.edges.push(Vec::new());
        idx
    }

    /// Adds edges from the head fact of each evidence entry to its body facts.
    pub fn add_evidence(&mut self, relation: usize, evidence: &[Evidence]) {
        for (row, body) in evidence {
            let head = self.node((relation, *row));
            for &fact in body {
                let to = self.node(fact);
                self.edges[head].push(to);
            }
        }
    }

    /// Number of facts in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    /// Strongly connected components containing at least one edge (more than
    /// one node, or a self-loop), as sorted node indices.
    #[must_use]
    pub fn cyclic_components(&self) -> Vec<Vec<usize>> {
        let all: Vec<usize> = (0..self.nodes.len()).collect();
        tarjan(&self.edges, &all)
    }

    /// Facts whose removal leaves the graph acyclic, sorted.
    #[must_use]
    pub fn feedback_vertex_set(&self) -> Vec<FactId> {
        let mut fvs: Vec<FactId> = Vec::new();
        for scc in self.cyclic_components() {
            for idx in break_cycles(&self.edges, &scc) {
                fvs.push(self.nodes[idx]);
            }
        }
        fvs.sort_unstable();
        fvs.dedup();
        fvs
    }
}

/// Iterative Tarjan restricted to `members`.
fn tarjan(edges: &[Vec<usize>], members: &[usize]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let inside: HashSet<usize> = members.iter().copied().collect();
    let mut index: HashMap<usize, usize> = HashMap::with_capacity(members.len());
    let mut low: HashMap<usize, usize> = HashMap::with_capacity(members.len());
    let mut on_stack: HashSet<usize> = HashSet::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut next = 0usize;
    let mut out = Vec::new();

    for &root in members {
        if index.contains_key(&root) {
            continue;
        }
        // (node, next edge position)
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        index.insert(root, next);
        low.insert(root, next);
        next += 1;
        stack.push(root);
        on_stack.insert(root);

        while let Some(frame) = frames.last_mut() {
            let (v, pos) = *frame;
            if let Some(&w) = edges[v].get(pos) {
                frame.1 += 1;
                if !inside.contains(&w) {
                    continue;
                }
                match index.get(&w).copied().unwrap_or(UNVISITED) {
                    UNVISITED => {
                        index.insert(w, next);
                        low.insert(w, next);
                        next += 1;
                        stack.push(w);
                        on_stack.insert(w);
                        frames.push((w, 0));
                    }
                    w_index if on_stack.contains(&w) => {
                        let lv = low[&v].min(w_index);
                        low.insert(v, lv);
                    }
                    _ => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                let lp = low[&parent].min(low[&v]);
                low.insert(parent, lp);
            }
            if low[&v] == index[&v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack.remove(&w);
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                let cyclic = component.len() > 1 || edges[v].contains(&v);
                if cyclic {
                    component.sort_unstable();
                    out.push(component);
                }
            }
        }
    }
    out
}

/// Greedy feedback vertex set of one strongly connected component: take the
/// node with the largest in-degree × out-degree, then peel off nodes left
/// with only incoming or only outgoing edges, until no edge remains.
fn break_cycles(edges: &[Vec<usize>], scc: &[usize]) -> Vec<usize> {
    let local: HashMap<usize, usize> = scc.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let size = scc.len();
    let mut outgoing: Vec<HashSet<usize>> = vec![HashSet::new(); size];
    let mut incoming: Vec<HashSet<usize>> = vec![HashSet::new(); size];
    for (i, &n) in scc.iter().enumerate() {
        for w in &edges[n] {
            if let Some(&j) = local.get(w) {
                outgoing[i].insert(j);
                incoming[j].insert(i);
            }
        }
    }

    let remove = |i: usize, outgoing: &mut Vec<HashSet<usize>>, incoming: &mut Vec<HashSet<usize>>| {
        for j in std::mem::take(&mut outgoing[i]) {
            incoming[j].remove(&i);
        }
        for j in std::mem::take(&mut incoming[i]) {
            outgoing[j].remove(&i);
        }
    };

    let mut chosen = Vec::new();
    while outgoing.iter().any(|o| !o.is_empty()) {
        let mut best = None;
        let mut best_score = 0usize;
        for i in 0..size {
            let score = outgoing[i].len() * incoming[i].len();
            if score > best_score {
                best_score = score;
                best = Some(i);
            }
        }
        let Some(pick) = best else { break };
        chosen.push(scc[pick]);
        remove(pick, &mut outgoing, &mut incoming);

        let mut updated = true;
        while updated {
            updated = false;
            for i in 0..size {
                if outgoing[i].is_empty() != incoming[i].is_empty() {
                    remove(i, &mut outgoing, &mut incoming);
                    updated = true;
                }
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(u32, u32)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for &(from, to) in edges {
            g.add_evidence(0, &[(from, vec![(0, to)])]);
        }
        g
    }

    fn is_acyclic_without(g: &DependencyGraph, removed: &[FactId]) -> bool {
        let members: Vec<usize> = (0..g.node_count())
            .filter(|&i| !removed.contains(&g.nodes[i]))
            .collect();
        tarjan(&g.edges, &members).is_empty()
    }

    #[test]
    fn test_acyclic_graph_has_empty_fvs() {
        let g = graph(&[(1, 2), (2, 3), (1, 3)]);
        assert!(g.cyclic_components().is_empty());
        assert!(g.feedback_vertex_set().is_empty());
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_two_cycle() {
        let g = graph(&[(1, 2), (2, 1), (2, 3)]);
        assert_eq!(g.cyclic_components().len(), 1);
        let fvs = g.feedback_vertex_set();
        assert_eq!(fvs.len(), 1);
        assert!(is_acyclic_without(&g, &fvs));
    }

    #[test]
    fn test_self_loop_is_cyclic() {
        let g = graph(&[(5, 5), (5, 6)]);
        assert_eq!(g.feedback_vertex_set(), vec![(0, 5)]);
    }

    #[test]
    fn test_overlapping_cycles() {
        // Two triangles sharing node 1, plus a separate 2-cycle.
        let g = graph(&[(1, 2), (2, 3), (3, 1), (1, 4), (4, 5), (5, 1), (7, 8), (8, 7)]);
        assert_eq!(g.cyclic_components().len(), 2);
        let fvs = g.feedback_vertex_set();
        assert!(fvs.contains(&(0, 1)));
        assert_eq!(fvs.len(), 2);
        assert!(is_acyclic_without(&g, &fvs));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let edges: Vec<(u32, u32)> = (0..100_000).map(|i| (i, i + 1)).collect();
        let g = graph(&edges);
        assert!(g.cyclic_components().is_empty());
    }
}
