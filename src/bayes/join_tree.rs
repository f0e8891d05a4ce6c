//! Exact marginal inference by junction-tree message passing.
//!
//! The network is moralized, triangulated with a min-fill elimination
//! order, and its maximal cliques are joined into a tree by a
//! maximum-intersection spanning tree. Marginals come out of one
//! Hugin-style collect/distribute pass. The tree structure depends only
//! on the network, so it is compiled once and reused; evidence only
//! affects the per-run potentials.

use std::collections::{BTreeSet, HashMap};

use crate::bayes::network::BayesianNetwork;

// Cliques wider than this would need >2^25 table entries.
const MAX_CLIQUE_WIDTH: usize = 25;

const DIV_FLOOR: f64 = 1e-12;

/// A table over a sorted set of binary variables. Row `r` assigns
/// variable `scope[i]` the value of bit `i` of `r`.
#[derive(Debug, Clone)]
struct Factor {
    scope: Vec<usize>,
    table: Vec<f64>,
}

impl Factor {
    fn ones(scope: Vec<usize>) -> Self {
        let len = 1usize << scope.len();
        Self {
            scope,
            table: vec![1.0; len],
        }
    }

    /// The CPT of network node `v` as a factor over `{v} ∪ parents`,
    /// with hard evidence zeroing inconsistent rows.
    fn from_cpt(network: &BayesianNetwork, v: usize, evidence: &HashMap<usize, bool>) -> Self {
        let node = &network.nodes()[v];
        let mut scope: Vec<usize> = Vec::with_capacity(node.parents.len() + 1);
        scope.push(v);
        scope.extend(node.parents.iter().copied());
        scope.sort_unstable();
        scope.dedup();

        let len = 1usize << scope.len();
        let mut table = Vec::with_capacity(len);
        let value_of = |row: usize, var: usize| -> bool {
            let bit = scope.iter().position(|&s| s == var).unwrap_or(0);
            row & (1 << bit) != 0
        };

        for row in 0..len {
            let mut parent_row = 0usize;
            for (bit, &parent) in node.parents.iter().enumerate() {
                if value_of(row, parent) {
                    parent_row |= 1 << bit;
                }
            }
            let p1 = node.p_true(parent_row);
            let mut p = if value_of(row, v) { p1 } else { 1.0 - p1 };

            for (&var, &observed) in evidence {
                if scope.binary_search(&var).is_ok() && value_of(row, var) != observed {
                    p = 0.0;
                    break;
                }
            }
            table.push(p);
        }
        Self { scope, table }
    }

    fn multiply(&self, other: &Self) -> Self {
        let mut scope: Vec<usize> = self
            .scope
            .iter()
            .chain(other.scope.iter())
            .copied()
            .collect();
        scope.sort_unstable();
        scope.dedup();

        let positions = |sub: &[usize]| -> Vec<usize> {
            sub.iter()
                .map(|v| scope.iter().position(|s| s == v).unwrap_or(0))
                .collect()
        };
        let self_pos = positions(&self.scope);
        let other_pos = positions(&other.scope);

        let len = 1usize << scope.len();
        let mut table = Vec::with_capacity(len);
        for row in 0..len {
            let project = |pos: &[usize]| -> usize {
                pos.iter()
                    .enumerate()
                    .fold(0usize, |acc, (bit, &p)| acc | usize::from(row & (1 << p) != 0) << bit)
            };
            table.push(self.table[project(&self_pos)] * other.table[project(&other_pos)]);
        }
        Self { scope, table }
    }

    /// Sums out every variable not in `keep` (`keep` must be a sorted
    /// subset of the scope).
    fn marginalize_to(&self, keep: &[usize]) -> Self {
        let keep_pos: Vec<usize> = keep
            .iter()
            .map(|v| self.scope.iter().position(|s| s == v).unwrap_or(0))
            .collect();
        let mut table = vec![0.0; 1usize << keep.len()];
        for (row, &value) in self.table.iter().enumerate() {
            let mut target = 0usize;
            for (bit, &p) in keep_pos.iter().enumerate() {
                target |= usize::from(row & (1 << p) != 0) << bit;
            }
            table[target] += value;
        }
        Self {
            scope: keep.to_vec(),
            table,
        }
    }

    /// Pointwise division over an identical scope; `0 / 0` is 0.
    fn divide(&self, other: &Self) -> Self {
        debug_assert_eq!(self.scope, other.scope);
        let table = self
            .table
            .iter()
            .zip(other.table.iter())
            .map(|(&num, &den)| if den.abs() < DIV_FLOOR { 0.0 } else { num / den })
            .collect();
        Self {
            scope: self.scope.clone(),
            table,
        }
    }
}

/// The compiled tree: cliques, tree edges, factor homes and a rooted
/// traversal order.
#[derive(Debug, Clone)]
pub(crate) struct JoinTree {
    cliques: Vec<Vec<usize>>,
    // (clique, parent clique) in BFS order from the root; root has None
    traversal: Vec<(usize, Option<usize>)>,
    factor_home: Vec<usize>,
    marginal_home: Vec<usize>,
}

impl JoinTree {
    /// Compiles the junction tree for a network.
    ///
    /// # Errors
    ///
    /// Returns a description when the triangulation produces a clique
    /// too wide to enumerate or a factor cannot be placed.
    pub(crate) fn compile(network: &BayesianNetwork) -> Result<Self, String> {
        let n = network.len();
        if n == 0 {
            return Err("network has no nodes".to_string());
        }

        // moral graph
        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (v, node) in network.nodes().iter().enumerate() {
            for &p in &node.parents {
                adjacency[v].insert(p);
                adjacency[p].insert(v);
            }
            for (i, &a) in node.parents.iter().enumerate() {
                for &b in &node.parents[i + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
        }

        // triangulate by min-fill elimination, harvesting cliques
        let mut work = adjacency;
        let mut remaining: BTreeSet<usize> = (0..n).collect();
        let mut harvested: Vec<BTreeSet<usize>> = Vec::new();
        while let Some(v) = pick_min_fill(&work, &remaining) {
            let neighbors: Vec<usize> = work[v].iter().copied().collect();
            let mut clique: BTreeSet<usize> = neighbors.iter().copied().collect();
            clique.insert(v);
            if clique.len() > MAX_CLIQUE_WIDTH {
                return Err(format!(
                    "triangulation produced a clique of width {}",
                    clique.len()
                ));
            }
            harvested.push(clique);

            for (i, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[i + 1..] {
                    work[a].insert(b);
                    work[b].insert(a);
                }
            }
            for &nb in &neighbors {
                work[nb].remove(&v);
            }
            work[v].clear();
            remaining.remove(&v);
        }

        // keep maximal cliques only
        let mut cliques: Vec<Vec<usize>> = Vec::new();
        for (i, candidate) in harvested.iter().enumerate() {
            let subsumed = harvested.iter().enumerate().any(|(j, other)| {
                j != i
                    && candidate.is_subset(other)
                    && (candidate != other || j < i)
            });
            if !subsumed {
                cliques.push(candidate.iter().copied().collect());
            }
        }

        // maximum-intersection spanning tree (zero-weight edges still
        // connect components, with an empty separator)
        let mut candidate_edges: Vec<(usize, usize, usize)> = Vec::new();
        for i in 0..cliques.len() {
            for j in i + 1..cliques.len() {
                let weight = intersect(&cliques[i], &cliques[j]).len();
                candidate_edges.push((weight, i, j));
            }
        }
        candidate_edges.sort_by(|a, b| b.0.cmp(&a.0));

        let mut parent_of: Vec<usize> = (0..cliques.len()).collect();
        fn find(parent_of: &mut Vec<usize>, x: usize) -> usize {
            if parent_of[x] != x {
                let root = find(parent_of, parent_of[x]);
                parent_of[x] = root;
            }
            parent_of[x]
        }
        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); cliques.len()];
        for (_, i, j) in candidate_edges {
            let (ri, rj) = (find(&mut parent_of, i), find(&mut parent_of, j));
            if ri != rj {
                parent_of[ri] = rj;
                neighbors[i].push(j);
                neighbors[j].push(i);
            }
        }

        // rooted BFS traversal
        let mut traversal: Vec<(usize, Option<usize>)> = Vec::with_capacity(cliques.len());
        let mut visited = vec![false; cliques.len()];
        let mut queue = std::collections::VecDeque::from([(0usize, None)]);
        visited[0] = true;
        while let Some((c, p)) = queue.pop_front() {
            traversal.push((c, p));
            for &next in &neighbors[c] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back((next, Some(c)));
                }
            }
        }

        // home cliques for CPT factors and marginal queries
        let mut factor_home = Vec::with_capacity(n);
        let mut marginal_home = Vec::with_capacity(n);
        for (v, node) in network.nodes().iter().enumerate() {
            let mut family: Vec<usize> = Vec::with_capacity(node.parents.len() + 1);
            family.push(v);
            family.extend(node.parents.iter().copied());
            family.sort_unstable();
            family.dedup();
            let home = cliques
                .iter()
                .position(|c| family.iter().all(|f| c.binary_search(f).is_ok()))
                .ok_or_else(|| format!("no clique covers the family of node {v}"))?;
            factor_home.push(home);

            let query = cliques
                .iter()
                .enumerate()
                .filter(|(_, c)| c.binary_search(&v).is_ok())
                .min_by_key(|(_, c)| c.len())
                .map(|(i, _)| i)
                .ok_or_else(|| format!("no clique contains node {v}"))?;
            marginal_home.push(query);
        }

        Ok(Self {
            cliques,
            traversal,
            factor_home,
            marginal_home,
        })
    }

    /// Runs one collect/distribute pass and reads the singleton
    /// marginals.
    ///
    /// Returns `[p_false, p_true]` per network node, or `None` where
    /// the evidence drove a marginal to zero mass.
    pub(crate) fn marginals(
        &self,
        network: &BayesianNetwork,
        evidence: &HashMap<usize, bool>,
    ) -> Vec<Option<[f64; 2]>> {
        let mut potentials: Vec<Factor> = self
            .cliques
            .iter()
            .map(|c| Factor::ones(c.clone()))
            .collect();

        for v in 0..network.len() {
            let factor = Factor::from_cpt(network, v, evidence);
            let home = self.factor_home[v];
            potentials[home] = potentials[home].multiply(&factor);
        }

        // collect toward the root
        let mut upward: HashMap<usize, Factor> = HashMap::new();
        for &(c, parent) in self.traversal.iter().rev() {
            if let Some(p) = parent {
                let separator = intersect(&self.cliques[c], &self.cliques[p]);
                let message = potentials[c].marginalize_to(&separator);
                potentials[p] = potentials[p].multiply(&message);
                upward.insert(c, message);
            }
        }

        // distribute back down
        for &(c, parent) in &self.traversal {
            if let Some(p) = parent {
                let separator = intersect(&self.cliques[c], &self.cliques[p]);
                let downward = potentials[p].marginalize_to(&separator);
                let correction = match upward.get(&c) {
                    Some(sent) => downward.divide(sent),
                    None => downward,
                };
                potentials[c] = potentials[c].multiply(&correction);
            }
        }

        (0..network.len())
            .map(|v| {
                let clique = self.marginal_home[v];
                let marginal = potentials[clique].marginalize_to(&[v]);
                let p0 = marginal.table[0];
                let p1 = marginal.table[1];
                let mass = p0 + p1;
                if mass.is_finite() && mass > DIV_FLOOR {
                    Some([p0 / mass, p1 / mass])
                } else {
                    None
                }
            })
            .collect()
    }
}

fn intersect(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter()
        .copied()
        .filter(|v| b.binary_search(v).is_ok())
        .collect()
}

fn pick_min_fill(adjacency: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Option<usize> {
    remaining
        .iter()
        .copied()
        .map(|v| {
            let neighbors: Vec<usize> = adjacency[v].iter().copied().collect();
            let mut fill = 0usize;
            for (i, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[i + 1..] {
                    if !adjacency[a].contains(&b) {
                        fill += 1;
                    }
                }
            }
            (fill, neighbors.len(), v)
        })
        .min()
        .map(|(_, _, v)| v)
}
