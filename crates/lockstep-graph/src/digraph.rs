use std::collections::HashMap;
use std::hash::Hash;

/// Directed graph with insertion-ordered vertices and adjacency lists.
///
/// Self-loops and parallel edges are allowed; both count towards degrees and
/// a self-loop makes the graph cyclic.
#[derive(Debug, Clone)]
pub struct Digraph<V> {
    adjacency: HashMap<V, Vec<V>>,
    order: Vec<V>,
}

impl<V: Eq + Hash + Clone> Digraph<V> {
    pub fn new() -> Self {
        Self {
            adjacency: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a vertex. Returns `false` if it was already present.
    pub fn add_vertex(&mut self, v: V) -> bool {
        if self.adjacency.contains_key(&v) {
            return false;
        }
        self.adjacency.insert(v.clone(), Vec::new());
        self.order.push(v);
        true
    }

    /// Add an edge, adding missing endpoints first.
    pub fn add_edge(&mut self, from: V, to: V) {
        self.add_vertex(from.clone());
        self.add_vertex(to.clone());
        if let Some(out) = self.adjacency.get_mut(&from) {
            out.push(to);
        }
    }

    pub fn contains(&self, v: &V) -> bool {
        self.adjacency.contains_key(v)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    /// Vertices in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &V> {
        self.order.iter()
    }

    /// Outgoing neighbours of `v` in edge insertion order.
    pub fn neighbors(&self, v: &V) -> &[V] {
        self.adjacency.get(v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree(&self) -> HashMap<V, usize> {
        let mut degrees: HashMap<V, usize> = self.order.iter().map(|v| (v.clone(), 0)).collect();
        for targets in self.adjacency.values() {
            for t in targets {
                if let Some(d) = degrees.get_mut(t) {
                    *d += 1;
                }
            }
        }
        degrees
    }

    pub fn out_degree(&self) -> HashMap<V, usize> {
        self.order
            .iter()
            .map(|v| (v.clone(), self.neighbors(v).len()))
            .collect()
    }

    /// Kahn layering: layer 0 holds the vertices without incoming edges, each
    /// following layer those whose predecessors all sit in earlier layers.
    ///
    /// Returns `None` when the graph has a cycle. Order inside a layer carries
    /// no meaning.
    pub fn top_sort(&self) -> Option<Vec<Vec<V>>> {
        let mut remaining: HashMap<&V, usize> = self.order.iter().map(|v| (v, 0)).collect();
        for targets in self.adjacency.values() {
            for t in targets {
                if let Some(d) = remaining.get_mut(t) {
                    *d += 1;
                }
            }
        }

        let mut layer: Vec<&V> = self.order.iter().filter(|v| remaining[v] == 0).collect();
        let mut layers = Vec::new();
        let mut sorted = 0;

        while !layer.is_empty() {
            let mut next = Vec::new();
            for v in &layer {
                for t in self.neighbors(v) {
                    if let Some(d) = remaining.get_mut(t) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(t);
                        }
                    }
                }
            }
            sorted += layer.len();
            layers.push(layer.into_iter().cloned().collect());
            layer = next;
        }

        (sorted == self.order.len()).then_some(layers)
    }

    /// [`top_sort`](Self::top_sort) with the layer order reversed.
    pub fn reverse_top_sort(&self) -> Option<Vec<Vec<V>>> {
        self.top_sort().map(|mut layers| {
            layers.reverse();
            layers
        })
    }

    pub fn has_cycle(&self) -> bool {
        self.top_sort().is_none()
    }
}

impl<V: Eq + Hash + Clone> Default for Digraph<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_of(layers: &[Vec<&str>], v: &str) -> usize {
        layers.iter().position(|l| l.contains(&v)).unwrap()
    }

    #[test]
    fn layers_respect_edges() {
        let mut g = Digraph::new();
        g.add_edge("c", "a");
        g.add_edge("c", "b");
        g.add_edge("a", "root");
        g.add_edge("b", "root");
        g.add_vertex("lonely");

        let layers = g.top_sort().unwrap();
        assert_eq!(layers.len(), 3);
        assert!(layers[0].contains(&"c") && layers[0].contains(&"lonely"));
        assert_eq!(layers[2], vec!["root"]);
        for v in g.vertices() {
            for t in g.neighbors(v) {
                assert!(layer_of(&layers, v) < layer_of(&layers, t));
            }
        }
    }

    #[test]
    fn reverse_top_sort_flips_layers() {
        let mut g = Digraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        assert_eq!(g.reverse_top_sort().unwrap(), vec![vec![3], vec![2], vec![1]]);
    }

    #[test]
    fn cycles_and_self_loops_are_detected() {
        let mut g = Digraph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "a");
        assert!(g.top_sort().is_none());

        let mut s = Digraph::new();
        s.add_edge("x", "x");
        assert!(s.has_cycle());
    }

    #[test]
    fn multi_edges_count_in_degrees() {
        let mut g = Digraph::new();
        g.add_edge("a", "b");
        g.add_edge("a", "b");
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.in_degree()["b"], 2);
        assert_eq!(g.out_degree()["a"], 2);
        assert_eq!(g.top_sort().unwrap(), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn add_vertex_is_idempotent() {
        let mut g: Digraph<&str> = Digraph::default();
        assert!(g.add_vertex("a"));
        assert!(!g.add_vertex("a"));
        assert_eq!(g.len(), 1);
        assert!(g.top_sort().unwrap() == vec![vec!["a"]]);
    }
}
