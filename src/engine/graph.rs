use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::engine::types::{DependencyEdge, DependencyKind, Prerequisite};
use crate::error::GraphError;

/// Prerequisite adjacency for one tenant. Cycle-freedom is checked on every
/// insertion, so the edge set is a DAG at all times.
#[derive(Debug, Clone, Default)]
pub struct TenantGraph {
    /// prerequisite -> outgoing edges (edges this topic gates).
    edges_out: HashMap<Uuid, Vec<DependencyEdge>>,
    /// dependent -> incoming edges (this topic's prerequisites).
    edges_in: HashMap<Uuid, Vec<DependencyEdge>>,
    /// Bumped on every successful insertion; the persistence layer uses it as
    /// a compare-and-swap guard so concurrent cycle checks cannot race.
    version: i64,
}

impl TenantGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Validates before mutating: a rejected edge leaves the graph unchanged.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<(), GraphError> {
        if edge.prerequisite == edge.dependent {
            return Err(GraphError::SelfLoop);
        }
        if !(0.0..=1.0).contains(&edge.strength) {
            return Err(GraphError::InvalidStrength(edge.strength));
        }
        if self
            .edges_out
            .get(&edge.prerequisite)
            .map(|out| out.iter().any(|e| e.dependent == edge.dependent))
            .unwrap_or(false)
        {
            return Err(GraphError::DuplicateEdge {
                prerequisite: edge.prerequisite,
                dependent: edge.dependent,
            });
        }
        // The new edge closes a cycle iff the prerequisite is already
        // reachable from the dependent.
        if self.reaches(edge.dependent, edge.prerequisite) {
            return Err(GraphError::Cycle {
                prerequisite: edge.prerequisite,
                dependent: edge.dependent,
            });
        }

        self.edges_out.entry(edge.prerequisite).or_default().push(edge);
        self.edges_in.entry(edge.dependent).or_default().push(edge);
        self.version += 1;
        Ok(())
    }

    pub fn prerequisites_of(&self, topic: Uuid) -> Vec<Prerequisite> {
        self.edges_in
            .get(&topic)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| Prerequisite {
                        topic_id: e.prerequisite,
                        kind: e.kind,
                        strength: e.strength,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, topic: Uuid) -> Vec<Prerequisite> {
        self.edges_out
            .get(&topic)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| Prerequisite {
                        topic_id: e.dependent,
                        kind: e.kind,
                        strength: e.strength,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterative DFS over all edge kinds. O(V+E) per insertion is fine at the
    /// expected scale (tens to low hundreds of topics per domain).
    fn reaches(&self, from: Uuid, to: Uuid) -> bool {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(out) = self.edges_out.get(&node) {
                stack.extend(out.iter().map(|e| e.dependent));
            }
        }
        false
    }

    /// Kahn's algorithm over `required` edges between the given topics, which
    /// seeds the default study sequence for a domain. `seq_of` supplies the
    /// topic registration sequence used to break ties deterministically.
    pub fn topological_order(
        &self,
        topics: &[Uuid],
        seq_of: impl Fn(Uuid) -> u64,
    ) -> Vec<Uuid> {
        let member: HashSet<Uuid> = topics.iter().copied().collect();
        let mut indegree: HashMap<Uuid, usize> = topics.iter().map(|t| (*t, 0)).collect();

        for topic in topics {
            if let Some(edges) = self.edges_in.get(topic) {
                let gating = edges
                    .iter()
                    .filter(|e| e.kind == DependencyKind::Required && member.contains(&e.prerequisite))
                    .count();
                indegree.insert(*topic, gating);
            }
        }

        let mut ready: Vec<Uuid> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(t, _)| *t)
            .collect();
        ready.sort_by_key(|t| seq_of(*t));

        let mut order = Vec::with_capacity(topics.len());
        while !ready.is_empty() {
            // Smallest registration sequence first.
            let next = ready.remove(0);
            order.push(next);

            if let Some(out) = self.edges_out.get(&next) {
                for edge in out {
                    if edge.kind != DependencyKind::Required || !member.contains(&edge.dependent) {
                        continue;
                    }
                    if let Some(d) = indegree.get_mut(&edge.dependent) {
                        *d -= 1;
                        if *d == 0 {
                            let seq = seq_of(edge.dependent);
                            let pos = ready
                                .binary_search_by_key(&seq, |t| seq_of(*t))
                                .unwrap_or_else(|p| p);
                            ready.insert(pos, edge.dependent);
                        }
                    }
                }
            }
        }

        order
    }

    /// Detaches every edge incident to the topic. Used when a topic is
    /// removed (topics own their edges).
    pub fn remove_topic(&mut self, topic: Uuid) {
        self.edges_out.remove(&topic);
        self.edges_in.remove(&topic);
        for edges in self.edges_out.values_mut() {
            edges.retain(|e| e.dependent != topic);
        }
        for edges in self.edges_in.values_mut() {
            edges.retain(|e| e.prerequisite != topic);
        }
        self.version += 1;
    }

    pub fn all_edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> =
            self.edges_out.values().flatten().copied().collect();
        edges.sort_by(|a, b| {
            (a.prerequisite, a.dependent).cmp(&(b.prerequisite, b.dependent))
        });
        edges
    }
}
