//! Graph builder for plan dependencies.
//!
//! The builder takes the accepted plans with their `depends_on` lists and
//! constructs a directed acyclic graph, assigning each plan its wave while
//! it validates that there are no cycles.

use crate::errors::ScheduleError;
use crate::plan::{Plan, PlanId};
use std::collections::{HashMap, HashSet};

/// Index into the plan list.
pub type PlanIndex = usize;

/// A directed acyclic graph of plans.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    /// Plans indexed by their position
    plans: Vec<Plan>,
    /// Map from plan id to index
    index_map: HashMap<PlanId, PlanIndex>,
    /// Forward edges: index -> plans that depend on it
    forward_edges: Vec<Vec<PlanIndex>>,
    /// Reverse edges: index -> plans it depends on
    reverse_edges: Vec<Vec<PlanIndex>>,
    /// Wave of each plan, 0 for plans without dependencies
    waves: Vec<usize>,
}

impl PlanGraph {
    /// Get the number of plans in the graph.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn get_plan(&self, index: PlanIndex) -> Option<&Plan> {
        self.plans.get(index)
    }

    /// Get the index for a plan id.
    pub fn get_index(&self, id: &str) -> Option<PlanIndex> {
        self.index_map.get(id).copied()
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Consume the graph, returning plans with their wave filled in.
    pub fn into_plans(self) -> Vec<Plan> {
        self.plans
            .into_iter()
            .zip(self.waves)
            .map(|(mut plan, wave)| {
                plan.wave = Some(wave);
                plan
            })
            .collect()
    }

    pub fn wave(&self, index: PlanIndex) -> usize {
        self.waves.get(index).copied().unwrap_or(0)
    }

    /// Get plans that depend on the given plan (forward edges).
    pub fn dependents(&self, index: PlanIndex) -> &[PlanIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get plans that the given plan depends on (reverse edges).
    pub fn dependencies(&self, index: PlanIndex) -> &[PlanIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Every plan that depends on `index`, directly or transitively.
    pub fn transitive_dependents(&self, index: PlanIndex) -> Vec<PlanIndex> {
        let mut seen = HashSet::new();
        let mut stack: Vec<PlanIndex> = self.dependents(index).to_vec();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                out.push(next);
                stack.extend_from_slice(self.dependents(next));
            }
        }
        out.sort_unstable();
        out
    }

    /// Get plans with no dependencies (entry points).
    pub fn root_plans(&self) -> Vec<PlanIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Builder for constructing plan graphs.
pub struct DagBuilder {
    plans: Vec<Plan>,
}

impl DagBuilder {
    /// Create a new builder with the given plans.
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    /// Build the plan graph.
    ///
    /// This validates the graph structure:
    /// - Plan ids are unique
    /// - All dependencies reference existing plans
    /// - No cycles are allowed
    pub fn build(self) -> Result<PlanGraph, ScheduleError> {
        let mut index_map = HashMap::new();
        for (i, plan) in self.plans.iter().enumerate() {
            if index_map.insert(plan.id.clone(), i).is_some() {
                return Err(ScheduleError::DuplicatePlan(plan.id.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<PlanIndex>> = vec![Vec::new(); self.plans.len()];
        let mut reverse_edges: Vec<Vec<PlanIndex>> = vec![Vec::new(); self.plans.len()];

        for (to_idx, plan) in self.plans.iter().enumerate() {
            for dep in &plan.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| ScheduleError::UnknownDependency {
                            plan: plan.id.clone(),
                            dependency: dep.clone(),
                        })?;

                // A repeated entry in depends_on is one edge
                if reverse_edges[to_idx].contains(&from_idx) {
                    continue;
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let mut graph = PlanGraph {
            plans: self.plans,
            index_map,
            forward_edges,
            reverse_edges,
            waves: Vec::new(),
        };
        graph.waves = Self::layer(&graph)?;

        Ok(graph)
    }

    /// Assign waves with Kahn's algorithm, rejecting cycles.
    ///
    /// Plans leave the queue in topological order, so every dependency's
    /// wave is final before its dependents are visited.
    fn layer(graph: &PlanGraph) -> Result<Vec<usize>, ScheduleError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();
        let mut waves = vec![0usize; graph.len()];

        let mut queue: Vec<PlanIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                waves[dependent] = waves[dependent].max(waves[node] + 1);
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            return Err(ScheduleError::Cycle {
                plans: Self::find_cycle(graph, &in_degree),
            });
        }

        Ok(waves)
    }

    /// Name the plans on one cycle among the nodes Kahn could not process.
    ///
    /// Every unprocessed node still has an unprocessed dependency, so walking
    /// dependencies through unprocessed nodes must revisit one of them.
    fn find_cycle(graph: &PlanGraph, in_degree: &[usize]) -> Vec<PlanId> {
        let stuck = |i: PlanIndex| in_degree[i] > 0;
        let Some(start) = (0..graph.len()).find(|&i| stuck(i)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut position = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let Some(&next) = graph.dependencies(current).iter().find(|&&d| stuck(d)) else {
                break;
            };
            if let Some(&at) = position.get(&next) {
                let mut cycle: Vec<PlanId> = path[at..]
                    .iter()
                    .map(|&i| graph.plans[i].id.clone())
                    .collect();
                cycle.reverse();
                return cycle;
            }
            position.insert(next, path.len());
            path.push(next);
            current = next;
        }

        // Unreachable for a stuck graph; fall back to every stuck plan
        (0..graph.len())
            .filter(|&i| stuck(i))
            .map(|i| graph.plans[i].id.clone())
            .collect()
    }
}
