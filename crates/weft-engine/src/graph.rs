//! Graph validation and topology.

use std::collections::{HashMap, HashSet, VecDeque};

use weft_core::error::{Result, WeftError};
use weft_core::types::{GraphSpec, StepSpec, ORCHESTRATOR_RESULT_KEY};

/// A validated graph: unique ids, no dangling edges, acyclic.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: HashMap<String, StepSpec>,
    /// Step ids in declaration order.
    order: Vec<String>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
    in_degree: HashMap<String, usize>,
}

impl ExecutionPlan {
    /// Validate `graph` and build its adjacency.
    ///
    /// Fails with `InvalidGraph` on an empty or reserved step id, a duplicate
    /// id, a `next` entry naming an unknown step, or a cycle anywhere in the
    /// graph.
    pub fn build(graph: &GraphSpec) -> Result<Self> {
        let mut steps = HashMap::with_capacity(graph.agents.len());
        let mut order = Vec::with_capacity(graph.agents.len());

        for spec in &graph.agents {
            if spec.id.is_empty() {
                return Err(WeftError::InvalidGraph("step id must not be empty".into()));
            }
            if spec.id == ORCHESTRATOR_RESULT_KEY {
                return Err(WeftError::InvalidGraph(format!(
                    "step id '{}' is reserved",
                    ORCHESTRATOR_RESULT_KEY
                )));
            }
            if steps.insert(spec.id.clone(), spec.clone()).is_some() {
                return Err(WeftError::InvalidGraph(format!(
                    "duplicate step id '{}'",
                    spec.id
                )));
            }
            order.push(spec.id.clone());
        }

        let mut successors: HashMap<String, Vec<String>> =
            order.iter().map(|id| (id.clone(), Vec::new())).collect();
        let mut predecessors: HashMap<String, Vec<String>> =
            order.iter().map(|id| (id.clone(), Vec::new())).collect();
        let mut in_degree: HashMap<String, usize> =
            order.iter().map(|id| (id.clone(), 0)).collect();

        for spec in &graph.agents {
            // `next` is a set: repeated entries count once.
            let mut seen = HashSet::new();
            for target in &spec.next {
                if !seen.insert(target.as_str()) {
                    continue;
                }
                if !steps.contains_key(target) {
                    return Err(WeftError::InvalidGraph(format!(
                        "step '{}' references unknown step '{}'",
                        spec.id, target
                    )));
                }
                if let Some(succ) = successors.get_mut(&spec.id) {
                    succ.push(target.clone());
                }
                if let Some(pred) = predecessors.get_mut(target) {
                    pred.push(spec.id.clone());
                }
                if let Some(deg) = in_degree.get_mut(target) {
                    *deg += 1;
                }
            }
        }

        let plan = Self {
            steps,
            order,
            successors,
            predecessors,
            in_degree,
        };
        plan.check_acyclic()?;
        Ok(plan)
    }

    /// Full Kahn pass; any step never reaching in-degree zero sits on or
    /// behind a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let layers = self.layers();
        let scheduled: usize = layers.iter().map(Vec::len).sum();
        if scheduled == self.order.len() {
            return Ok(());
        }

        let placed: HashSet<&String> = layers.iter().flatten().collect();
        let stuck: Vec<&str> = self
            .order
            .iter()
            .filter(|id| !placed.contains(id))
            .map(String::as_str)
            .collect();
        Err(WeftError::InvalidGraph(format!(
            "cycle detected among steps: {}",
            stuck.join(", ")
        )))
    }

    /// Topological layers: every step appears one layer after its last
    /// predecessor. Steps within a layer keep declaration order.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut in_degree = self.in_degrees();
        let mut levels = Vec::new();
        let mut queue: VecDeque<String> = self.roots().into();

        while !queue.is_empty() {
            let current: Vec<String> = queue.drain(..).collect();
            for id in &current {
                for next in self.successors(id) {
                    if let Some(deg) = in_degree.get_mut(next) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(next.clone());
                        }
                    }
                }
            }
            levels.push(current);
        }

        levels
    }

    /// Steps with no predecessors, in declaration order.
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.in_degree.get(*id).copied() == Some(0))
            .cloned()
            .collect()
    }

    /// A fresh copy of the in-degree table for one scheduling pass.
    pub fn in_degrees(&self) -> HashMap<String, usize> {
        self.in_degree.clone()
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.get(id)
    }

    pub fn successors(&self, id: &str) -> &[String] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps whose `next` contains `id`, in declaration order.
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::graph;

    fn invalid_message(graph: &GraphSpec) -> String {
        match ExecutionPlan::build(graph) {
            Err(WeftError::InvalidGraph(msg)) => msg,
            other => panic!("expected InvalidGraph, got {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn test_layers_diamond() {
        let g = graph(&[
            ("a", "echo", &["b", "c"]),
            ("b", "echo", &["d"]),
            ("c", "echo", &["d"]),
            ("d", "echo", &[]),
        ]);
        let plan = ExecutionPlan::build(&g).unwrap();
        assert_eq!(
            plan.layers(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
        assert_eq!(plan.predecessors("d"), ["b", "c"]);
        assert_eq!(plan.roots(), vec!["a"]);
    }

    #[test]
    fn test_uneven_branches_wait_for_last_predecessor() {
        // d depends on a (layer 0) and c (layer 2): it lands in layer 3.
        let g = graph(&[
            ("a", "echo", &["b", "d"]),
            ("b", "echo", &["c"]),
            ("c", "echo", &["d"]),
            ("d", "echo", &[]),
        ]);
        let plan = ExecutionPlan::build(&g).unwrap();
        assert_eq!(
            plan.layers(),
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]
        );
    }

    #[test]
    fn test_isolated_nodes_are_roots() {
        let g = graph(&[("x", "echo", &[]), ("y", "echo", &[])]);
        let plan = ExecutionPlan::build(&g).unwrap();
        assert_eq!(plan.layers(), vec![vec!["x", "y"]]);
    }

    #[test]
    fn test_empty_graph() {
        let plan = ExecutionPlan::build(&GraphSpec::new("empty", vec![])).unwrap();
        assert!(plan.is_empty());
        assert!(plan.layers().is_empty());
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let g = graph(&[("a", "echo", &["ghost"])]);
        assert!(invalid_message(&g).contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_cycle_without_roots_rejected() {
        let g = graph(&[("a", "echo", &["b"]), ("b", "echo", &["a"])]);
        assert!(invalid_message(&g).contains("cycle"));
    }

    #[test]
    fn test_cycle_behind_a_root_rejected() {
        let g = graph(&[
            ("root", "echo", &["b"]),
            ("b", "echo", &["c"]),
            ("c", "echo", &["b"]),
        ]);
        let msg = invalid_message(&g);
        assert!(msg.contains("cycle"));
        assert!(msg.contains("b, c"));
    }

    #[test]
    fn test_self_loop_rejected() {
        let g = graph(&[("a", "echo", &["a"])]);
        assert!(invalid_message(&g).contains("cycle"));
    }

    #[test]
    fn test_duplicate_and_reserved_ids_rejected() {
        let g = graph(&[("a", "echo", &[]), ("a", "echo", &[])]);
        assert!(invalid_message(&g).contains("duplicate step id 'a'"));

        let g = graph(&[(ORCHESTRATOR_RESULT_KEY, "echo", &[])]);
        assert!(invalid_message(&g).contains("reserved"));
    }

    #[test]
    fn test_repeated_next_entries_count_once() {
        let g = graph(&[("a", "echo", &["b", "b"]), ("b", "echo", &[])]);
        let plan = ExecutionPlan::build(&g).unwrap();
        assert_eq!(plan.predecessors("b"), ["a"]);
        assert_eq!(plan.layers(), vec![vec!["a"], vec!["b"]]);
    }
}
