//! Execution DAG over an accepted plan.
//!
//! Nodes are kept in planner order so every query that returns several
//! nodes (ready set, dependents) is deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::types::{Plan, Step, StepId, StepStatus};

/// Node state in the execution DAG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not dispatched yet
    Pending,
    /// Handed to the execution adapter
    Running,
    /// Terminal; a result has been recorded
    Finished(StepStatus),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("duplicate step id '{0}'")]
    DuplicateStep(StepId),

    #[error("step '{step}' depends on undefined step '{dependency}'")]
    MissingDependency { step: StepId, dependency: StepId },

    #[error("dependency cycle involving steps: {}", join_ids(.0))]
    Cycle(Vec<StepId>),
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A node in the execution DAG
#[derive(Debug, Clone)]
pub struct DagNode {
    pub step: Step,
    pub state: NodeState,
    /// Steps that depend on this node (reverse edges)
    pub dependents: Vec<StepId>,
}

impl DagNode {
    fn new(step: Step) -> Self {
        Self {
            step,
            state: NodeState::Pending,
            dependents: Vec::new(),
        }
    }

    pub fn id(&self) -> &StepId {
        &self.step.id
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionDag {
    nodes: Vec<DagNode>,
    index: HashMap<StepId, usize>,
    order: Vec<StepId>,
}

impl ExecutionDag {
    /// Build a DAG from a plan. Fails on duplicate ids, dangling
    /// dependencies or cycles.
    pub fn from_plan(plan: &Plan) -> Result<Self, DagError> {
        let mut index = HashMap::with_capacity(plan.steps.len());
        let mut nodes = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            if index.insert(step.id.clone(), nodes.len()).is_some() {
                return Err(DagError::DuplicateStep(step.id.clone()));
            }
            nodes.push(DagNode::new(step.clone()));
        }

        for step in &plan.steps {
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(DagError::MissingDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if seen.insert(dep) {
                    nodes[dep_idx].dependents.push(step.id.clone());
                }
            }
        }

        let order = topological_order(plan).map_err(DagError::Cycle)?;
        Ok(Self {
            nodes,
            index,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.iter()
    }

    /// Step ids in dependency order, ties broken by plan order
    pub fn order(&self) -> &[StepId] {
        &self.order
    }

    pub fn get_node(&self, id: &str) -> Option<&DagNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.get_node(id).map(|node| node.state)
    }

    /// Pending nodes whose every dependency has completed, in plan order.
    pub fn ready_nodes(&self) -> Vec<StepId> {
        self.nodes
            .iter()
            .filter(|node| node.state == NodeState::Pending && self.dependencies_completed(node))
            .map(|node| node.step.id.clone())
            .collect()
    }

    fn dependencies_completed(&self, node: &DagNode) -> bool {
        node.step.depends_on.iter().all(|dep| {
            self.state(dep.as_str()) == Some(NodeState::Finished(StepStatus::Completed))
        })
    }

    /// First dependency that finished without completing, if any.
    pub fn failed_dependency(&self, id: &str) -> Option<(StepId, StepStatus)> {
        let node = self.get_node(id)?;
        node.step.depends_on.iter().find_map(|dep| match self.state(dep.as_str()) {
            Some(NodeState::Finished(status)) if status.cascades() => Some((dep.clone(), status)),
            _ => None,
        })
    }

    pub fn mark_running(&mut self, id: &str) {
        if let Some(&idx) = self.index.get(id) {
            self.nodes[idx].state = NodeState::Running;
        }
    }

    pub fn mark_finished(&mut self, id: &str, status: StepStatus) {
        if let Some(&idx) = self.index.get(id) {
            self.nodes[idx].state = NodeState::Finished(status);
        }
    }

    /// Every node reachable through reverse edges from `id`, in plan order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<StepId> {
        let mut reached = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get_node(&current) else {
                continue;
            };
            for dependent in &node.dependents {
                if let Some(&idx) = self.index.get(dependent) {
                    if reached.insert(idx) {
                        stack.push(dependent.to_string());
                    }
                }
            }
        }
        reached
            .into_iter()
            .map(|idx| self.nodes[idx].step.id.clone())
            .collect()
    }

    pub fn pending_nodes(&self) -> Vec<StepId> {
        self.nodes_in_state(|state| state == NodeState::Pending)
    }

    pub fn running_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.state == NodeState::Running)
            .count()
    }

    fn nodes_in_state(&self, predicate: impl Fn(NodeState) -> bool) -> Vec<StepId> {
        self.nodes
            .iter()
            .filter(|node| predicate(node.state))
            .map(|node| node.step.id.clone())
            .collect()
    }
}

/// Kahn topological sort; ties are broken by plan order.
///
/// Unknown dependency ids are ignored here. On a cycle, returns the steps
/// that could not be ordered (cycle members and everything downstream).
pub fn topological_order(plan: &Plan) -> Result<Vec<StepId>, Vec<StepId>> {
    let position: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| (step.id.as_str(), idx))
        .collect();

    let mut in_degree = vec![0usize; plan.steps.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); plan.steps.len()];
    for (idx, step) in plan.steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&dep_idx) = position.get(dep.as_str()) {
                in_degree[idx] += 1;
                children[dep_idx].push(idx);
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(plan.steps.len());
    while let Some(idx) = ready.pop_first() {
        order.push(plan.steps[idx].id.clone());
        for &child in &children[idx] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() == plan.steps.len() {
        return Ok(order);
    }
    Err(plan
        .steps
        .iter()
        .enumerate()
        .filter(|(idx, _)| in_degree[*idx] > 0)
        .map(|(_, step)| step.id.clone())
        .collect())
}
