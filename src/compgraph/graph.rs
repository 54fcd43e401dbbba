// src/compgraph/graph.rs
//
// Static structure of a computation graph: named functions wired together
// by the tokens they consume and produce. Validated once at construction.

use super::args::NodeArgs;
use super::token::Token;
use crate::error::PipelineError;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

pub type NodeFn = Arc<dyn Fn(&NodeArgs<'_>) -> Result<Vec<Token>, PipelineError> + Send + Sync>;

#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub(crate) func: NodeFn,
}

impl Node {
    pub fn new<F>(name: &str, inputs: &[&str], outputs: &[&str], func: F) -> Self
    where
        F: Fn(&NodeArgs<'_>) -> Result<Vec<Token>, PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Validated, topologically ordered computation graph.
#[derive(Debug, Clone)]
pub struct CompGraph {
    nodes: Vec<Node>,
    order: Vec<usize>,
    inputs: BTreeSet<String>,
    params: BTreeSet<String>,
    producers: HashMap<String, usize>,
}

impl CompGraph {
    /// `inputs` names the tokens supplied on every run. Any other token
    /// that is consumed but never produced is a frozen parameter.
    pub fn new(nodes: Vec<Node>, inputs: &[&str]) -> Result<Self, PipelineError> {
        let inputs: BTreeSet<String> = inputs.iter().map(|s| s.to_string()).collect();

        let mut names = BTreeSet::new();
        let mut producers: HashMap<String, usize> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if !names.insert(node.name.clone()) {
                return Err(PipelineError::DuplicateNode(node.name.clone()));
            }
            for out in &node.outputs {
                if inputs.contains(out) {
                    return Err(PipelineError::ProducedInput(out.clone()));
                }
                if let Some(&first) = producers.get(out) {
                    return Err(PipelineError::DuplicateProducer {
                        token: out.clone(),
                        first: nodes[first].name.clone(),
                        second: node.name.clone(),
                    });
                }
                producers.insert(out.clone(), idx);
            }
        }

        let params: BTreeSet<String> = nodes
            .iter()
            .flat_map(|n| n.inputs.iter())
            .filter(|t| !producers.contains_key(*t) && !inputs.contains(*t))
            .cloned()
            .collect();

        let order = topological_order(&nodes, &producers)?;

        Ok(Self {
            nodes,
            order,
            inputs,
            params,
            producers,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node indices in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn inputs(&self) -> &BTreeSet<String> {
        &self.inputs
    }

    pub fn params(&self) -> &BTreeSet<String> {
        &self.params
    }

    pub fn producer(&self, token: &str) -> Option<&Node> {
        self.producers.get(token).map(|&i| &self.nodes[i])
    }

    pub fn is_produced(&self, token: &str) -> bool {
        self.producer(token).is_some()
    }
}

/// Kahn's algorithm over node -> node dependencies.
fn topological_order(
    nodes: &[Node],
    producers: &HashMap<String, usize>,
) -> Result<Vec<usize>, PipelineError> {
    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (idx, node) in nodes.iter().enumerate() {
        let deps: BTreeSet<usize> = node
            .inputs
            .iter()
            .filter_map(|t| producers.get(t).copied())
            .collect();
        indegree[idx] = deps.len();
        for dep in deps {
            dependents[dep].push(idx);
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        for &next in &dependents[idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .find(|&i| indegree[i] > 0)
            .map(|i| nodes[i].name.clone())
            .unwrap_or_default();
        return Err(PipelineError::Cycle(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(name: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        let n = outputs.len();
        Node::new(name, inputs, outputs, move |args| {
            Ok((0..n).map(|_| args.token(0).clone()).collect())
        })
    }

    #[test]
    fn test_order_respects_dependencies() {
        // Declared out of order on purpose.
        let graph = CompGraph::new(
            vec![
                passthrough("c", &["b_out"], &["c_out"]),
                passthrough("a", &["x"], &["a_out"]),
                passthrough("b", &["a_out", "k"], &["b_out"]),
            ],
            &["x"],
        )
        .unwrap();

        let names: Vec<&str> = graph
            .order()
            .iter()
            .map(|&i| graph.nodes()[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(graph.params().contains("k"));
        assert_eq!(graph.params().len(), 1);
        assert_eq!(graph.producer("b_out").unwrap().name, "b");
    }

    #[test]
    fn test_cycle_rejected() {
        let err = CompGraph::new(
            vec![
                passthrough("a", &["b_out"], &["a_out"]),
                passthrough("b", &["a_out"], &["b_out"]),
            ],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cycle(_)));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let err = CompGraph::new(
            vec![
                passthrough("a", &["x"], &["t"]),
                passthrough("b", &["x"], &["t"]),
            ],
            &["x"],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateProducer { ref token, .. } if token == "t"
        ));
    }

    #[test]
    fn test_duplicate_node_and_produced_input_rejected() {
        let err = CompGraph::new(
            vec![passthrough("a", &["x"], &["t"]), passthrough("a", &["t"], &["u"])],
            &["x"],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateNode(_)));

        let err = CompGraph::new(vec![passthrough("a", &["t"], &["x"])], &["x"]).unwrap_err();
        assert!(matches!(err, PipelineError::ProducedInput(_)));
    }
}
