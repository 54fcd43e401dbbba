// src/compgraph/runner.rs
//
// Binds frozen parameters to a graph once, then evaluates it per call.
// Nodes that depend only on frozen parameters are evaluated at
// construction; the rest run on every `run` into a fresh RunState.

use super::args::NodeArgs;
use super::graph::CompGraph;
use super::token::{FrozenParams, Token};
use crate::error::PipelineError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Name of a token checked against the runner when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputKey(String);

impl OutputKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-call inputs, keyed by token name.
#[derive(Debug, Default)]
pub struct RunInputs(HashMap<String, Token>);

impl RunInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, token: Token) -> Self {
        self.0.insert(name.to_string(), token);
        self
    }
}

pub struct CompGraphRunner {
    graph: Arc<CompGraph>,
    frozen: FrozenParams,
    /// Frozen parameters plus every token derived only from them.
    fixed: HashMap<String, Token>,
    /// Node indices still to evaluate on each run, in order.
    schedule: Vec<usize>,
}

impl CompGraphRunner {
    pub fn new(graph: Arc<CompGraph>, frozen: FrozenParams) -> Result<Self, PipelineError> {
        if let Some(unknown) = frozen.keys().find(|k| !graph.params().contains(*k)) {
            return Err(PipelineError::UnknownToken(unknown.clone()));
        }
        if let Some(unbound) = graph.params().iter().find(|p| !frozen.contains_key(*p)) {
            return Err(PipelineError::UnboundParameter(unbound.clone()));
        }

        let mut fixed: HashMap<String, Token> = frozen
            .iter()
            .map(|(k, v)| (k.clone(), Token::Param(v.clone())))
            .collect();

        let mut schedule = Vec::new();
        for &idx in graph.order() {
            let node = &graph.nodes()[idx];
            if node.inputs.iter().all(|t| fixed.contains_key(t)) {
                debug!("Precomputing frozen node '{}'", node.name);
                let outputs = evaluate(&graph, idx, &fixed, &HashMap::new())?;
                fixed.extend(node.outputs.iter().cloned().zip(outputs));
            } else {
                schedule.push(idx);
            }
        }

        Ok(Self {
            graph,
            frozen,
            fixed,
            schedule,
        })
    }

    pub fn graph(&self) -> &CompGraph {
        &self.graph
    }

    /// Whether `token` is available without running (frozen or precomputed).
    pub fn is_fixed(&self, token: &str) -> bool {
        self.fixed.contains_key(token)
    }

    /// Validate an output name up front so lookups cannot miss later.
    pub fn output(&self, name: &str) -> Result<OutputKey, PipelineError> {
        if self.graph.is_produced(name) || self.is_fixed(name) {
            Ok(OutputKey(name.to_string()))
        } else {
            Err(PipelineError::UnknownToken(name.to_string()))
        }
    }

    /// Evaluate the graph for one set of per-call inputs.
    pub fn run(&self, inputs: RunInputs) -> Result<RunState<'_>, PipelineError> {
        let RunInputs(mut values) = inputs;

        if let Some(extra) = values.keys().find(|k| !self.graph.inputs().contains(*k)) {
            return Err(PipelineError::UnknownInput(extra.clone()));
        }
        if let Some(missing) = self.graph.inputs().iter().find(|k| !values.contains_key(*k)) {
            return Err(PipelineError::MissingInput(missing.clone()));
        }

        for &idx in &self.schedule {
            let outputs = evaluate(&self.graph, idx, &self.fixed, &values)?;
            let node = &self.graph.nodes()[idx];
            values.extend(node.outputs.iter().cloned().zip(outputs));
        }

        Ok(RunState {
            runner: self,
            values,
        })
    }

    /// Token names grouped by how they are bound: (inputs, frozen, precomputed).
    pub(crate) fn token_classes(&self) -> (BTreeSet<&str>, BTreeSet<&str>, BTreeSet<&str>) {
        let inputs = self.graph.inputs().iter().map(String::as_str).collect();
        let frozen = self.frozen.keys().map(String::as_str).collect();
        let precomputed = self
            .fixed
            .keys()
            .map(String::as_str)
            .filter(|k| !self.frozen.contains_key(*k))
            .collect();
        (inputs, frozen, precomputed)
    }
}

fn evaluate(
    graph: &CompGraph,
    idx: usize,
    fixed: &HashMap<String, Token>,
    values: &HashMap<String, Token>,
) -> Result<Vec<Token>, PipelineError> {
    let node = &graph.nodes()[idx];

    let mut args = Vec::with_capacity(node.inputs.len());
    for name in &node.inputs {
        let token = values
            .get(name)
            .or_else(|| fixed.get(name))
            .ok_or_else(|| PipelineError::MissingInput(name.clone()))?;
        args.push(token);
    }

    let outputs = (node.func)(&NodeArgs::new(&node.name, &node.inputs, args))?;
    if outputs.len() != node.outputs.len() {
        return Err(PipelineError::OutputArity {
            node: node.name.clone(),
            expected: node.outputs.len(),
            got: outputs.len(),
        });
    }
    Ok(outputs)
}

/// Values of one `run`. Owned by the caller and dropped after use.
pub struct RunState<'r> {
    runner: &'r CompGraphRunner,
    values: HashMap<String, Token>,
}

impl<'r> RunState<'r> {
    pub fn get(&self, key: &OutputKey) -> Result<&Token, PipelineError> {
        self.values
            .get(&key.0)
            .or_else(|| self.runner.fixed.get(&key.0))
            .ok_or_else(|| PipelineError::MissingOutput(key.0.clone()))
    }

    /// Move a per-run value out; precomputed values are cloned.
    pub fn take(&mut self, key: &OutputKey) -> Result<Token, PipelineError> {
        if let Some(token) = self.values.remove(&key.0) {
            return Ok(token);
        }
        self.runner
            .fixed
            .get(&key.0)
            .cloned()
            .ok_or_else(|| PipelineError::MissingOutput(key.0.clone()))
    }
}
