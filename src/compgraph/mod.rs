// src/compgraph/mod.rs
//
// Minimal dependency-graph execution engine. A graph is a set of named
// functions; frozen parameters are bound once per session, per-call inputs
// on every run.

mod args;
mod dot;
mod graph;
mod runner;
mod token;

pub use args::NodeArgs;
pub use graph::{CompGraph, Node, NodeFn};
pub use runner::{CompGraphRunner, OutputKey, RunInputs, RunState};
pub use token::{Curve, FrozenParams, Param, Token};
