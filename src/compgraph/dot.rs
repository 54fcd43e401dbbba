// src/compgraph/dot.rs
//
// Graphviz rendering of a bound graph. Tokens are ellipses, functions are
// boxes; edges follow the data flow token -> function -> token.

use super::runner::CompGraphRunner;
use std::collections::BTreeSet;
use std::fmt::Write;

const FROZEN_FILL: &str = "#d9e8fb";
const PRECOMPUTED_FILL: &str = "#e4f4dc";
const INPUT_FILL: &str = "#fde9c9";
const COMPUTED_FILL: &str = "#ffffff";
const FUNCTION_FILL: &str = "#eeeeee";

impl CompGraphRunner {
    pub fn to_dot(&self) -> String {
        let graph = self.graph();
        let (inputs, frozen, precomputed) = self.token_classes();

        let tokens: BTreeSet<&str> = graph
            .nodes()
            .iter()
            .flat_map(|n| n.inputs.iter().chain(n.outputs.iter()))
            .map(String::as_str)
            .chain(inputs.iter().copied())
            .collect();

        let mut out = String::new();
        out.push_str("digraph pipeline {\n");
        out.push_str("  rankdir=TB;\n");
        out.push_str("  node [fontname=\"Helvetica\", fontsize=10];\n");

        for token in &tokens {
            let fill = if inputs.contains(token) {
                INPUT_FILL
            } else if frozen.contains(token) {
                FROZEN_FILL
            } else if precomputed.contains(token) {
                PRECOMPUTED_FILL
            } else {
                COMPUTED_FILL
            };
            let _ = writeln!(
                out,
                "  \"t:{token}\" [label=\"{token}\", shape=ellipse, style=filled, fillcolor=\"{fill}\"];"
            );
        }

        for &idx in graph.order() {
            let node = &graph.nodes()[idx];
            let _ = writeln!(
                out,
                "  \"f:{name}\" [label=\"{name}\", shape=box, style=\"rounded,filled\", fillcolor=\"{FUNCTION_FILL}\"];",
                name = node.name
            );
            for input in &node.inputs {
                let _ = writeln!(out, "  \"t:{input}\" -> \"f:{}\";", node.name);
            }
            for output in &node.outputs {
                let _ = writeln!(out, "  \"f:{}\" -> \"t:{output}\";", node.name);
            }
        }

        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::compgraph::{CompGraph, CompGraphRunner, FrozenParams, Node, Param, Token};
    use std::sync::Arc;

    #[test]
    fn test_dot_lists_tokens_and_edges() {
        let graph = CompGraph::new(
            vec![
                Node::new("rows", &["n_rows"], &["plot_y"], |args| {
                    let n = args.int(0)?;
                    Ok(vec![Token::Values((0..n).map(|v| v as f64).collect())])
                }),
                Node::new("sample", &["image", "plot_y"], &["samples"], |args| {
                    Ok(vec![args.token(1).clone()])
                }),
            ],
            &["image"],
        )
        .unwrap();
        let mut params = FrozenParams::new();
        params.insert("n_rows".into(), Param::Int(4));
        let runner = CompGraphRunner::new(Arc::new(graph), params).unwrap();

        let dot = runner.to_dot();
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("\"t:image\" -> \"f:sample\";"));
        assert!(dot.contains("\"f:rows\" -> \"t:plot_y\";"));
        assert!(dot.contains("\"t:n_rows\" [label=\"n_rows\", shape=ellipse, style=filled, fillcolor=\"#d9e8fb\"];"));
        assert!(dot.contains("\"t:plot_y\" [label=\"plot_y\", shape=ellipse, style=filled, fillcolor=\"#e4f4dc\"];"));
        assert!(dot.contains("\"f:sample\" [label=\"sample\", shape=box"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
