// src/compgraph/args.rs

use super::token::{type_error, Curve, Param, Token};
use crate::error::PipelineError;
use crate::types::{Line, Point2D};
use nalgebra::Matrix3;
use opencv::core::Mat;

/// Positional view of a node's input tokens with typed accessors.
pub struct NodeArgs<'a> {
    node: &'a str,
    names: &'a [String],
    values: Vec<&'a Token>,
}

impl<'a> NodeArgs<'a> {
    pub(crate) fn new(node: &'a str, names: &'a [String], values: Vec<&'a Token>) -> Self {
        Self {
            node,
            names,
            values,
        }
    }

    pub fn token(&self, i: usize) -> &'a Token {
        self.values[i]
    }

    /// Build a `NodeFailed` error attributed to this node.
    pub fn fail(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::NodeFailed {
            node: self.node.to_string(),
            reason: reason.into(),
        }
    }

    fn mismatch(&self, i: usize, expected: &'static str) -> PipelineError {
        type_error(&self.names[i], expected, self.token(i))
    }

    pub fn image(&self, i: usize) -> Result<&'a Mat, PipelineError> {
        match self.token(i) {
            Token::Image(m) => Ok(m),
            _ => Err(self.mismatch(i, "image")),
        }
    }

    pub fn transform(&self, i: usize) -> Result<&'a Matrix3<f64>, PipelineError> {
        match self.token(i) {
            Token::Transform(m) => Ok(m),
            _ => Err(self.mismatch(i, "transform")),
        }
    }

    pub fn line(&self, i: usize) -> Result<Line, PipelineError> {
        match self.token(i) {
            Token::Line(l) => Ok(*l),
            _ => Err(self.mismatch(i, "line")),
        }
    }

    pub fn lines(&self, i: usize) -> Result<&'a [Line], PipelineError> {
        match self.token(i) {
            Token::Lines(l) => Ok(l),
            _ => Err(self.mismatch(i, "lines")),
        }
    }

    pub fn polygon(&self, i: usize) -> Result<&'a [Point2D], PipelineError> {
        match self.token(i) {
            Token::Polygon(p) => Ok(p),
            _ => Err(self.mismatch(i, "polygon")),
        }
    }

    pub fn values(&self, i: usize) -> Result<&'a [f64], PipelineError> {
        match self.token(i) {
            Token::Values(v) => Ok(v),
            _ => Err(self.mismatch(i, "values")),
        }
    }

    pub fn curve(&self, i: usize) -> Result<Option<Curve>, PipelineError> {
        match self.token(i) {
            Token::Curve(c) => Ok(*c),
            _ => Err(self.mismatch(i, "curve")),
        }
    }

    pub fn float(&self, i: usize) -> Result<f64, PipelineError> {
        match self.token(i) {
            Token::Param(Param::Float(v)) => Ok(*v),
            Token::Param(Param::Int(v)) => Ok(*v as f64),
            _ => Err(self.mismatch(i, "float parameter")),
        }
    }

    pub fn int(&self, i: usize) -> Result<i64, PipelineError> {
        match self.token(i) {
            Token::Param(Param::Int(v)) => Ok(*v),
            _ => Err(self.mismatch(i, "integer parameter")),
        }
    }

    pub fn pair(&self, i: usize) -> Result<[f64; 2], PipelineError> {
        match self.token(i) {
            Token::Param(Param::Pair(p)) => Ok(*p),
            _ => Err(self.mismatch(i, "pair parameter")),
        }
    }

    /// List parameter; a two-element list deserializes as a pair and is
    /// accepted here too.
    pub fn list(&self, i: usize) -> Result<Vec<f64>, PipelineError> {
        match self.token(i) {
            Token::Param(Param::List(v)) => Ok(v.clone()),
            Token::Param(Param::Pair(p)) => Ok(p.to_vec()),
            _ => Err(self.mismatch(i, "list parameter")),
        }
    }
}
