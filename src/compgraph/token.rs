// src/compgraph/token.rs
//
// Values flowing through a computation graph. Frozen parameters come from
// configuration (serde); everything else is produced at run time.

use crate::error::PipelineError;
use crate::types::{Line, Point2D};
use nalgebra::Matrix3;
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration value fixed for a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Pair([f64; 2]),
    List(Vec<f64>),
}

pub type FrozenParams = BTreeMap<String, Param>;

/// Second-order polynomial x = c[0]*y^2 + c[1]*y + c[2].
pub type Curve = [f64; 3];

#[derive(Debug, Clone)]
pub enum Token {
    Param(Param),
    Image(Mat),
    Transform(Matrix3<f64>),
    Line(Line),
    Lines(Vec<Line>),
    Polygon(Vec<Point2D>),
    Values(Vec<f64>),
    Curve(Option<Curve>),
}

impl Token {
    pub fn kind(&self) -> &'static str {
        match self {
            Token::Param(Param::Bool(_)) => "bool parameter",
            Token::Param(Param::Int(_)) => "integer parameter",
            Token::Param(Param::Float(_)) => "float parameter",
            Token::Param(Param::Pair(_)) => "pair parameter",
            Token::Param(Param::List(_)) => "list parameter",
            Token::Image(_) => "image",
            Token::Transform(_) => "transform",
            Token::Line(_) => "line",
            Token::Lines(_) => "lines",
            Token::Polygon(_) => "polygon",
            Token::Values(_) => "values",
            Token::Curve(_) => "curve",
        }
    }

    pub fn into_image(self, name: &str) -> Result<Mat, PipelineError> {
        match self {
            Token::Image(m) => Ok(m),
            other => Err(type_error(name, "image", &other)),
        }
    }

    pub fn into_line(self, name: &str) -> Result<Line, PipelineError> {
        match self {
            Token::Line(l) => Ok(l),
            other => Err(type_error(name, "line", &other)),
        }
    }
}

impl From<Param> for Token {
    fn from(p: Param) -> Self {
        Token::Param(p)
    }
}

pub(crate) fn type_error(name: &str, expected: &'static str, found: &Token) -> PipelineError {
    PipelineError::TokenType {
        token: name.to_string(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_param_forms() {
        let params: FrozenParams = serde_yaml::from_str(
            "flag: true\nkernel: 5\nalpha: 0.3\nthresh: [20, 100]\nmatrix: [1, 0, 0, 0, 1, 0, 0, 0, 1]\n",
        )
        .unwrap();

        assert_eq!(params["flag"], Param::Bool(true));
        assert_eq!(params["kernel"], Param::Int(5));
        assert_eq!(params["alpha"], Param::Float(0.3));
        assert_eq!(params["thresh"], Param::Pair([20.0, 100.0]));
        assert!(matches!(&params["matrix"], Param::List(v) if v.len() == 9));
    }

    #[test]
    fn test_into_line_type_mismatch() {
        let err = Token::Values(vec![1.0]).into_line("avg_line_left").unwrap_err();
        match err {
            PipelineError::TokenType {
                token,
                expected,
                found,
            } => {
                assert_eq!(token, "avg_line_left");
                assert_eq!(expected, "line");
                assert_eq!(found, "values");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
