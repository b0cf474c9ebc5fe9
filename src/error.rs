//! Crate-wide error type.
//!
//! Tensor arithmetic keeps the habit of panicking on shape mismatches inside
//! an expression (operators cannot return `Result`), while everything that
//! crosses an API boundary (argument counts, objective lookups, parsing,
//! configuration) reports an [`Error`].

use thiserror::Error;

/// Errors produced while building, differentiating or optimizing objectives.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("shape {shape:?} is incompatible with {len} data elements")]
    ShapeData { shape: Vec<usize>, len: usize },

    #[error("expected a single-element tensor, got shape {0:?}")]
    NotScalar(Vec<usize>),

    #[error("upstream gradient has shape {got:?}, output has shape {expected:?}")]
    SeedShape { expected: Vec<usize>, got: Vec<usize> },

    #[error("objective `{name}` takes {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("expected {expected} values, got {got}")]
    ValueCount { expected: usize, got: usize },

    #[error("unknown objective `{0}`")]
    UnknownObjective(String),

    #[error("unknown shape `{0}`")]
    UnknownShape(String),

    #[error("shape `{0}` failed validation")]
    InvalidShape(String),

    #[error("shape name `{0}` is used more than once")]
    DuplicateShape(String),

    #[error("optimization problem has no objective terms")]
    EmptyProblem,

    #[error("tensor parse error: {0}")]
    Parse(&'static str),

    #[error("invalid training config: {0}")]
    Config(&'static str),
}

/// Shorthand used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
