use thiserror::Error;

use crate::sharding::TilingError;

/// Represents errors that can occur while analyzing HLO programs. All of them are deterministic structural failures
/// that indicate a malformed or inconsistent program, and so none of them are worth retrying.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("got tuple sharding '{sharding}' for non-tuple shape '{shape}'")]
    ShapeMismatch { sharding: String, shape: String },

    #[error(
        "got mismatched tuple sharding size ({sharding_arity}) and shape tuple size ({shape_arity}) \
        (sharding: '{sharding}', shape: '{shape}')"
    )]
    ArityMismatch { sharding_arity: usize, shape_arity: usize, sharding: String, shape: String },

    #[error("failed to tile shape '{shape}' using sharding '{sharding}': {source}")]
    Tiling { shape: String, sharding: String, source: TilingError },

    #[error("got invalid parameter number {parameter_number}, expected {parameter_count} parameters")]
    InvalidParameterIndex { parameter_number: i64, parameter_count: usize },

    #[error("found multiple parameter instructions with parameter number {parameter_number}")]
    DuplicateParameterIndex { parameter_number: usize },

    #[error("found multiple root instructions with id {root_id}")]
    MultipleRoots { root_id: i64 },

    #[error("couldn't find parameter {parameter_number}")]
    MissingParameter { parameter_number: usize },

    #[error("couldn't find root instruction")]
    MissingRoot,

    #[error("the program has no program shape")]
    MissingProgramShape,

    #[error("couldn't find entry computation with id {entry_computation_id}")]
    MissingEntryComputation { entry_computation_id: i64 },

    #[error("unexpected parameter number {parameter_number} in alias config with tupled inputs")]
    UnexpectedParameterNumber { parameter_number: i64 },

    #[error(
        "unexpected parameter {parameter} in alias config with {parameter_count} parameters \
        (tupled inputs: {tuple_inputs})"
    )]
    IndexOutOfRange { parameter: i64, parameter_count: usize, tuple_inputs: bool },

    /// Raised when an analysis is invoked in a way that violates its calling contract (e.g., requesting tupled inputs
    /// for a computation that does not take a single tuple parameter). This is a bug in the caller rather than a
    /// problem with the program being analyzed. Use [`Error::is_precondition_violation`] to tell the two apart.
    #[error("precondition violation: {message}")]
    PreconditionViolation { message: String },

    #[error("output shape index {output_index} is already aliased with an input")]
    DuplicateOutputAlias { output_index: String },

    #[error("malformed {proto} proto: {message}")]
    MalformedProto { proto: &'static str, message: String },

    #[error("unsupported sharding: {message}")]
    UnsupportedSharding { message: String },
}

impl Error {
    /// Creates a new [`Error::PreconditionViolation`].
    pub fn precondition_violation<M: Into<String>>(message: M) -> Self {
        Self::PreconditionViolation { message: message.into() }
    }

    /// Creates a new [`Error::MalformedProto`].
    pub fn malformed_proto<M: Into<String>>(proto: &'static str, message: M) -> Self {
        Self::MalformedProto { proto, message: message.into() }
    }

    /// Returns `true` if this error is an [`Error::PreconditionViolation`] (i.e., a caller contract violation as
    /// opposed to a problem with the analyzed program).
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Self::PreconditionViolation { .. })
    }
}
