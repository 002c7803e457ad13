//! Error surface for the constraint machine.
//!
//! `validate` never panics on malformed atom input; every rejection path
//! produces a [`CMError`] carrying the [`DataPointer`] of the offending
//! instruction (kernel errors are the one exception — see
//! [`CMErrorKind::KernelProcedureError`], which batches).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locates the micro-instruction an error refers to: `(group_index,
/// particle_index)` within the atom as submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataPointer {
    pub group_index: usize,
    pub particle_index: usize,
}

impl DataPointer {
    pub fn new(group_index: usize, particle_index: usize) -> Self {
        Self {
            group_index,
            particle_index,
        }
    }
}

impl std::fmt::Display for DataPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(group {}, particle {})", self.group_index, self.particle_index)
    }
}

/// The kind of validation failure, independent of where it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CMErrorKind {
    #[error("unknown particle class: {0}")]
    UnknownParticle(String),

    #[error("static check failed: {0}")]
    StaticCheckFailed(String),

    #[error("spin conflict: requested {requested:?}, current {current:?}")]
    SpinConflict {
        current: crate::spin::Spin,
        requested: crate::spin::Spin,
    },

    #[error("particle conflict: same particle pushed twice with spin {0:?} in this atom")]
    ParticleConflict(crate::spin::Spin),

    #[error("no transition procedure registered for token {0}")]
    MissingProcedure(String),

    #[error("transition precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("RRI mismatch across a coupled transition")]
    RriMismatch,

    #[error("witness validation failed: {0}")]
    WitnessFailure(String),

    #[error("used-data conflict: {0}")]
    UsedDataConflict(String),

    #[error("unbalanced group: leftover consuming/producing instructions")]
    UnbalancedGroup,

    #[error("{} kernel procedure error(s)", .0.len())]
    KernelProcedureError(Vec<String>),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// A validation failure, with the instruction it was raised against.
///
/// `data_pointer` is `None` only for atom-wide kernel failures, which are
/// not anchored to a single instruction.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}{}", data_pointer.map(|p| format!(" at {p}")).unwrap_or_default())]
pub struct CMError {
    pub kind: CMErrorKind,
    pub data_pointer: Option<DataPointer>,
}

impl CMError {
    pub fn at(kind: CMErrorKind, pointer: DataPointer) -> Self {
        Self {
            kind,
            data_pointer: Some(pointer),
        }
    }

    pub fn kernel(messages: Vec<String>) -> Self {
        Self {
            kind: CMErrorKind::KernelProcedureError(messages),
            data_pointer: None,
        }
    }
}

/// Errors raised while building a machine (C4 → C3 compilation).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BuildError {
    #[error("duplicate particle definition for class {0}")]
    DuplicateDefinition(String),

    #[error("duplicate transition for token {0}")]
    DuplicateTransition(String),

    #[error("address validation failed: {0}")]
    InvalidAddress(String),

    #[error("particle declares no destinations")]
    EmptyDestinations,

    #[error("the machine is already built; no further registration is allowed")]
    AlreadyBuilt,
}
