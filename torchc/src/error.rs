use crate::ir::Op;
use thiserror::Error;

/// Structured failures of verification, refinement and lowering.
///
/// These are wrapped into [anyhow::Error] and can be recovered with
/// `downcast_ref::<Error>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{location}: '{op}' op {message}")]
    Verification {
        location: String,
        op: String,
        message: String,
    },
    #[error("{location}: cannot refine type {from} to {to}")]
    RefinementConflict {
        location: String,
        from: String,
        to: String,
    },
    #[error("{location}: failed to legalize operation '{op}' for the {pipeline} pipeline")]
    NotLegalized {
        location: String,
        op: String,
        pipeline: String,
    },
    #[error("{location}: '{op}' op {message}")]
    Legalization {
        location: String,
        op: String,
        message: String,
    },
    #[error("{location}: '{op}' op attribute out of range: {message}")]
    AttributeRange {
        location: String,
        op: String,
        message: String,
    },
}

impl Error {
    pub fn verification(op: &dyn Op, message: impl Into<String>) -> anyhow::Error {
        Error::Verification {
            location: op.location(),
            op: op.name().to_string(),
            message: message.into(),
        }
        .into()
    }
    pub fn refinement_conflict(op: &dyn Op, from: impl Into<String>, to: impl Into<String>) -> anyhow::Error {
        Error::RefinementConflict {
            location: op.location(),
            from: from.into(),
            to: to.into(),
        }
        .into()
    }
    pub fn not_legalized(op: &dyn Op, pipeline: &str) -> anyhow::Error {
        Error::NotLegalized {
            location: op.location(),
            op: op.name().to_string(),
            pipeline: pipeline.to_string(),
        }
        .into()
    }
    pub fn legalization(op: &dyn Op, message: impl Into<String>) -> anyhow::Error {
        Error::Legalization {
            location: op.location(),
            op: op.name().to_string(),
            message: message.into(),
        }
        .into()
    }
    pub fn attribute_range(op: &dyn Op, message: impl Into<String>) -> anyhow::Error {
        Error::AttributeRange {
            location: op.location(),
            op: op.name().to_string(),
            message: message.into(),
        }
        .into()
    }
}
