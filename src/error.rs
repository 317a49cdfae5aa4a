//! Failure taxonomy for particle tracking.
//!
//! Library functions return `anyhow::Result`. The conditions below are raised
//! as [`TrackingError`] so callers can classify them with
//! `err.downcast_ref::<TrackingError>()`. Apart from geometric degeneracies,
//! which the tracker first tries to recover from locally, all of them are
//! meant to stop the run.

use std::fmt;

use crate::Tag;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingError {
    /// Face search did not converge within the crossing budget, even after
    /// relocating the particle.
    GeometryDegenerate {
        tag: Tag,
        cell: usize,
        crossings: usize,
    },
    /// Non-physical particle state (non-positive diameter/density, a position
    /// outside its owning cell, ...).
    InvariantViolation(String),
    /// A boundary patch with no registered handler or an unknown patch type.
    UnknownBoundaryCategory { patch: String, category: String },
    /// Writer and reader disagree on the record/field layout.
    SerializationMismatch(String),
    /// A particle left through a processor boundary but cannot be
    /// reconstructed exactly once on the receiving rank.
    MigrationLoss {
        from_rank: usize,
        to_rank: usize,
        detail: String,
    },
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeometryDegenerate {
                tag,
                cell,
                crossings,
            } => write!(
                f,
                "particle {tag} did not converge in cell {cell} after {crossings} face crossings"
            ),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            Self::UnknownBoundaryCategory { patch, category } => write!(
                f,
                "patch '{patch}' has no registered handler for boundary category '{category}'"
            ),
            Self::SerializationMismatch(msg) => write!(f, "serialization mismatch: {msg}"),
            Self::MigrationLoss {
                from_rank,
                to_rank,
                detail,
            } => write!(
                f,
                "particle migration from rank {from_rank} to rank {to_rank} lost: {detail}"
            ),
        }
    }
}

impl std::error::Error for TrackingError {}
