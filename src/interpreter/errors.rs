//! Runtime error types for the story interpreter
//!
//! [`RuntimeError`] covers everything that can go wrong after parsing.
//! Address and range errors are fatal to the current call but leave the
//! session state intact. Evaluation errors are softer: inside narrative
//! text the failed expression renders as empty, and inside a condition
//! it counts as false; they only surface directly from assignments.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A divert target that is neither a knot, a stitch, nor a label in
    /// scope.
    #[error("unknown divert target `{target}` (from {knot}.{stitch})")]
    BadAddress {
        target: String,
        knot: String,
        stitch: String,
    },

    /// `choose` with an index outside `[1, len]`.
    #[error("choice index {index} out of range 1..={len}")]
    OutOfRange { index: usize, len: usize },

    /// The expression sandbox failed; carries the offending source.
    #[error("failed to evaluate `{expr}`: {reason}")]
    Evaluation { expr: String, reason: String },

    /// `~` assignment targeting a `CONST` name.
    #[error("cannot assign to constant `{name}`")]
    ConstAssignment { name: String },

    /// Snapshot version the story cannot accept: newer than the story,
    /// or older with no migrator able to bridge it.
    #[error("snapshot tree version {snapshot} incompatible with story tree version {story}")]
    Migration { snapshot: u32, story: u32 },

    /// Snapshot (de)serialization failure.
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}
