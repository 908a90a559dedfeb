// ── Ontology Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the ontology core, built with `thiserror`.
//
// Design rules:
//   • Variants follow the stable taxonomy consumers match on: InvalidArgument,
//     NotFound, IdentifierCollision, EdgeConflict, AttributeConflict,
//     Storage, Unavailable.
//   • `#[from]` wires rusqlite / serde_json conversions automatically.
//   • Store-level uniqueness violations are re-classified by the component
//     that issued the statement (see `is_unique_violation`), never surfaced
//     as raw Storage errors.

use thiserror::Error;

// ── Primary error enum ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OntologyError {
    /// Malformed syn_id, empty name, out-of-range confidence, unknown type
    /// or status, mismatched value-for-datatype, bad pagination bounds.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup or as-of resolution with no row covering the requested instant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `(scheme, value)` already claimed by a different entity.
    #[error("Identifier {scheme}:{value} already assigned to {owner}")]
    IdentifierCollision {
        scheme: String,
        value: String,
        owner: String,
    },

    /// Open-version uniqueness violation on `(src, dst, rel_type)` under
    /// concurrent mutation.
    #[error("Edge conflict: {0}")]
    EdgeConflict(String),

    /// Open-version uniqueness violation on `(syn_id, key)` under concurrent
    /// mutation.
    #[error("Attribute conflict: {0}")]
    AttributeConflict(String),

    /// Unexpected persistence failure, including statement timeouts.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Pool exhaustion or store reachability failure.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

pub type OntologyResult<T> = Result<T, OntologyError>;

// ── Conversions ─────────────────────────────────────────────────────────────

impl From<rusqlite::Error> for OntologyError {
    fn from(e: rusqlite::Error) -> Self {
        if is_interrupt(&e) {
            OntologyError::Storage(format!("statement timeout: {e}"))
        } else {
            OntologyError::Storage(e.to_string())
        }
    }
}

impl From<serde_json::Error> for OntologyError {
    fn from(e: serde_json::Error) -> Self {
        OntologyError::Storage(format!("serialization: {e}"))
    }
}

impl From<r2d2::Error> for OntologyError {
    fn from(e: r2d2::Error) -> Self {
        OntologyError::Unavailable(format!("connection pool: {e}"))
    }
}

// ── Store failure classification ────────────────────────────────────────────

/// True when the error is a UNIQUE constraint violation. Components use this
/// to translate the open-version backstop constraints into their own
/// conflict kind (IdentifierCollision / EdgeConflict / AttributeConflict).
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// True when the statement was interrupted by the per-checkout deadline.
fn is_interrupt(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::OperationInterrupted
    )
}
