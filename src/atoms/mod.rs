// ── Ontology Atoms ──────────────────────────────────────────────────────────
// Pure data types, error definitions, and named constants.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

pub mod constants;
pub mod error;
pub mod types;
