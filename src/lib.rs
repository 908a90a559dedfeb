// ── Nexus Ontology Core ─────────────────────────────────────────────────────
//
// Temporal, auditable registry mapping external market identifiers (tickers,
// FIGI, ISIN, LEI, MIC, free-text names) to stable internal synthetic IDs,
// plus the typed graph of relationships and attributes between entities.
//
// Layers:
//   atoms/   — pure data types, errors, constants (no I/O)
//   engine/  — subsystems: ids, store, registry, edges, attributes,
//              linker, cache, calibration, service facade
//
// The crate is synchronous by design: every public operation holds one store
// connection for its unit of work, so it can be called from blocking code or
// wrapped by an async adapter via spawn_blocking.

pub mod atoms;
pub mod engine;

pub use atoms::error::{OntologyError, OntologyResult};
pub use atoms::types::*;
pub use engine::config::OntologyConfig;
pub use engine::service::OntologyService;
