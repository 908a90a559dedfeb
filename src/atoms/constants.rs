// ── Ontology Atoms: Constants ───────────────────────────────────────────────
// Named constants for the crate. Collecting them here eliminates magic
// numbers scattered across the resolver and managers.

// ── Resolver confidence ladder ──────────────────────────────────────────────
// Assigned by the candidate generators, in cascade order.
pub const CONFIDENCE_EXACT_TICKER: f64 = 1.0;
pub const CONFIDENCE_EXACT_ALIAS: f64 = 0.95;
pub const CONFIDENCE_CANONICAL: f64 = 0.85;
pub const CONFIDENCE_FUZZY_HIGH: f64 = 0.90;
pub const CONFIDENCE_FUZZY_MEDIUM: f64 = 0.80;
pub const CONFIDENCE_FUZZY_LOW: f64 = 0.70;

/// Operating threshold: below this the resolver quarantines instead of
/// returning a winner. Tunable via ONTOLOGY_LINKER_THRESHOLD.
pub const CONFIDENCE_THRESHOLD: f64 = 0.95;

/// Two top candidates closer than this are reported as ambiguous.
pub const AMBIGUITY_MARGIN: f64 = 0.1;

/// Trigram similarity floor for the fuzzy alias stage (pg_trgm's default
/// match threshold).
pub const FUZZY_SIMILARITY_FLOOR: f64 = 0.3;

/// Per-stage candidate fan-out limit.
pub const CANDIDATE_LIMIT: i64 = 10;

// ── SCD2 change detection ───────────────────────────────────────────────────

/// Absolute tolerance for confidence equality; smaller drifts are not a
/// significant change and do not open a new version.
pub const CONFIDENCE_TOLERANCE: f64 = 0.01;

// ── Pagination & batches ────────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;
pub const MAX_BATCH_SIZE: usize = 1000;

// ── Cache ───────────────────────────────────────────────────────────────────

/// Every cached entity view key starts with this prefix followed by
/// `{syn_id}:{identifiers}:{aliases}`.
pub const CACHE_KEY_PREFIX: &str = "ontology:entity:";

/// Upper bound (exclusive) of the uniform TTL jitter, in seconds.
pub const CACHE_TTL_JITTER_SECS: u64 = 120;
