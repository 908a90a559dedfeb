// ── Ontology Atoms: Pure Data Types ─────────────────────────────────────────
// All plain struct/enum definitions with no logic beyond string codecs.
//
// String forms match the persisted representation exactly: entity types and
// statuses are stored as their SCREAMING_SNAKE names, timestamps as
// fixed-width RFC-3339 UTC text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ═══════════════════════════════════════════════════════════════════════════
// Entities
// ═══════════════════════════════════════════════════════════════════════════

/// The closed set of entity types. Each maps to a fixed two-letter syn_id
/// prefix (see `engine::ids`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Company,
    Security,
    Exchange,
    Index,
    Person,
    Org,
    Sector,
    Theme,
    Commodity,
    Fx,
}

impl EntityType {
    pub const ALL: [EntityType; 10] = [
        EntityType::Company,
        EntityType::Security,
        EntityType::Exchange,
        EntityType::Index,
        EntityType::Person,
        EntityType::Org,
        EntityType::Sector,
        EntityType::Theme,
        EntityType::Commodity,
        EntityType::Fx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "COMPANY",
            EntityType::Security => "SECURITY",
            EntityType::Exchange => "EXCHANGE",
            EntityType::Index => "INDEX",
            EntityType::Person => "PERSON",
            EntityType::Org => "ORG",
            EntityType::Sector => "SECTOR",
            EntityType::Theme => "THEME",
            EntityType::Commodity => "COMMODITY",
            EntityType::Fx => "FX",
        }
    }

    pub fn parse(s: &str) -> Option<EntityType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Active,
    Inactive,
    Merged,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "ACTIVE",
            EntityStatus::Inactive => "INACTIVE",
            EntityStatus::Merged => "MERGED",
        }
    }

    pub fn parse(s: &str) -> Option<EntityStatus> {
        match s {
            "ACTIVE" => Some(EntityStatus::Active),
            "INACTIVE" => Some(EntityStatus::Inactive),
            "MERGED" => Some(EntityStatus::Merged),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered entity. `syn_id` and `entity_type` are immutable after
/// creation; entities are never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub syn_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub status: EntityStatus,
    /// Prior syn_ids this entity supersedes (MERGED lineage).
    #[serde(default)]
    pub replaces: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Identifiers & aliases
// ═══════════════════════════════════════════════════════════════════════════

/// One temporal version of an external identifier mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierRecord {
    pub scheme: String,
    pub value: String,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

/// As-of resolution of `(scheme, value)` to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIdentifier {
    pub syn_id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub status: EntityStatus,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

/// Alternative name for an entity. Aliases accumulate; they are not
/// temporally versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasRecord {
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Full-text search hit over ACTIVE entity names.
#[derive(Debug, Clone, Serialize)]
pub struct NameSearchHit {
    pub syn_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub status: EntityStatus,
    /// Higher is more relevant.
    pub rank: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Edges
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Out,
    In,
    Both,
}

/// Write request for `add_edge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeInput {
    pub src_syn_id: String,
    pub dst_syn_id: String,
    pub rel_type: String,
    pub source: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    /// Defaults to `observed_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
}

/// One temporal version of a directed typed relationship, joined with the
/// related entity's name and type for the queried direction.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRecord {
    pub src_syn_id: String,
    pub dst_syn_id: String,
    pub rel_type: String,
    pub attrs: Option<Value>,
    pub source: String,
    pub evidence: Option<String>,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
    pub related_syn_id: String,
    pub related_name: Option<String>,
    pub related_type: Option<EntityType>,
}

/// Paged edge query parameters. `asof` only applies to historical reads
/// (`active_only = false`); without it the full history is returned.
#[derive(Debug, Clone)]
pub struct EdgeQuery {
    pub syn_id: String,
    pub direction: EdgeDirection,
    pub rel_type: Option<String>,
    pub active_only: bool,
    pub asof: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl EdgeQuery {
    pub fn outgoing(syn_id: &str) -> Self {
        EdgeQuery {
            syn_id: syn_id.to_string(),
            direction: EdgeDirection::Out,
            rel_type: None,
            active_only: true,
            asof: None,
            limit: crate::atoms::constants::DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeTypeStats {
    pub rel_type: String,
    pub total: i64,
    pub active: i64,
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeStats {
    pub by_type: Vec<EdgeTypeStats>,
    pub total: i64,
    pub total_active: i64,
    pub historical: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Attributes
// ═══════════════════════════════════════════════════════════════════════════

/// Dynamically typed attribute value. The persistence layer keeps one slot
/// per variant and checks that exactly one is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Json(Value),
}

impl AttributeValue {
    pub fn datatype(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "STRING",
            AttributeValue::Number(_) => "NUMBER",
            AttributeValue::Json(_) => "JSON",
        }
    }
}

/// Write request for `upsert_attribute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeInput {
    pub syn_id: String,
    pub key: String,
    pub value: AttributeValue,
    pub source: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
}

/// One temporal version of an entity attribute.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeRecord {
    pub key: String,
    pub value: AttributeValue,
    pub source: String,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════════

/// How a resolution candidate was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    Ticker,
    Alias,
    AliasFuzzy,
    CanonicalName,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Ticker => "TICKER",
            MatchMethod::Alias => "ALIAS",
            MatchMethod::AliasFuzzy => "ALIAS_FUZZY",
            MatchMethod::CanonicalName => "CANONICAL_NAME",
        }
    }
}

/// A possible resolution target with the reason it was proposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub syn_id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub matched_via: MatchMethod,
    pub matched_value: String,
    pub confidence: f64,
}

/// Outcome of `resolve_or_quarantine`: either a confident syn_id or the id
/// of the quarantine record created for human review.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Resolution {
    Resolved { syn_id: String, candidate: Candidate },
    Quarantined { quarantine_id: i64 },
}

/// Append-only record of an unresolved mention awaiting manual binding.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineItem {
    pub id: i64,
    pub raw_identifier: String,
    pub scheme: Option<String>,
    pub context: Option<Value>,
    pub reason: String,
    pub ingested_at: DateTime<Utc>,
    pub resolved_syn_id: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Views, batches, stats
// ═══════════════════════════════════════════════════════════════════════════

/// Cacheable read-model of an entity; identifier and alias sections are
/// present according to the requested view shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityView {
    pub syn_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub status: EntityStatus,
    pub replaces: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Vec<IdentifierRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<AliasRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub detail: String,
}

/// Result of a batch write. `rolled_back = true` means no item was applied
/// and `errors` explains why, per offending index.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<BatchItemError>,
    pub rolled_back: bool,
    pub total_processed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_keys: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_used_bytes: usize,
}

/// Aggregate registry counters surfaced by the facade.
#[derive(Debug, Clone, Serialize)]
pub struct OntologyStats {
    pub entities_total: i64,
    pub entities_active: i64,
    pub identifiers_open: i64,
    pub aliases_total: i64,
    pub quarantine_unresolved: i64,
    pub edges: EdgeStats,
    pub cache: CacheStats,
}
