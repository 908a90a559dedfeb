// ── Store: Schema & Migrations ──────────────────────────────────────────────
//
// One row per version in the temporal tables; `valid_to IS NULL` marks the
// open (currently effective) row. The partial unique indexes are the
// authoritative enforcement of the one-open-version invariants:
//
//   identifiers: at most one open row per (scheme, value)
//   edges:       at most one open row per (src, dst, rel_type)
//   attributes:  at most one open row per (syn_id, key)
//
// All statements are idempotent (CREATE IF NOT EXISTS), so migrations run on
// every store open.

use log::info;
use rusqlite::Connection;

use crate::atoms::error::OntologyResult;

/// Run all ontology migrations. Safe to call repeatedly.
pub fn run_migrations(conn: &Connection) -> OntologyResult<()> {
    info!("[store] Running ontology schema migrations");
    conn.execute_batch(ONTOLOGY_SCHEMA)?;
    Ok(())
}

const ONTOLOGY_SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Entity registry
    -- Entities are never physically deleted; status transitions only.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS entity_registry (
        syn_id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ACTIVE'
            CHECK (status IN ('ACTIVE', 'INACTIVE', 'MERGED')),

        -- MERGED lineage: JSON array of superseded syn_ids
        replaces_syn_id TEXT NOT NULL DEFAULT '[]',

        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entity_type ON entity_registry(type);
    CREATE INDEX IF NOT EXISTS idx_entity_status ON entity_registry(status);

    -- FTS5 index over canonical names (external content + sync triggers)
    CREATE VIRTUAL TABLE IF NOT EXISTS entity_name_fts USING fts5(
        syn_id UNINDEXED,
        canonical_name,
        content=entity_registry,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS entity_fts_insert AFTER INSERT ON entity_registry
    BEGIN
        INSERT INTO entity_name_fts(rowid, syn_id, canonical_name)
        VALUES (NEW.rowid, NEW.syn_id, NEW.canonical_name);
    END;

    CREATE TRIGGER IF NOT EXISTS entity_fts_delete AFTER DELETE ON entity_registry
    BEGIN
        INSERT INTO entity_name_fts(entity_name_fts, rowid, syn_id, canonical_name)
        VALUES ('delete', OLD.rowid, OLD.syn_id, OLD.canonical_name);
    END;

    CREATE TRIGGER IF NOT EXISTS entity_fts_update AFTER UPDATE ON entity_registry
    BEGIN
        INSERT INTO entity_name_fts(entity_name_fts, rowid, syn_id, canonical_name)
        VALUES ('delete', OLD.rowid, OLD.syn_id, OLD.canonical_name);
        INSERT INTO entity_name_fts(rowid, syn_id, canonical_name)
        VALUES (NEW.rowid, NEW.syn_id, NEW.canonical_name);
    END;

    -- ═══════════════════════════════════════════════════════════════
    -- Identifiers (temporal, SCD2)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS identifiers (
        syn_id TEXT NOT NULL REFERENCES entity_registry(syn_id),
        scheme TEXT NOT NULL,
        value TEXT NOT NULL,
        valid_from TEXT NOT NULL,
        valid_to TEXT,
        PRIMARY KEY (syn_id, scheme, valid_from)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uq_identifiers_open
        ON identifiers(scheme, value) WHERE valid_to IS NULL;
    CREATE INDEX IF NOT EXISTS idx_identifiers_lookup
        ON identifiers(scheme, value);
    CREATE INDEX IF NOT EXISTS idx_identifiers_entity
        ON identifiers(syn_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Aliases (append-only, no temporal versioning)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS aliases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        syn_id TEXT NOT NULL REFERENCES entity_registry(syn_id),
        alias TEXT NOT NULL,
        lang TEXT,
        source TEXT,
        confidence REAL NOT NULL DEFAULT 1.0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_aliases_entity ON aliases(syn_id);
    CREATE INDEX IF NOT EXISTS idx_aliases_lower ON aliases(LOWER(alias));

    -- ═══════════════════════════════════════════════════════════════
    -- Edges (directed, typed, temporal)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        src_syn_id TEXT NOT NULL,
        dst_syn_id TEXT NOT NULL,
        rel_type TEXT NOT NULL,

        attrs TEXT,              -- JSON
        source TEXT NOT NULL,
        evidence TEXT,
        confidence REAL NOT NULL,

        valid_from TEXT NOT NULL,
        valid_to TEXT,
        observed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,

        CHECK (src_syn_id <> dst_syn_id)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uq_edges_open
        ON edges(src_syn_id, dst_syn_id, rel_type) WHERE valid_to IS NULL;
    CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src_syn_id);
    CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_syn_id);
    CREATE INDEX IF NOT EXISTS idx_edges_rel ON edges(rel_type);

    -- ═══════════════════════════════════════════════════════════════
    -- Attributes (per-entity, keyed, temporal, typed)
    -- Exactly one value slot populated, matching datatype.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS attributes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        syn_id TEXT NOT NULL REFERENCES entity_registry(syn_id),
        key TEXT NOT NULL,
        datatype TEXT NOT NULL CHECK (datatype IN ('STRING', 'NUMBER', 'JSON')),

        value_string TEXT,
        value_number REAL,
        value_json TEXT,

        source TEXT NOT NULL,
        confidence REAL NOT NULL,

        valid_from TEXT NOT NULL,
        valid_to TEXT,
        observed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,

        CHECK (
            (datatype = 'STRING' AND value_string IS NOT NULL
                AND value_number IS NULL AND value_json IS NULL)
         OR (datatype = 'NUMBER' AND value_number IS NOT NULL
                AND value_string IS NULL AND value_json IS NULL)
         OR (datatype = 'JSON' AND value_json IS NOT NULL
                AND value_string IS NULL AND value_number IS NULL)
        )
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uq_attributes_open
        ON attributes(syn_id, key) WHERE valid_to IS NULL;
    CREATE INDEX IF NOT EXISTS idx_attributes_entity ON attributes(syn_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Quarantine (append-only until resolved)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS entity_quarantine (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_identifier TEXT NOT NULL,
        scheme TEXT,
        context TEXT,            -- JSON, may embed the candidate list
        reason TEXT NOT NULL,
        ingested_at TEXT NOT NULL,

        resolved_syn_id TEXT,
        resolved_at TEXT,
        resolved_by TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_quarantine_resolution
        ON entity_quarantine(resolved_syn_id, ingested_at);
";
