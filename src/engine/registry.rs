// ── Engine: Entity Registry ─────────────────────────────────────────────────
// Entity creation, identifier management with SCD2, aliases, and name search.
//
// Operates on a borrowed connection (or transaction) — the facade owns the
// unit-of-work boundary and commits; nothing here commits.
//
// Identifier protocol (close-then-insert):
//   1. An open `(scheme, value)` row owned by a DIFFERENT entity is a
//      collision.
//   2. An open row for the same `(syn_id, scheme)` with a different value is
//      closed at the new row's valid_from.
//   3. The insert ignores exact `(syn_id, scheme, valid_from)` duplicates.
// The partial unique index `uq_identifiers_open` backstops step 1 against
// concurrent writers.

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::constants::MAX_PAGE_LIMIT;
use crate::atoms::error::{is_unique_violation, OntologyError, OntologyResult};
use crate::atoms::types::{
    AliasRecord, Entity, EntityStatus, EntityType, IdentifierRecord, NameSearchHit,
    ResolvedIdentifier,
};
use crate::engine::clock::Clock;
use crate::engine::ids::{validate_syn_id, SynIdMinter};
use crate::engine::store::{fmt_ts, parse_entity_status, parse_entity_type, parse_ts, parse_ts_opt};
use crate::engine::textmatch::fts_match_expr;

use chrono::{DateTime, Utc};

pub struct EntityRegistry<'c> {
    conn: &'c Connection,
    minter: &'c SynIdMinter,
    clock: &'c dyn Clock,
}

impl<'c> EntityRegistry<'c> {
    pub fn new(conn: &'c Connection, minter: &'c SynIdMinter, clock: &'c dyn Clock) -> Self {
        EntityRegistry {
            conn,
            minter,
            clock,
        }
    }

    /// Create a new entity and return its minted syn_id. Visible to reads in
    /// the same transaction.
    pub fn create_entity(
        &self,
        entity_type: EntityType,
        canonical_name: &str,
        status: EntityStatus,
    ) -> OntologyResult<String> {
        let name = canonical_name.trim();
        if name.is_empty() {
            return Err(OntologyError::InvalidArgument(
                "canonical_name cannot be empty".into(),
            ));
        }

        let syn_id = self.minter.mint(entity_type);
        let now = fmt_ts(self.clock.now());

        self.conn.execute(
            "INSERT INTO entity_registry (syn_id, type, canonical_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![syn_id, entity_type.as_str(), name, status.as_str(), now],
        )?;

        info!("[registry] Created entity {syn_id} ({name})");
        Ok(syn_id)
    }

    /// Fetch an entity by syn_id. Malformed ids return None, not an error.
    pub fn get_entity(&self, syn_id: &str) -> OntologyResult<Option<Entity>> {
        if !validate_syn_id(syn_id) {
            return Ok(None);
        }

        let entity = self
            .conn
            .prepare(
                "SELECT syn_id, type, canonical_name, status, replaces_syn_id,
                        created_at, updated_at
                 FROM entity_registry WHERE syn_id = ?1",
            )?
            .query_row(params![syn_id], |row| {
                Ok(Entity {
                    syn_id: row.get(0)?,
                    entity_type: parse_entity_type(&row.get::<_, String>(1)?)?,
                    canonical_name: row.get(2)?,
                    status: parse_entity_status(&row.get::<_, String>(3)?)?,
                    replaces: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                    created_at: parse_ts(&row.get::<_, String>(5)?)?,
                    updated_at: parse_ts(&row.get::<_, String>(6)?)?,
                })
            })
            .optional()?;

        Ok(entity)
    }

    /// Add an identifier mapping with SCD2 close-then-insert.
    pub fn add_identifier(
        &self,
        syn_id: &str,
        scheme: &str,
        value: &str,
        valid_from: Option<DateTime<Utc>>,
    ) -> OntologyResult<()> {
        if !validate_syn_id(syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid syn_id: {syn_id}"
            )));
        }
        let scheme = scheme.trim();
        let value = value.trim();
        if scheme.is_empty() {
            return Err(OntologyError::InvalidArgument(
                "Identifier scheme cannot be empty".into(),
            ));
        }
        if value.is_empty() {
            return Err(OntologyError::InvalidArgument(
                "Identifier value cannot be empty".into(),
            ));
        }

        let valid_from = fmt_ts(valid_from.unwrap_or_else(|| self.clock.now()));

        // Current owner of (scheme, value), if any.
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT syn_id FROM identifiers
                 WHERE scheme = ?1 AND value = ?2 AND valid_to IS NULL",
                params![scheme, value],
                |row| row.get(0),
            )
            .optional()?;

        match owner.as_deref() {
            Some(existing) if existing != syn_id => {
                return Err(OntologyError::IdentifierCollision {
                    scheme: scheme.to_string(),
                    value: value.to_string(),
                    owner: existing.to_string(),
                });
            }
            Some(_) => {
                // Mapping already current for this entity.
                return Ok(());
            }
            None => {}
        }

        // Close the superseded value for this (syn_id, scheme), if open.
        let closed = self.conn.execute(
            "UPDATE identifiers SET valid_to = ?1
             WHERE syn_id = ?2 AND scheme = ?3 AND valid_to IS NULL",
            params![valid_from, syn_id, scheme],
        )?;
        if closed > 0 {
            debug!("[registry] Closed {closed} prior {scheme} row(s) for {syn_id}");
        }

        let inserted = self
            .conn
            .execute(
                "INSERT INTO identifiers (syn_id, scheme, value, valid_from)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (syn_id, scheme, valid_from) DO NOTHING",
                params![syn_id, scheme, value, valid_from],
            )
            .map_err(|e| self.classify_identifier_insert(e, scheme, value))?;

        if inserted > 0 {
            info!("[registry] Added identifier {scheme}:{value} -> {syn_id}");
        }
        Ok(())
    }

    /// A concurrent writer can slip past the pre-check and trip the open-row
    /// constraint; resolve the winner so the error names the actual owner.
    fn classify_identifier_insert(
        &self,
        e: rusqlite::Error,
        scheme: &str,
        value: &str,
    ) -> OntologyError {
        if is_unique_violation(&e) {
            let owner: Option<String> = self
                .conn
                .query_row(
                    "SELECT syn_id FROM identifiers
                     WHERE scheme = ?1 AND value = ?2 AND valid_to IS NULL",
                    params![scheme, value],
                    |row| row.get(0),
                )
                .optional()
                .ok()
                .flatten();
            OntologyError::IdentifierCollision {
                scheme: scheme.to_string(),
                value: value.to_string(),
                owner: owner.unwrap_or_else(|| "unknown".into()),
            }
        } else {
            e.into()
        }
    }

    /// Add an alias. Aliases accumulate — straight insert, no versioning.
    pub fn add_alias(
        &self,
        syn_id: &str,
        alias: &str,
        lang: Option<&str>,
        source: Option<&str>,
        confidence: f64,
    ) -> OntologyResult<()> {
        if !validate_syn_id(syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid syn_id: {syn_id}"
            )));
        }
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(OntologyError::InvalidArgument(
                "Alias cannot be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OntologyError::InvalidArgument(format!(
                "Confidence must be 0-1, got {confidence}"
            )));
        }

        self.conn.execute(
            "INSERT INTO aliases (syn_id, alias, lang, source, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                syn_id,
                alias,
                lang,
                source,
                confidence,
                fmt_ts(self.clock.now())
            ],
        )?;

        debug!("[registry] Added alias '{alias}' -> {syn_id}");
        Ok(())
    }

    /// Resolve `(scheme, value)` to the entity whose identifier interval
    /// contains `asof` (default: now).
    pub fn resolve_identifier(
        &self,
        scheme: &str,
        value: &str,
        asof: Option<DateTime<Utc>>,
    ) -> OntologyResult<Option<ResolvedIdentifier>> {
        let asof = fmt_ts(asof.unwrap_or_else(|| self.clock.now()));

        let resolved = self
            .conn
            .prepare(
                "SELECT i.syn_id, e.canonical_name, e.type, e.status, i.valid_from, i.valid_to
                 FROM identifiers i
                 JOIN entity_registry e ON i.syn_id = e.syn_id
                 WHERE i.scheme = ?1
                   AND i.value = ?2
                   AND i.valid_from <= ?3
                   AND (i.valid_to IS NULL OR i.valid_to > ?3)
                 LIMIT 1",
            )?
            .query_row(params![scheme, value.trim(), asof], |row| {
                Ok(ResolvedIdentifier {
                    syn_id: row.get(0)?,
                    canonical_name: row.get(1)?,
                    entity_type: parse_entity_type(&row.get::<_, String>(2)?)?,
                    status: parse_entity_status(&row.get::<_, String>(3)?)?,
                    valid_from: parse_ts(&row.get::<_, String>(4)?)?,
                    valid_to: parse_ts_opt(row.get::<_, Option<String>>(5)?)?,
                })
            })
            .optional()?;

        Ok(resolved)
    }

    /// List identifiers for an entity. Malformed ids return empty.
    pub fn get_identifiers(
        &self,
        syn_id: &str,
        active_only: bool,
    ) -> OntologyResult<Vec<IdentifierRecord>> {
        if !validate_syn_id(syn_id) {
            return Ok(Vec::new());
        }

        let sql = if active_only {
            "SELECT scheme, value, valid_from, valid_to FROM identifiers
             WHERE syn_id = ?1 AND valid_to IS NULL
             ORDER BY scheme"
        } else {
            "SELECT scheme, value, valid_from, valid_to FROM identifiers
             WHERE syn_id = ?1
             ORDER BY scheme, valid_from DESC"
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![syn_id], |row| {
            Ok(IdentifierRecord {
                scheme: row.get(0)?,
                value: row.get(1)?,
                valid_from: parse_ts(&row.get::<_, String>(2)?)?,
                valid_to: parse_ts_opt(row.get::<_, Option<String>>(3)?)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// List aliases for an entity, best-trusted first.
    pub fn get_aliases(&self, syn_id: &str) -> OntologyResult<Vec<AliasRecord>> {
        if !validate_syn_id(syn_id) {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT alias, lang, source, confidence, created_at FROM aliases
             WHERE syn_id = ?1
             ORDER BY confidence DESC, created_at DESC",
        )?;
        let rows = stmt.query_map(params![syn_id], |row| {
            Ok(AliasRecord {
                alias: row.get(0)?,
                lang: row.get(1)?,
                source: row.get(2)?,
                confidence: row.get(3)?,
                created_at: parse_ts(&row.get::<_, String>(4)?)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Full-text search over ACTIVE entity names, best rank first.
    pub fn search_by_name(&self, query: &str, limit: i64) -> OntologyResult<Vec<NameSearchHit>> {
        let Some(match_expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        let mut stmt = self.conn.prepare(
            "SELECT e.syn_id, e.type, e.canonical_name, e.status,
                    -bm25(entity_name_fts) AS rank
             FROM entity_name_fts
             JOIN entity_registry e ON e.rowid = entity_name_fts.rowid
             WHERE entity_name_fts MATCH ?1
               AND e.status = 'ACTIVE'
             ORDER BY rank DESC, e.canonical_name
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit], |row| {
            Ok(NameSearchHit {
                syn_id: row.get(0)?,
                entity_type: parse_entity_type(&row.get::<_, String>(1)?)?,
                canonical_name: row.get(2)?,
                status: parse_entity_status(&row.get::<_, String>(3)?)?,
                rank: row.get(4)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
