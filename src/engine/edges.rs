// ── Engine: Edge Manager ────────────────────────────────────────────────────
// Typed relationships between entities with SCD2 temporal tracking.
//
// The significant-change rule is the core invariant here: a meaningful
// mutation produces exactly one closed and one open row; a no-op write emits
// nothing and bumps no timestamps. Significant = attrs differ (deep JSON
// equality), |Δconfidence| > 0.01, source differs, or evidence differs.
//
// Nothing here commits — the facade owns the transaction.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::atoms::constants::{CONFIDENCE_TOLERANCE, MAX_PAGE_LIMIT};
use crate::atoms::error::{is_unique_violation, OntologyError, OntologyResult};
use crate::atoms::types::{
    EdgeDirection, EdgeInput, EdgeQuery, EdgeRecord, EdgeStats, EdgeTypeStats,
};
use crate::engine::clock::Clock;
use crate::engine::ids::validate_syn_id;
use crate::engine::store::{fmt_ts, parse_entity_type, parse_ts, parse_ts_opt};

pub struct EdgeManager<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

/// The open edge row's comparable payload.
struct OpenEdge {
    attrs: Option<Value>,
    source: String,
    evidence: Option<String>,
    confidence: f64,
}

impl<'c> EdgeManager<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        EdgeManager { conn, clock }
    }

    /// Add or update an edge. Returns `(inserted, updated)`:
    ///   (true, false)  — no open edge existed, inserted fresh
    ///   (false, true)  — open edge changed significantly: closed + reopened
    ///   (false, false) — open edge unchanged: no-op
    pub fn add_edge(&self, input: &EdgeInput) -> OntologyResult<(bool, bool)> {
        if !validate_syn_id(&input.src_syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid src_syn_id: {}",
                input.src_syn_id
            )));
        }
        if !validate_syn_id(&input.dst_syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid dst_syn_id: {}",
                input.dst_syn_id
            )));
        }
        if input.src_syn_id == input.dst_syn_id {
            return Err(OntologyError::InvalidArgument(
                "Source and destination cannot be the same".into(),
            ));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(OntologyError::InvalidArgument(format!(
                "Confidence must be 0-1, got {}",
                input.confidence
            )));
        }

        let observed_at = input.observed_at.unwrap_or_else(|| self.clock.now());
        let valid_from = input.valid_from.unwrap_or(observed_at);

        let existing = self
            .conn
            .prepare(
                "SELECT attrs, source, evidence, confidence FROM edges
                 WHERE src_syn_id = ?1 AND dst_syn_id = ?2 AND rel_type = ?3
                   AND valid_to IS NULL",
            )?
            .query_row(
                params![input.src_syn_id, input.dst_syn_id, input.rel_type],
                |row| {
                    let attrs_raw: Option<String> = row.get(0)?;
                    Ok(OpenEdge {
                        attrs: attrs_raw
                            .as_deref()
                            .map(serde_json::from_str)
                            .transpose()
                            .unwrap_or(None),
                        source: row.get(1)?,
                        evidence: row.get(2)?,
                        confidence: row.get(3)?,
                    })
                },
            )
            .optional()?;

        if let Some(open) = existing {
            let attrs_changed = open.attrs != input.attrs;
            let confidence_changed =
                (open.confidence - input.confidence).abs() > CONFIDENCE_TOLERANCE;
            let source_changed = open.source != input.source;
            let evidence_changed = open.evidence != input.evidence;

            if !(attrs_changed || confidence_changed || source_changed || evidence_changed) {
                return Ok((false, false));
            }

            self.conn.execute(
                "UPDATE edges SET valid_to = ?1, updated_at = ?2
                 WHERE src_syn_id = ?3 AND dst_syn_id = ?4 AND rel_type = ?5
                   AND valid_to IS NULL",
                params![
                    fmt_ts(valid_from),
                    fmt_ts(self.clock.now()),
                    input.src_syn_id,
                    input.dst_syn_id,
                    input.rel_type
                ],
            )?;
            self.insert_version(input, observed_at, valid_from)?;
            debug!(
                "[edges] Updated {} -{}-> {}",
                input.src_syn_id, input.rel_type, input.dst_syn_id
            );
            return Ok((false, true));
        }

        self.insert_version(input, observed_at, valid_from)?;
        debug!(
            "[edges] Inserted {} -{}-> {}",
            input.src_syn_id, input.rel_type, input.dst_syn_id
        );
        Ok((true, false))
    }

    fn insert_version(
        &self,
        input: &EdgeInput,
        observed_at: DateTime<Utc>,
        valid_from: DateTime<Utc>,
    ) -> OntologyResult<()> {
        let attrs_json = input
            .attrs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO edges (
                    src_syn_id, dst_syn_id, rel_type, attrs,
                    source, evidence, confidence,
                    valid_from, observed_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    input.src_syn_id,
                    input.dst_syn_id,
                    input.rel_type,
                    attrs_json,
                    input.source,
                    input.evidence,
                    input.confidence,
                    fmt_ts(valid_from),
                    fmt_ts(observed_at),
                    fmt_ts(self.clock.now()),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OntologyError::EdgeConflict(format!(
                        "open edge already exists for {} -{}-> {}",
                        input.src_syn_id, input.rel_type, input.dst_syn_id
                    ))
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Paged edge listing joined with the related entity's name and type.
    /// Sort key: `observed_at DESC, confidence DESC`.
    pub fn get_edges(&self, query: &EdgeQuery) -> OntologyResult<Vec<EdgeRecord>> {
        if !validate_syn_id(&query.syn_id) {
            return Ok(Vec::new());
        }

        let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = query.offset.max(0);

        // Each direction projects the far end as `related_*`. For `both`,
        // self-edges cannot exist (src ≠ dst), so the two arms are disjoint
        // and no deduplication is needed.
        let (direction_clause, related_select) = match query.direction {
            EdgeDirection::Out => (
                "e.src_syn_id = :syn_id",
                "e.dst_syn_id AS related_syn_id,
                 dst_e.canonical_name AS related_name,
                 dst_e.type AS related_type",
            ),
            EdgeDirection::In => (
                "e.dst_syn_id = :syn_id",
                "e.src_syn_id AS related_syn_id,
                 src_e.canonical_name AS related_name,
                 src_e.type AS related_type",
            ),
            EdgeDirection::Both => (
                "(e.src_syn_id = :syn_id OR e.dst_syn_id = :syn_id)",
                "CASE WHEN e.src_syn_id = :syn_id THEN e.dst_syn_id
                      ELSE e.src_syn_id END AS related_syn_id,
                 CASE WHEN e.src_syn_id = :syn_id THEN dst_e.canonical_name
                      ELSE src_e.canonical_name END AS related_name,
                 CASE WHEN e.src_syn_id = :syn_id THEN dst_e.type
                      ELSE src_e.type END AS related_type",
            ),
        };

        // active_only → open rows; explicit asof → interval containment;
        // neither → full history.
        let asof = (!query.active_only).then_some(query.asof).flatten().map(fmt_ts);
        let temporal_clause = if query.active_only {
            "AND e.valid_to IS NULL"
        } else if asof.is_some() {
            "AND e.valid_from <= :asof AND (e.valid_to IS NULL OR e.valid_to > :asof)"
        } else {
            ""
        };

        let rel_type_clause = if query.rel_type.is_some() {
            "AND e.rel_type = :rel_type"
        } else {
            ""
        };

        let sql = format!(
            "SELECT e.src_syn_id, e.dst_syn_id, e.rel_type, e.attrs,
                    e.source, e.evidence, e.confidence,
                    e.valid_from, e.valid_to, e.observed_at,
                    {related_select}
             FROM edges e
             LEFT JOIN entity_registry src_e ON e.src_syn_id = src_e.syn_id
             LEFT JOIN entity_registry dst_e ON e.dst_syn_id = dst_e.syn_id
             WHERE {direction_clause}
               {temporal_clause}
               {rel_type_clause}
             ORDER BY e.observed_at DESC, e.confidence DESC
             LIMIT :limit OFFSET :offset"
        );

        let mut stmt = self.conn.prepare(&sql)?;

        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = vec![
            (":syn_id", &query.syn_id),
            (":limit", &limit),
            (":offset", &offset),
        ];
        if let Some(asof) = asof.as_ref() {
            named.push((":asof", asof));
        }
        if let Some(rel_type) = query.rel_type.as_ref() {
            named.push((":rel_type", rel_type));
        }

        let rows = stmt.query_map(named.as_slice(), |row| {
            let attrs_raw: Option<String> = row.get(3)?;
            let related_type_raw: Option<String> = row.get(12)?;
            Ok(EdgeRecord {
                src_syn_id: row.get(0)?,
                dst_syn_id: row.get(1)?,
                rel_type: row.get(2)?,
                attrs: attrs_raw
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .unwrap_or(None),
                source: row.get(4)?,
                evidence: row.get(5)?,
                confidence: row.get(6)?,
                valid_from: parse_ts(&row.get::<_, String>(7)?)?,
                valid_to: parse_ts_opt(row.get::<_, Option<String>>(8)?)?,
                observed_at: parse_ts(&row.get::<_, String>(9)?)?,
                related_syn_id: row.get(10)?,
                related_name: row.get(11)?,
                related_type: related_type_raw
                    .as_deref()
                    .map(parse_entity_type)
                    .transpose()?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Close the open edge (soft delete). Idempotent: returns false when no
    /// open version exists.
    pub fn delete_edge(
        &self,
        src_syn_id: &str,
        dst_syn_id: &str,
        rel_type: &str,
        valid_to: Option<DateTime<Utc>>,
    ) -> OntologyResult<bool> {
        if !validate_syn_id(src_syn_id) || !validate_syn_id(dst_syn_id) {
            return Ok(false);
        }
        let valid_to = valid_to.unwrap_or_else(|| self.clock.now());

        let closed = self.conn.execute(
            "UPDATE edges SET valid_to = ?1, updated_at = ?2
             WHERE src_syn_id = ?3 AND dst_syn_id = ?4 AND rel_type = ?5
               AND valid_to IS NULL",
            params![
                fmt_ts(valid_to),
                fmt_ts(self.clock.now()),
                src_syn_id,
                dst_syn_id,
                rel_type
            ],
        )?;

        Ok(closed > 0)
    }

    /// Edge counts by relationship type plus overall totals.
    pub fn get_edge_stats(&self) -> OntologyResult<EdgeStats> {
        let mut stmt = self.conn.prepare(
            "SELECT rel_type,
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE valid_to IS NULL) AS active,
                    AVG(confidence) AS avg_confidence
             FROM edges
             GROUP BY rel_type
             ORDER BY active DESC",
        )?;
        let by_type = stmt
            .query_map([], |row| {
                Ok(EdgeTypeStats {
                    rel_type: row.get(0)?,
                    total: row.get(1)?,
                    active: row.get(2)?,
                    avg_confidence: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total: i64 = by_type.iter().map(|t| t.total).sum();
        let total_active: i64 = by_type.iter().map(|t| t.active).sum();

        Ok(EdgeStats {
            by_type,
            total,
            total_active,
            historical: total - total_active,
        })
    }
}
