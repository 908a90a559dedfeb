// ── Engine: Entity Linker ───────────────────────────────────────────────────
// Rule-based resolver: turns a free-text mention into either a single
// high-confidence syn_id or a quarantine record for human review.
//
// Candidate cascade (a stage that yields anything stops the cascade):
//   1. Exact ticker       — confidence 1.0
//   2. Exact alias        — min(alias confidence, 0.95)
//   3. Canonical FTS      — 0.85 × sequence ratio against the name
//   4. Fuzzy alias        — trigram tiers 0.90 / 0.80 / 0.70, capped by
//                           alias confidence
//
// Only ACTIVE entities participate. The accumulated set is optionally
// filtered by entity type, deduplicated per syn_id (highest confidence
// wins), and sorted descending. A top candidate at or above the operating
// threshold resolves; anything else quarantines on request.

use log::{debug, info};
use rusqlite::{params, Connection};
use serde_json::{json, Value};

use crate::atoms::constants::{
    AMBIGUITY_MARGIN, CANDIDATE_LIMIT, CONFIDENCE_CANONICAL, CONFIDENCE_EXACT_ALIAS,
    CONFIDENCE_EXACT_TICKER, CONFIDENCE_FUZZY_HIGH, CONFIDENCE_FUZZY_LOW,
    CONFIDENCE_FUZZY_MEDIUM, FUZZY_SIMILARITY_FLOOR, MAX_PAGE_LIMIT,
};
use crate::atoms::error::{OntologyError, OntologyResult};
use crate::atoms::types::{Candidate, EntityType, MatchMethod, QuarantineItem};
use crate::engine::clock::Clock;
use crate::engine::ids::validate_syn_id;
use crate::engine::store::{fmt_ts, parse_entity_type, parse_ts, parse_ts_opt};
use crate::engine::textmatch::{fts_match_expr, is_ticker_like, normalize, sequence_ratio};

pub struct EntityLinker<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
    threshold: f64,
}

impl<'c> EntityLinker<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock, threshold: f64) -> Self {
        EntityLinker {
            conn,
            clock,
            threshold,
        }
    }

    /// Run the cascade. Returns `(best, all_candidates)`; `best` is None
    /// when the top confidence is below the operating threshold.
    pub fn resolve(
        &self,
        text: &str,
        entity_type_filter: Option<EntityType>,
    ) -> OntologyResult<(Option<Candidate>, Vec<Candidate>)> {
        let text = text.trim();
        if text.is_empty() {
            return Ok((None, Vec::new()));
        }

        let mut candidates = Vec::new();

        // Ticker shape is checked against the raw input; later stages see
        // the normalized form.
        if is_ticker_like(text) {
            candidates.extend(self.ticker_candidates(text)?);
        }
        if candidates.is_empty() {
            candidates.extend(self.alias_exact_candidates(text)?);
        }
        if candidates.is_empty() {
            candidates.extend(self.canonical_name_candidates(text)?);
        }
        if candidates.is_empty() {
            candidates.extend(self.alias_fuzzy_candidates(text)?);
        }

        if let Some(filter) = entity_type_filter {
            candidates.retain(|c| c.entity_type == filter);
        }

        // Keep the best-scored entry per syn_id, then rank.
        let mut best_per_entity: std::collections::HashMap<String, Candidate> =
            std::collections::HashMap::new();
        for candidate in candidates {
            match best_per_entity.get(&candidate.syn_id) {
                Some(existing) if existing.confidence >= candidate.confidence => {}
                _ => {
                    best_per_entity.insert(candidate.syn_id.clone(), candidate);
                }
            }
        }
        let mut ranked: Vec<Candidate> = best_per_entity.into_values().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let best = ranked
            .first()
            .filter(|top| top.confidence >= self.threshold)
            .cloned();

        debug!(
            "[linker] resolve('{text}') -> {} candidate(s), best={:?}",
            ranked.len(),
            best.as_ref().map(|c| (&c.syn_id, c.confidence))
        );
        Ok((best, ranked))
    }

    fn ticker_candidates(&self, text: &str) -> OntologyResult<Vec<Candidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT i.syn_id, e.canonical_name, e.type, i.value
             FROM identifiers i
             JOIN entity_registry e ON i.syn_id = e.syn_id
             WHERE i.scheme = 'TICKER'
               AND UPPER(i.value) = UPPER(?1)
               AND i.valid_to IS NULL
               AND e.status = 'ACTIVE'",
        )?;
        let rows = stmt.query_map(params![text], |row| {
            Ok(Candidate {
                syn_id: row.get(0)?,
                canonical_name: row.get(1)?,
                entity_type: parse_entity_type(&row.get::<_, String>(2)?)?,
                matched_via: MatchMethod::Ticker,
                matched_value: row.get(3)?,
                confidence: CONFIDENCE_EXACT_TICKER,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn alias_exact_candidates(&self, text: &str) -> OntologyResult<Vec<Candidate>> {
        let normalized = normalize(text);
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT a.syn_id, e.canonical_name, e.type, a.alias, a.confidence
             FROM aliases a
             JOIN entity_registry e ON a.syn_id = e.syn_id
             WHERE LOWER(a.alias) = ?1
               AND e.status = 'ACTIVE'
             ORDER BY a.confidence DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![normalized, CANDIDATE_LIMIT], |row| {
            let alias_confidence: f64 = row.get(4)?;
            Ok(Candidate {
                syn_id: row.get(0)?,
                canonical_name: row.get(1)?,
                entity_type: parse_entity_type(&row.get::<_, String>(2)?)?,
                matched_via: MatchMethod::Alias,
                matched_value: row.get(3)?,
                confidence: alias_confidence.min(CONFIDENCE_EXACT_ALIAS),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn canonical_name_candidates(&self, text: &str) -> OntologyResult<Vec<Candidate>> {
        let Some(match_expr) = fts_match_expr(text) else {
            return Ok(Vec::new());
        };
        let normalized = normalize(text);

        let mut stmt = self.conn.prepare(
            "SELECT e.syn_id, e.type, e.canonical_name
             FROM entity_name_fts
             JOIN entity_registry e ON e.rowid = entity_name_fts.rowid
             WHERE entity_name_fts MATCH ?1
               AND e.status = 'ACTIVE'
             ORDER BY bm25(entity_name_fts)
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, CANDIDATE_LIMIT], |row| {
            Ok((
                row.get::<_, String>(0)?,
                parse_entity_type(&row.get::<_, String>(1)?)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (syn_id, entity_type, canonical_name) = row?;
            let ratio = sequence_ratio(&normalized, &normalize(&canonical_name));
            candidates.push(Candidate {
                syn_id,
                entity_type,
                matched_value: canonical_name.clone(),
                canonical_name,
                matched_via: MatchMethod::CanonicalName,
                confidence: CONFIDENCE_CANONICAL * ratio,
            });
        }
        Ok(candidates)
    }

    fn alias_fuzzy_candidates(&self, text: &str) -> OntologyResult<Vec<Candidate>> {
        let normalized = normalize(text);
        let mut stmt = self.conn.prepare(
            "SELECT a.syn_id, e.canonical_name, e.type, a.alias, a.confidence,
                    trgm_similarity(a.alias, ?1) AS sim
             FROM aliases a
             JOIN entity_registry e ON a.syn_id = e.syn_id
             WHERE e.status = 'ACTIVE'
               AND trgm_similarity(a.alias, ?1) >= ?2
             ORDER BY sim DESC, a.confidence DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![normalized, FUZZY_SIMILARITY_FLOOR, CANDIDATE_LIMIT],
            |row| {
                let alias_confidence: f64 = row.get(4)?;
                let sim: f64 = row.get(5)?;
                let tier = if sim >= 0.9 {
                    CONFIDENCE_FUZZY_HIGH
                } else if sim >= 0.8 {
                    CONFIDENCE_FUZZY_MEDIUM
                } else {
                    CONFIDENCE_FUZZY_LOW
                };
                Ok(Candidate {
                    syn_id: row.get(0)?,
                    canonical_name: row.get(1)?,
                    entity_type: parse_entity_type(&row.get::<_, String>(2)?)?,
                    matched_via: MatchMethod::AliasFuzzy,
                    matched_value: row.get(3)?,
                    confidence: tier.min(alias_confidence),
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Quarantine
    // ═══════════════════════════════════════════════════════════════════════

    /// Record an unresolved mention. The candidate list, when non-empty, is
    /// embedded in the context under "candidates".
    pub fn quarantine(
        &self,
        raw_identifier: &str,
        scheme: Option<&str>,
        context: Option<Value>,
        reason: &str,
        candidates: &[Candidate],
    ) -> OntologyResult<i64> {
        let context_json = if context.is_none() && candidates.is_empty() {
            None
        } else {
            let mut context = context.unwrap_or_else(|| json!({}));
            if !candidates.is_empty() {
                if let Value::Object(map) = &mut context {
                    map.insert("candidates".into(), serde_json::to_value(candidates)?);
                }
            }
            Some(serde_json::to_string(&context)?)
        };

        self.conn.execute(
            "INSERT INTO entity_quarantine (raw_identifier, scheme, context, reason, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                raw_identifier,
                scheme,
                context_json,
                reason,
                fmt_ts(self.clock.now())
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        info!("[linker] Quarantined '{raw_identifier}' (#{id}): {reason}");
        Ok(id)
    }

    /// Resolve or quarantine. Returns `(syn_id_candidate, quarantine_id)`:
    /// exactly one side is populated.
    pub fn resolve_or_quarantine(
        &self,
        text: &str,
        context: Option<Value>,
        entity_type_filter: Option<EntityType>,
    ) -> OntologyResult<(Option<Candidate>, Option<i64>)> {
        let (best, all_candidates) = self.resolve(text, entity_type_filter)?;

        if let Some(best) = best {
            return Ok((Some(best), None));
        }

        let reason = if all_candidates.is_empty() {
            "No candidates found".to_string()
        } else if all_candidates.len() > 1
            && all_candidates[0].confidence - all_candidates[1].confidence < AMBIGUITY_MARGIN
        {
            format!(
                "Ambiguous: {} candidates with similar confidence",
                all_candidates.len()
            )
        } else {
            format!(
                "Low confidence: best={:.2} < threshold={}",
                all_candidates[0].confidence, self.threshold
            )
        };

        let quarantine_id =
            self.quarantine(text.trim(), None, context, &reason, &all_candidates)?;
        Ok((None, Some(quarantine_id)))
    }

    /// Page through quarantine items. Returns `(items, total_count)` for the
    /// requested resolution state.
    pub fn get_quarantine_items(
        &self,
        resolved: bool,
        limit: i64,
        offset: i64,
    ) -> OntologyResult<(Vec<QuarantineItem>, i64)> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.max(0);

        let (count_sql, page_sql) = if resolved {
            (
                "SELECT COUNT(*) FROM entity_quarantine WHERE resolved_syn_id IS NOT NULL",
                "SELECT id, raw_identifier, scheme, context, reason, ingested_at,
                        resolved_syn_id, resolved_at, resolved_by
                 FROM entity_quarantine
                 WHERE resolved_syn_id IS NOT NULL
                 ORDER BY resolved_at DESC
                 LIMIT ?1 OFFSET ?2",
            )
        } else {
            (
                "SELECT COUNT(*) FROM entity_quarantine WHERE resolved_syn_id IS NULL",
                "SELECT id, raw_identifier, scheme, context, reason, ingested_at,
                        resolved_syn_id, resolved_at, resolved_by
                 FROM entity_quarantine
                 WHERE resolved_syn_id IS NULL
                 ORDER BY ingested_at DESC
                 LIMIT ?1 OFFSET ?2",
            )
        };

        let total: i64 = self.conn.query_row(count_sql, [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(page_sql)?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            let context_raw: Option<String> = row.get(3)?;
            Ok(QuarantineItem {
                id: row.get(0)?,
                raw_identifier: row.get(1)?,
                scheme: row.get(2)?,
                context: context_raw
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .unwrap_or(None),
                reason: row.get(4)?,
                ingested_at: parse_ts(&row.get::<_, String>(5)?)?,
                resolved_syn_id: row.get(6)?,
                resolved_at: parse_ts_opt(row.get::<_, Option<String>>(7)?)?,
                resolved_by: row.get(8)?,
            })
        })?;

        Ok((rows.collect::<Result<Vec<_>, _>>()?, total))
    }

    /// Manually bind a quarantine item to an entity. Returns false when the
    /// item does not exist or was already resolved.
    pub fn resolve_quarantine_item(
        &self,
        quarantine_id: i64,
        syn_id: &str,
        resolved_by: &str,
    ) -> OntologyResult<bool> {
        if !validate_syn_id(syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid syn_id: {syn_id}"
            )));
        }

        let updated = self.conn.execute(
            "UPDATE entity_quarantine
             SET resolved_syn_id = ?1, resolved_at = ?2, resolved_by = ?3
             WHERE id = ?4 AND resolved_syn_id IS NULL",
            params![syn_id, fmt_ts(self.clock.now()), resolved_by, quarantine_id],
        )?;

        if updated > 0 {
            info!("[linker] Quarantine #{quarantine_id} resolved to {syn_id} by {resolved_by}");
        }
        Ok(updated > 0)
    }
}
