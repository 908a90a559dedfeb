// ── Engine: Attribute Manager ───────────────────────────────────────────────
// Typed per-entity attributes with SCD2 temporal tracking.
//
// Same significant-change rule as edges, with change defined over the value
// (per datatype), the datatype itself, the source, and confidence (tolerance
// 0.01). Exactly one value slot is persisted, matching the datatype — the
// schema CHECK enforces it a second time at the store layer.
//
// Nothing here commits — the facade owns the transaction.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::atoms::constants::CONFIDENCE_TOLERANCE;
use crate::atoms::error::{is_unique_violation, OntologyError, OntologyResult};
use crate::atoms::types::{AttributeInput, AttributeRecord, AttributeValue};
use crate::engine::clock::Clock;
use crate::engine::ids::validate_syn_id;
use crate::engine::store::{fmt_ts, parse_ts, parse_ts_opt};

pub struct AttributeManager<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

impl<'c> AttributeManager<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        AttributeManager { conn, clock }
    }

    /// Upsert an attribute. Returns `(inserted, updated)` with the same
    /// semantics as `EdgeManager::add_edge`.
    pub fn upsert_attribute(&self, input: &AttributeInput) -> OntologyResult<(bool, bool)> {
        if !validate_syn_id(&input.syn_id) {
            return Err(OntologyError::InvalidArgument(format!(
                "Invalid syn_id: {}",
                input.syn_id
            )));
        }
        let key = input.key.trim();
        if key.is_empty() {
            return Err(OntologyError::InvalidArgument(
                "Attribute key cannot be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(OntologyError::InvalidArgument(format!(
                "Confidence must be 0-1, got {}",
                input.confidence
            )));
        }
        if let AttributeValue::Number(n) = &input.value {
            if !n.is_finite() {
                return Err(OntologyError::InvalidArgument(
                    "Value must be a finite number for datatype NUMBER".into(),
                ));
            }
        }

        let observed_at = input.observed_at.unwrap_or_else(|| self.clock.now());
        let valid_from = input.valid_from.unwrap_or(observed_at);

        let existing = self
            .conn
            .prepare(
                "SELECT datatype, value_string, value_number, value_json, source, confidence
                 FROM attributes
                 WHERE syn_id = ?1 AND key = ?2 AND valid_to IS NULL",
            )?
            .query_row(params![input.syn_id, key], |row| {
                Ok((
                    value_from_row(row, 0, 1, 2, 3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })
            .optional()?;

        if let Some((open_value, open_source, open_confidence)) = existing {
            let value_changed = open_value != input.value;
            let source_changed = open_source != input.source;
            let confidence_changed =
                (open_confidence - input.confidence).abs() > CONFIDENCE_TOLERANCE;

            if !(value_changed || source_changed || confidence_changed) {
                return Ok((false, false));
            }

            self.conn.execute(
                "UPDATE attributes SET valid_to = ?1, updated_at = ?2
                 WHERE syn_id = ?3 AND key = ?4 AND valid_to IS NULL",
                params![
                    fmt_ts(valid_from),
                    fmt_ts(self.clock.now()),
                    input.syn_id,
                    key
                ],
            )?;
            self.insert_version(input, key, observed_at, valid_from)?;
            debug!("[attributes] Updated {}::{key}", input.syn_id);
            return Ok((false, true));
        }

        self.insert_version(input, key, observed_at, valid_from)?;
        debug!("[attributes] Inserted {}::{key}", input.syn_id);
        Ok((true, false))
    }

    fn insert_version(
        &self,
        input: &AttributeInput,
        key: &str,
        observed_at: DateTime<Utc>,
        valid_from: DateTime<Utc>,
    ) -> OntologyResult<()> {
        let (value_string, value_number, value_json) = match &input.value {
            AttributeValue::String(s) => (Some(s.clone()), None, None),
            AttributeValue::Number(n) => (None, Some(*n), None),
            AttributeValue::Json(v) => (None, None, Some(serde_json::to_string(v)?)),
        };

        self.conn
            .execute(
                "INSERT INTO attributes (
                    syn_id, key, datatype,
                    value_string, value_number, value_json,
                    source, confidence,
                    valid_from, observed_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    input.syn_id,
                    key,
                    input.value.datatype(),
                    value_string,
                    value_number,
                    value_json,
                    input.source,
                    input.confidence,
                    fmt_ts(valid_from),
                    fmt_ts(observed_at),
                    fmt_ts(self.clock.now()),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OntologyError::AttributeConflict(format!(
                        "open attribute already exists for {}::{key}",
                        input.syn_id
                    ))
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// List attributes for an entity, optionally filtered by key. Ordered by
    /// `key`, then `valid_from DESC` within a key's history.
    pub fn get_attributes(
        &self,
        syn_id: &str,
        key: Option<&str>,
        active_only: bool,
    ) -> OntologyResult<Vec<AttributeRecord>> {
        if !validate_syn_id(syn_id) {
            return Ok(Vec::new());
        }

        let key_clause = if key.is_some() { "AND key = :key" } else { "" };
        let temporal_clause = if active_only {
            "AND valid_to IS NULL"
        } else {
            ""
        };
        let sql = format!(
            "SELECT datatype, value_string, value_number, value_json,
                    key, source, confidence, valid_from, valid_to, observed_at
             FROM attributes
             WHERE syn_id = :syn_id {key_clause} {temporal_clause}
             ORDER BY key, valid_from DESC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = vec![(":syn_id", &syn_id)];
        if let Some(key) = key.as_ref() {
            named.push((":key", key));
        }

        let rows = stmt.query_map(named.as_slice(), |row| {
            Ok(AttributeRecord {
                value: value_from_row(row, 0, 1, 2, 3)?,
                key: row.get(4)?,
                source: row.get(5)?,
                confidence: row.get(6)?,
                valid_from: parse_ts(&row.get::<_, String>(7)?)?,
                valid_to: parse_ts_opt(row.get::<_, Option<String>>(8)?)?,
                observed_at: parse_ts(&row.get::<_, String>(9)?)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Rebuild the tagged value from the three slots, trusting the datatype tag.
fn value_from_row(
    row: &Row<'_>,
    datatype_idx: usize,
    string_idx: usize,
    number_idx: usize,
    json_idx: usize,
) -> rusqlite::Result<AttributeValue> {
    let datatype: String = row.get(datatype_idx)?;
    match datatype.as_str() {
        "STRING" => Ok(AttributeValue::String(row.get(string_idx)?)),
        "NUMBER" => Ok(AttributeValue::Number(row.get(number_idx)?)),
        "JSON" => {
            let raw: String = row.get(json_idx)?;
            serde_json::from_str(&raw).map(AttributeValue::Json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    json_idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        }
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            datatype_idx,
            rusqlite::types::Type::Text,
            format!("unknown attribute datatype: {other}").into(),
        )),
    }
}
