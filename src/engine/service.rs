// ── Engine: Ontology Service Facade ─────────────────────────────────────────
// Composes the minter, store, managers, resolver, and cache behind the
// public operations.
//
// Responsibilities:
//   • One connection checkout + transaction per write; commit on success,
//     rollback (drop) on any failure.
//   • Batch endpoints are atomic: any per-item error rolls back the whole
//     batch and the outcome carries every indexed error.
//   • Cache invalidation strictly after commit — speculative cache writes
//     before commit are forbidden.
//   • No internal retries on conflicts; the caller decides.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::Transaction;
use serde_json::Value;

use crate::atoms::constants::MAX_BATCH_SIZE;
use crate::atoms::error::{OntologyError, OntologyResult};
use crate::atoms::types::{
    AliasRecord, AttributeInput, AttributeRecord, BatchItemError, BatchOutcome, CacheStats,
    Candidate, EdgeInput, EdgeQuery, EdgeRecord, EdgeStats, Entity, EntityStatus, EntityType,
    EntityView, IdentifierRecord, NameSearchHit, OntologyStats, QuarantineItem, ResolvedIdentifier,
    Resolution,
};
use crate::engine::attributes::AttributeManager;
use crate::engine::cache::EntityCache;
use crate::engine::calibration::{self, CalibrationReport, GoldCase};
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::config::OntologyConfig;
use crate::engine::edges::EdgeManager;
use crate::engine::ids::{validate_syn_id, SynIdMinter};
use crate::engine::linker::EntityLinker;
use crate::engine::registry::EntityRegistry;
use crate::engine::store::OntologyStore;

pub struct OntologyService {
    store: OntologyStore,
    cache: EntityCache,
    minter: SynIdMinter,
    clock: Arc<dyn Clock>,
    linker_threshold: f64,
}

impl OntologyService {
    pub fn new(config: OntologyConfig) -> OntologyResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construct with an injected clock (deterministic SCD2 tests).
    pub fn with_clock(config: OntologyConfig, clock: Arc<dyn Clock>) -> OntologyResult<Self> {
        let store = OntologyStore::open(&config)?;
        Ok(OntologyService {
            store,
            cache: EntityCache::new(config.cache_ttl, config.cache_capacity),
            minter: SynIdMinter::new(clock.clone()),
            clock,
            linker_threshold: config.linker_threshold,
        })
    }

    /// Run one unit of work: checkout, transaction, commit. Dropping the
    /// transaction on the error path rolls back.
    fn write_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> OntologyResult<T>,
    ) -> OntologyResult<T> {
        let mut conn = self.store.checkout()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Registry operations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn create_entity(
        &self,
        entity_type: EntityType,
        canonical_name: &str,
        status: EntityStatus,
    ) -> OntologyResult<String> {
        self.write_tx(|tx| {
            EntityRegistry::new(tx, &self.minter, self.clock.as_ref()).create_entity(
                entity_type,
                canonical_name,
                status,
            )
        })
    }

    pub fn get_entity(&self, syn_id: &str) -> OntologyResult<Option<Entity>> {
        let conn = self.store.checkout()?;
        EntityRegistry::new(&conn, &self.minter, self.clock.as_ref()).get_entity(syn_id)
    }

    /// Cached entity read. The view shape (identifier/alias sections) is part
    /// of the cache key; a hit skips the store entirely.
    pub fn get_entity_view(
        &self,
        syn_id: &str,
        include_identifiers: bool,
        include_aliases: bool,
    ) -> OntologyResult<Option<EntityView>> {
        if !validate_syn_id(syn_id) {
            return Ok(None);
        }

        let key = EntityCache::view_key(syn_id, include_identifiers, include_aliases);
        if let Some(payload) = self.cache.get(&key) {
            match serde_json::from_str(&payload) {
                Ok(view) => return Ok(Some(view)),
                Err(e) => warn!("[service] Discarding undecodable cache entry {key}: {e}"),
            }
        }

        let conn = self.store.checkout()?;
        let registry = EntityRegistry::new(&conn, &self.minter, self.clock.as_ref());
        let Some(entity) = registry.get_entity(syn_id)? else {
            return Ok(None);
        };

        let view = EntityView {
            syn_id: entity.syn_id,
            entity_type: entity.entity_type,
            canonical_name: entity.canonical_name,
            status: entity.status,
            replaces: entity.replaces,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            identifiers: if include_identifiers {
                Some(registry.get_identifiers(syn_id, true)?)
            } else {
                None
            },
            aliases: if include_aliases {
                Some(registry.get_aliases(syn_id)?)
            } else {
                None
            },
        };

        match serde_json::to_string(&view) {
            Ok(payload) => self.cache.set(&key, payload),
            Err(e) => warn!("[service] Not caching view for {syn_id}: {e}"),
        }
        Ok(Some(view))
    }

    pub fn add_identifier(
        &self,
        syn_id: &str,
        scheme: &str,
        value: &str,
        valid_from: Option<DateTime<Utc>>,
    ) -> OntologyResult<()> {
        self.write_tx(|tx| {
            EntityRegistry::new(tx, &self.minter, self.clock.as_ref())
                .add_identifier(syn_id, scheme, value, valid_from)
        })?;
        self.cache.invalidate_entity(syn_id);
        Ok(())
    }

    pub fn add_alias(
        &self,
        syn_id: &str,
        alias: &str,
        lang: Option<&str>,
        source: Option<&str>,
        confidence: f64,
    ) -> OntologyResult<()> {
        self.write_tx(|tx| {
            EntityRegistry::new(tx, &self.minter, self.clock.as_ref())
                .add_alias(syn_id, alias, lang, source, confidence)
        })?;
        self.cache.invalidate_entity(syn_id);
        Ok(())
    }

    /// As-of identifier resolution. Fails with `NotFound` when no interval
    /// covers the instant.
    pub fn resolve_identifier(
        &self,
        scheme: &str,
        value: &str,
        asof: Option<DateTime<Utc>>,
    ) -> OntologyResult<ResolvedIdentifier> {
        let conn = self.store.checkout()?;
        EntityRegistry::new(&conn, &self.minter, self.clock.as_ref())
            .resolve_identifier(scheme, value, asof)?
            .ok_or_else(|| OntologyError::NotFound(format!("No entity found for {scheme}:{value}")))
    }

    pub fn get_identifiers(
        &self,
        syn_id: &str,
        active_only: bool,
    ) -> OntologyResult<Vec<IdentifierRecord>> {
        let conn = self.store.checkout()?;
        EntityRegistry::new(&conn, &self.minter, self.clock.as_ref())
            .get_identifiers(syn_id, active_only)
    }

    pub fn get_aliases(&self, syn_id: &str) -> OntologyResult<Vec<AliasRecord>> {
        let conn = self.store.checkout()?;
        EntityRegistry::new(&conn, &self.minter, self.clock.as_ref()).get_aliases(syn_id)
    }

    pub fn search_by_name(&self, query: &str, limit: i64) -> OntologyResult<Vec<NameSearchHit>> {
        let conn = self.store.checkout()?;
        EntityRegistry::new(&conn, &self.minter, self.clock.as_ref()).search_by_name(query, limit)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Edge operations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_edge(&self, input: &EdgeInput) -> OntologyResult<(bool, bool)> {
        let outcome =
            self.write_tx(|tx| EdgeManager::new(tx, self.clock.as_ref()).add_edge(input))?;
        self.cache.invalidate_entity(&input.src_syn_id);
        self.cache.invalidate_entity(&input.dst_syn_id);
        Ok(outcome)
    }

    /// Atomic batch of edge writes (1..=1000 items).
    pub fn add_edges(&self, inputs: &[EdgeInput]) -> OntologyResult<BatchOutcome> {
        check_batch_size(inputs.len())?;

        let mut conn = self.store.checkout()?;
        let tx = conn.transaction()?;
        let manager = EdgeManager::new(&tx, self.clock.as_ref());

        let mut inserted = 0;
        let mut updated = 0;
        let mut errors = Vec::new();
        for (index, input) in inputs.iter().enumerate() {
            match manager.add_edge(input) {
                Ok((true, _)) => inserted += 1,
                Ok((_, true)) => updated += 1,
                Ok(_) => {}
                Err(e) => errors.push(BatchItemError {
                    index,
                    detail: e.to_string(),
                }),
            }
        }

        if !errors.is_empty() {
            drop(manager);
            tx.rollback()?;
            warn!(
                "[service] Edge batch rolled back: {} error(s) across {} item(s)",
                errors.len(),
                inputs.len()
            );
            return Ok(BatchOutcome {
                inserted: 0,
                updated: 0,
                errors,
                rolled_back: true,
                total_processed: inputs.len(),
            });
        }

        drop(manager);
        tx.commit()?;

        let affected: BTreeSet<&str> = inputs
            .iter()
            .flat_map(|e| [e.src_syn_id.as_str(), e.dst_syn_id.as_str()])
            .collect();
        for syn_id in affected {
            self.cache.invalidate_entity(syn_id);
        }

        Ok(BatchOutcome {
            inserted,
            updated,
            errors: Vec::new(),
            rolled_back: false,
            total_processed: inputs.len(),
        })
    }

    pub fn get_edges(&self, query: &EdgeQuery) -> OntologyResult<Vec<EdgeRecord>> {
        let conn = self.store.checkout()?;
        EdgeManager::new(&conn, self.clock.as_ref()).get_edges(query)
    }

    pub fn delete_edge(
        &self,
        src_syn_id: &str,
        dst_syn_id: &str,
        rel_type: &str,
        valid_to: Option<DateTime<Utc>>,
    ) -> OntologyResult<bool> {
        let closed = self.write_tx(|tx| {
            EdgeManager::new(tx, self.clock.as_ref())
                .delete_edge(src_syn_id, dst_syn_id, rel_type, valid_to)
        })?;
        if closed {
            self.cache.invalidate_entity(src_syn_id);
            self.cache.invalidate_entity(dst_syn_id);
        }
        Ok(closed)
    }

    pub fn get_edge_stats(&self) -> OntologyResult<EdgeStats> {
        let conn = self.store.checkout()?;
        EdgeManager::new(&conn, self.clock.as_ref()).get_edge_stats()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Attribute operations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn upsert_attribute(&self, input: &AttributeInput) -> OntologyResult<(bool, bool)> {
        let outcome = self
            .write_tx(|tx| AttributeManager::new(tx, self.clock.as_ref()).upsert_attribute(input))?;
        self.cache.invalidate_entity(&input.syn_id);
        Ok(outcome)
    }

    /// Atomic batch of attribute upserts (1..=1000 items).
    pub fn upsert_attributes(&self, inputs: &[AttributeInput]) -> OntologyResult<BatchOutcome> {
        check_batch_size(inputs.len())?;

        let mut conn = self.store.checkout()?;
        let tx = conn.transaction()?;
        let manager = AttributeManager::new(&tx, self.clock.as_ref());

        let mut inserted = 0;
        let mut updated = 0;
        let mut errors = Vec::new();
        for (index, input) in inputs.iter().enumerate() {
            match manager.upsert_attribute(input) {
                Ok((true, _)) => inserted += 1,
                Ok((_, true)) => updated += 1,
                Ok(_) => {}
                Err(e) => errors.push(BatchItemError {
                    index,
                    detail: e.to_string(),
                }),
            }
        }

        if !errors.is_empty() {
            drop(manager);
            tx.rollback()?;
            warn!(
                "[service] Attribute batch rolled back: {} error(s) across {} item(s)",
                errors.len(),
                inputs.len()
            );
            return Ok(BatchOutcome {
                inserted: 0,
                updated: 0,
                errors,
                rolled_back: true,
                total_processed: inputs.len(),
            });
        }

        drop(manager);
        tx.commit()?;

        let affected: BTreeSet<&str> = inputs.iter().map(|a| a.syn_id.as_str()).collect();
        for syn_id in affected {
            self.cache.invalidate_entity(syn_id);
        }

        Ok(BatchOutcome {
            inserted,
            updated,
            errors: Vec::new(),
            rolled_back: false,
            total_processed: inputs.len(),
        })
    }

    pub fn get_attributes(
        &self,
        syn_id: &str,
        key: Option<&str>,
        active_only: bool,
    ) -> OntologyResult<Vec<AttributeRecord>> {
        let conn = self.store.checkout()?;
        AttributeManager::new(&conn, self.clock.as_ref()).get_attributes(syn_id, key, active_only)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution & quarantine
    // ═══════════════════════════════════════════════════════════════════════

    /// Run the resolver cascade without side effects.
    pub fn resolve_text(
        &self,
        text: &str,
        entity_type_filter: Option<EntityType>,
    ) -> OntologyResult<(Option<Candidate>, Vec<Candidate>)> {
        let conn = self.store.checkout()?;
        EntityLinker::new(&conn, self.clock.as_ref(), self.linker_threshold)
            .resolve(text, entity_type_filter)
    }

    /// Resolve with high confidence or create a quarantine record. The
    /// quarantine write runs in its own transaction.
    pub fn resolve_or_quarantine(
        &self,
        text: &str,
        context: Option<Value>,
        entity_type_filter: Option<EntityType>,
    ) -> OntologyResult<Resolution> {
        let (best, quarantine_id) = self.write_tx(|tx| {
            EntityLinker::new(tx, self.clock.as_ref(), self.linker_threshold)
                .resolve_or_quarantine(text, context, entity_type_filter)
        })?;

        match (best, quarantine_id) {
            (Some(candidate), _) => Ok(Resolution::Resolved {
                syn_id: candidate.syn_id.clone(),
                candidate,
            }),
            (None, Some(quarantine_id)) => Ok(Resolution::Quarantined { quarantine_id }),
            (None, None) => Err(OntologyError::Storage(
                "resolver returned neither a winner nor a quarantine id".into(),
            )),
        }
    }

    pub fn get_quarantine_items(
        &self,
        resolved: bool,
        limit: i64,
        offset: i64,
    ) -> OntologyResult<(Vec<QuarantineItem>, i64)> {
        let conn = self.store.checkout()?;
        EntityLinker::new(&conn, self.clock.as_ref(), self.linker_threshold)
            .get_quarantine_items(resolved, limit, offset)
    }

    pub fn resolve_quarantine_item(
        &self,
        quarantine_id: i64,
        syn_id: &str,
        resolved_by: &str,
    ) -> OntologyResult<bool> {
        self.write_tx(|tx| {
            EntityLinker::new(tx, self.clock.as_ref(), self.linker_threshold)
                .resolve_quarantine_item(quarantine_id, syn_id, resolved_by)
        })
    }

    /// Score the resolver against a labeled gold set.
    pub fn calibrate(&self, cases: &[GoldCase]) -> OntologyResult<CalibrationReport> {
        calibration::evaluate(cases, |text| self.resolve_text(text, None))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stats
    // ═══════════════════════════════════════════════════════════════════════

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn get_stats(&self) -> OntologyResult<OntologyStats> {
        let conn = self.store.checkout()?;
        let count = |sql: &str| -> OntologyResult<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        let entities_total = count("SELECT COUNT(*) FROM entity_registry")?;
        let entities_active =
            count("SELECT COUNT(*) FROM entity_registry WHERE status = 'ACTIVE'")?;
        let identifiers_open = count("SELECT COUNT(*) FROM identifiers WHERE valid_to IS NULL")?;
        let aliases_total = count("SELECT COUNT(*) FROM aliases")?;
        let quarantine_unresolved =
            count("SELECT COUNT(*) FROM entity_quarantine WHERE resolved_syn_id IS NULL")?;
        let edges = EdgeManager::new(&conn, self.clock.as_ref()).get_edge_stats()?;

        Ok(OntologyStats {
            entities_total,
            entities_active,
            identifiers_open,
            aliases_total,
            quarantine_unresolved,
            edges,
            cache: self.cache.stats(),
        })
    }
}

fn check_batch_size(len: usize) -> OntologyResult<()> {
    if len == 0 {
        return Err(OntologyError::InvalidArgument(
            "Batch cannot be empty".into(),
        ));
    }
    if len > MAX_BATCH_SIZE {
        return Err(OntologyError::InvalidArgument(format!(
            "Batch size {len} exceeds maximum {MAX_BATCH_SIZE}"
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{AttributeValue, EdgeDirection, MatchMethod};
    use crate::engine::clock::FixedClock;
    use chrono::{Duration, TimeZone};

    fn test_service() -> (tempfile::TempDir, OntologyService, Arc<FixedClock>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OntologyConfig::for_db_path(dir.path().join("ontology.db"));
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
        ));
        let service = OntologyService::with_clock(config, clock.clone()).expect("service");
        (dir, service, clock)
    }

    fn edge(src: &str, dst: &str, rel_type: &str) -> EdgeInput {
        EdgeInput {
            src_syn_id: src.to_string(),
            dst_syn_id: dst.to_string(),
            rel_type: rel_type.to_string(),
            source: "manual".to_string(),
            confidence: 1.0,
            attrs: None,
            evidence: None,
            observed_at: None,
            valid_from: None,
        }
    }

    // ── E1: identifier uniqueness ───────────────────────────────────────────

    #[test]
    fn test_identifier_uniqueness_across_entities() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();
        svc.add_identifier(&c1, "TICKER", "ACME", None).unwrap();

        let c2 = svc
            .create_entity(EntityType::Company, "Acme Holdings", EntityStatus::Active)
            .unwrap();
        let err = svc.add_identifier(&c2, "TICKER", "ACME", None).unwrap_err();
        match err {
            OntologyError::IdentifierCollision { owner, .. } => assert_eq!(owner, c1),
            other => panic!("expected IdentifierCollision, got {other:?}"),
        }

        let resolved = svc.resolve_identifier("TICKER", "ACME", None).unwrap();
        assert_eq!(resolved.syn_id, c1);
    }

    // ── E2: SCD2 edge update ────────────────────────────────────────────────

    #[test]
    fn test_scd2_edge_update() {
        let (_dir, svc, clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();
        let ex1 = svc
            .create_entity(EntityType::Exchange, "NYSE", EntityStatus::Active)
            .unwrap();

        let base = edge(&c1, &ex1, "LISTED_ON");
        assert_eq!(svc.add_edge(&base).unwrap(), (true, false));
        assert_eq!(svc.add_edge(&base).unwrap(), (false, false));

        clock.advance(Duration::seconds(10));
        let changed = EdgeInput {
            confidence: 0.8,
            source: "openfigi".to_string(),
            ..base.clone()
        };
        assert_eq!(svc.add_edge(&changed).unwrap(), (false, true));

        let active = svc.get_edges(&EdgeQuery::outgoing(&c1)).unwrap();
        assert_eq!(active.len(), 1);
        assert!((active[0].confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(active[0].source, "openfigi");
        assert_eq!(active[0].related_name.as_deref(), Some("NYSE"));

        let history = svc
            .get_edges(&EdgeQuery {
                active_only: false,
                ..EdgeQuery::outgoing(&c1)
            })
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|e| e.valid_to.is_some()).count(), 1);
    }

    // ── E3: resolver cascade ────────────────────────────────────────────────

    fn seed_apple(svc: &OntologyService) -> String {
        let c1 = svc
            .create_entity(EntityType::Company, "Apple Inc.", EntityStatus::Active)
            .unwrap();
        svc.add_identifier(&c1, "TICKER", "AAPL", None).unwrap();
        svc.add_alias(&c1, "Apple", Some("en"), Some("seed"), 1.0)
            .unwrap();
        svc.add_alias(&c1, "AAPL Computer", Some("en"), Some("seed"), 0.9)
            .unwrap();
        c1
    }

    #[test]
    fn test_resolver_exact_ticker() {
        let (_dir, svc, _clock) = test_service();
        let c1 = seed_apple(&svc);

        let (best, _) = svc.resolve_text("AAPL", None).unwrap();
        let best = best.expect("ticker must resolve");
        assert_eq!(best.syn_id, c1);
        assert_eq!(best.matched_via, MatchMethod::Ticker);
        assert!((best.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolver_exact_alias() {
        let (_dir, svc, _clock) = test_service();
        let c1 = seed_apple(&svc);

        let (best, _) = svc.resolve_text("Apple", None).unwrap();
        let best = best.expect("alias must resolve");
        assert_eq!(best.syn_id, c1);
        assert_eq!(best.matched_via, MatchMethod::Alias);
        assert!((best.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolver_low_confidence_quarantines() {
        let (_dir, svc, _clock) = test_service();
        seed_apple(&svc);

        let outcome = svc.resolve_or_quarantine("appl", None, None).unwrap();
        let quarantine_id = match outcome {
            Resolution::Quarantined { quarantine_id } => quarantine_id,
            Resolution::Resolved { syn_id, .. } => {
                panic!("'appl' must not resolve, got {syn_id}")
            }
        };

        let (items, total) = svc.get_quarantine_items(false, 100, 0).unwrap();
        assert_eq!(total, 1);
        let item = items.iter().find(|i| i.id == quarantine_id).unwrap();
        assert!(
            item.reason.starts_with("Low confidence"),
            "unexpected reason: {}",
            item.reason
        );
        // The full candidate list rides along in the context.
        let context = item.context.as_ref().unwrap();
        assert!(context.get("candidates").is_some());
    }

    #[test]
    fn test_resolver_ambiguity_quarantines() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Widget Works", EntityStatus::Active)
            .unwrap();
        let c2 = svc
            .create_entity(EntityType::Company, "Widget World", EntityStatus::Active)
            .unwrap();
        svc.add_alias(&c1, "Widget", None, None, 0.90).unwrap();
        svc.add_alias(&c2, "Widget", None, None, 0.85).unwrap();

        let outcome = svc.resolve_or_quarantine("Widget", None, None).unwrap();
        let Resolution::Quarantined { quarantine_id } = outcome else {
            panic!("two near-tied candidates must quarantine");
        };

        let (items, _) = svc.get_quarantine_items(false, 100, 0).unwrap();
        let item = items.iter().find(|i| i.id == quarantine_id).unwrap();
        assert_eq!(item.reason, "Ambiguous: 2 candidates with similar confidence");
    }

    #[test]
    fn test_resolver_no_candidates_quarantines() {
        let (_dir, svc, _clock) = test_service();
        seed_apple(&svc);

        let outcome = svc
            .resolve_or_quarantine("totally unknown co", None, None)
            .unwrap();
        let quarantine_id = match outcome {
            Resolution::Quarantined { quarantine_id } => quarantine_id,
            Resolution::Resolved { syn_id, .. } => panic!("must quarantine, got {syn_id}"),
        };

        let (items, _) = svc.get_quarantine_items(false, 100, 0).unwrap();
        let item = items.iter().find(|i| i.id == quarantine_id).unwrap();
        assert_eq!(item.reason, "No candidates found");
    }

    #[test]
    fn test_resolver_type_filter() {
        let (_dir, svc, _clock) = test_service();
        let c1 = seed_apple(&svc);

        let (best, _) = svc
            .resolve_text("AAPL", Some(EntityType::Company))
            .unwrap();
        assert_eq!(best.unwrap().syn_id, c1);

        let (best, candidates) = svc
            .resolve_text("AAPL", Some(EntityType::Exchange))
            .unwrap();
        assert!(best.is_none());
        assert!(candidates.is_empty());
    }

    // ── E4: temporal resolution ─────────────────────────────────────────────

    #[test]
    fn test_temporal_identifier_resolution() {
        let (_dir, svc, clock) = test_service();
        let t0 = clock.now();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();
        svc.add_identifier(&c1, "TICKER", "OLD", None).unwrap();

        clock.advance(Duration::days(1));
        let t1 = clock.now();
        svc.add_identifier(&c1, "TICKER", "NEW", None).unwrap();

        // As of just after T0 the old ticker still resolves.
        let resolved = svc
            .resolve_identifier("TICKER", "OLD", Some(t0 + Duration::minutes(1)))
            .unwrap();
        assert_eq!(resolved.syn_id, c1);
        assert_eq!(resolved.valid_to, Some(t1));

        // After the close-then-insert at T1 it no longer does.
        let err = svc
            .resolve_identifier("TICKER", "OLD", Some(t1 + Duration::minutes(1)))
            .unwrap_err();
        assert!(matches!(err, OntologyError::NotFound(_)));

        let resolved = svc.resolve_identifier("TICKER", "NEW", None).unwrap();
        assert_eq!(resolved.syn_id, c1);
        assert_eq!(resolved.valid_to, None);
    }

    // ── E5: batch atomicity ─────────────────────────────────────────────────

    #[test]
    fn test_edge_batch_rolls_back_on_any_error() {
        let (_dir, svc, _clock) = test_service();
        let a = svc
            .create_entity(EntityType::Company, "A Corp", EntityStatus::Active)
            .unwrap();
        let b = svc
            .create_entity(EntityType::Company, "B Corp", EntityStatus::Active)
            .unwrap();
        let c = svc
            .create_entity(EntityType::Company, "C Corp", EntityStatus::Active)
            .unwrap();

        let batch = vec![edge(&a, &b, "SUPPLIES"), edge(&b, &b, "SUPPLIES"), edge(&a, &c, "SUPPLIES")];
        let outcome = svc.add_edges(&batch).unwrap();
        assert!(outcome.rolled_back);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);

        // Nothing from the failed batch persisted.
        assert!(svc.get_edges(&EdgeQuery::outgoing(&a)).unwrap().is_empty());

        // Retrying with only the valid items succeeds.
        let outcome = svc
            .add_edges(&[edge(&a, &b, "SUPPLIES"), edge(&a, &c, "SUPPLIES")])
            .unwrap();
        assert!(!outcome.rolled_back);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(svc.get_edges(&EdgeQuery::outgoing(&a)).unwrap().len(), 2);
    }

    #[test]
    fn test_batch_size_boundaries() {
        let (_dir, svc, _clock) = test_service();
        let a = svc
            .create_entity(EntityType::Company, "A Corp", EntityStatus::Active)
            .unwrap();
        let b = svc
            .create_entity(EntityType::Company, "B Corp", EntityStatus::Active)
            .unwrap();

        assert!(matches!(
            svc.add_edges(&[]).unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));

        let too_many: Vec<EdgeInput> = (0..1001).map(|i| edge(&a, &b, &format!("REL_{i}"))).collect();
        assert!(matches!(
            svc.add_edges(&too_many).unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));

        let max_batch: Vec<EdgeInput> =
            (0..1000).map(|i| edge(&a, &b, &format!("REL_{i}"))).collect();
        let outcome = svc.add_edges(&max_batch).unwrap();
        assert!(!outcome.rolled_back);
        assert_eq!(outcome.inserted, 1000);
    }

    // ── E6: cache invalidation ──────────────────────────────────────────────

    #[test]
    fn test_cache_invalidation_on_alias_write() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Apple Inc.", EntityStatus::Active)
            .unwrap();

        let view = svc.get_entity_view(&c1, true, true).unwrap().unwrap();
        assert!(view.aliases.unwrap().is_empty());

        svc.add_alias(&c1, "AppleCo", None, None, 1.0).unwrap();

        let view = svc.get_entity_view(&c1, true, true).unwrap().unwrap();
        let aliases = view.aliases.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "AppleCo");
    }

    #[test]
    fn test_cached_view_served_without_store_change() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Apple Inc.", EntityStatus::Active)
            .unwrap();

        assert!(svc.get_entity_view(&c1, false, false).unwrap().is_some());
        assert!(svc.get_entity_view(&c1, false, false).unwrap().is_some());
        let stats = svc.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_keys, 1);
    }

    // ── Idempotence & boundaries ────────────────────────────────────────────

    #[test]
    fn test_delete_edge_idempotent() {
        let (_dir, svc, _clock) = test_service();
        let a = svc
            .create_entity(EntityType::Company, "A Corp", EntityStatus::Active)
            .unwrap();
        let b = svc
            .create_entity(EntityType::Exchange, "NYSE", EntityStatus::Active)
            .unwrap();
        svc.add_edge(&edge(&a, &b, "LISTED_ON")).unwrap();

        assert!(svc.delete_edge(&a, &b, "LISTED_ON", None).unwrap());
        assert!(!svc.delete_edge(&a, &b, "LISTED_ON", None).unwrap());
        assert!(svc.get_edges(&EdgeQuery::outgoing(&a)).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_upsert_scd2() {
        let (_dir, svc, clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();

        let attr = AttributeInput {
            syn_id: c1.clone(),
            key: "sector".to_string(),
            value: AttributeValue::String("Technology".to_string()),
            source: "manual".to_string(),
            confidence: 1.0,
            observed_at: None,
            valid_from: None,
        };
        assert_eq!(svc.upsert_attribute(&attr).unwrap(), (true, false));
        assert_eq!(svc.upsert_attribute(&attr).unwrap(), (false, false));

        clock.advance(Duration::seconds(30));
        let changed = AttributeInput {
            value: AttributeValue::String("Industrials".to_string()),
            ..attr.clone()
        };
        assert_eq!(svc.upsert_attribute(&changed).unwrap(), (false, true));

        let active = svc.get_attributes(&c1, Some("sector"), true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0].value,
            AttributeValue::String("Industrials".to_string())
        );

        let history = svc.get_attributes(&c1, Some("sector"), false).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_confidence_boundaries() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();

        assert!(svc.add_alias(&c1, "edge low", None, None, 0.0).is_ok());
        assert!(svc.add_alias(&c1, "edge high", None, None, 1.0).is_ok());
        assert!(matches!(
            svc.add_alias(&c1, "below", None, None, -0.001).unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));
        assert!(matches!(
            svc.add_alias(&c1, "above", None, None, 1.001).unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_create_entity_rejects_blank_name() {
        let (_dir, svc, _clock) = test_service();
        assert!(matches!(
            svc.create_entity(EntityType::Company, "   ", EntityStatus::Active)
                .unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_self_edge_rejected() {
        let (_dir, svc, _clock) = test_service();
        let a = svc
            .create_entity(EntityType::Company, "A Corp", EntityStatus::Active)
            .unwrap();
        assert!(matches!(
            svc.add_edge(&edge(&a, &a, "OWNS")).unwrap_err(),
            OntologyError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_search_by_name() {
        let (_dir, svc, _clock) = test_service();
        svc.create_entity(EntityType::Company, "Apple Inc.", EntityStatus::Active)
            .unwrap();
        svc.create_entity(EntityType::Company, "Microsoft Corporation", EntityStatus::Active)
            .unwrap();

        let hits = svc.search_by_name("apple", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].canonical_name, "Apple Inc.");

        assert!(svc.search_by_name("", 10).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_entities_do_not_resolve() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Ghost Corp", EntityStatus::Inactive)
            .unwrap();
        svc.add_alias(&c1, "Ghost", None, None, 1.0).unwrap();

        let (best, candidates) = svc.resolve_text("Ghost", None).unwrap();
        assert!(best.is_none());
        assert!(candidates.is_empty());
        assert!(svc.search_by_name("Ghost", 10).unwrap().is_empty());
    }

    #[test]
    fn test_quarantine_manual_binding() {
        let (_dir, svc, _clock) = test_service();
        let c1 = svc
            .create_entity(EntityType::Company, "Acme", EntityStatus::Active)
            .unwrap();

        let Resolution::Quarantined { quarantine_id } = svc
            .resolve_or_quarantine("mystery mention", None, None)
            .unwrap()
        else {
            panic!("must quarantine");
        };

        assert!(svc
            .resolve_quarantine_item(quarantine_id, &c1, "ops@nexus")
            .unwrap());
        // Second binding of the same item is a no-op.
        assert!(!svc
            .resolve_quarantine_item(quarantine_id, &c1, "ops@nexus")
            .unwrap());

        let (unresolved, total_unresolved) = svc.get_quarantine_items(false, 100, 0).unwrap();
        assert!(unresolved.is_empty());
        assert_eq!(total_unresolved, 0);

        let (resolved, total_resolved) = svc.get_quarantine_items(true, 100, 0).unwrap();
        assert_eq!(total_resolved, 1);
        assert_eq!(resolved[0].resolved_syn_id.as_deref(), Some(c1.as_str()));
        assert_eq!(resolved[0].resolved_by.as_deref(), Some("ops@nexus"));
    }

    #[test]
    fn test_stats_aggregation() {
        let (_dir, svc, _clock) = test_service();
        let c1 = seed_apple(&svc);
        let ex1 = svc
            .create_entity(EntityType::Exchange, "NASDAQ", EntityStatus::Active)
            .unwrap();
        svc.add_edge(&edge(&c1, &ex1, "LISTED_ON")).unwrap();

        let stats = svc.get_stats().unwrap();
        assert_eq!(stats.entities_total, 2);
        assert_eq!(stats.entities_active, 2);
        assert_eq!(stats.identifiers_open, 1);
        assert_eq!(stats.aliases_total, 2);
        assert_eq!(stats.edges.total_active, 1);
        assert_eq!(stats.edges.by_type[0].rel_type, "LISTED_ON");
    }

    #[test]
    fn test_calibration_over_seeded_registry() {
        let (_dir, svc, _clock) = test_service();
        seed_apple(&svc);

        let cases = vec![
            GoldCase {
                id: 1,
                text: "AAPL".to_string(),
                expected_syn_id: Some("any".to_string()),
                expected_name: Some("Apple Inc.".to_string()),
                expected_type: Some(EntityType::Company),
                expected_confidence: Some(1.0),
                expected_confidence_min: None,
                expected_confidence_max: None,
                category: Some("ticker".to_string()),
            },
            GoldCase {
                id: 2,
                text: "no such thing at all".to_string(),
                expected_syn_id: None,
                expected_name: None,
                expected_type: None,
                expected_confidence: None,
                expected_confidence_min: None,
                expected_confidence_max: None,
                category: Some("negative".to_string()),
            },
        ];

        let report = svc.calibrate(&cases).unwrap();
        assert_eq!(report.true_positives, 1);
        assert_eq!(report.true_negatives, 1);
        assert!(report.passes_gates());
    }
}
