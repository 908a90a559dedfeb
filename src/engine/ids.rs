// ── Engine: Synthetic IDs ───────────────────────────────────────────────────
// Durable entity identifiers: `{PREFIX}_{ULID}`.
//
// The two-letter prefix encodes the entity type for cheap debugging and
// routing; the ULID suffix is lexicographically sortable by mint time and
// carries 80 bits of randomness, so concurrent minters need no coordination.
//
// Format contract: `[A-Z]{2}_[0-9A-HJKMNP-TV-Z]{26}` — 29 characters total.
// Example: CO_01HQXYZ3F2M9RKWT5G8BCDEFGH

use std::sync::Arc;
use std::time::SystemTime;

use ulid::Ulid;

use crate::atoms::error::{OntologyError, OntologyResult};
use crate::atoms::types::EntityType;
use crate::engine::clock::Clock;

/// Fixed prefix per entity type. Part of the persisted contract — do not
/// reassign codes.
pub const PREFIX_MAP: [(EntityType, &str); 10] = [
    (EntityType::Company, "CO"),
    (EntityType::Security, "SE"),
    (EntityType::Exchange, "EX"),
    (EntityType::Index, "IX"),
    (EntityType::Person, "PE"),
    (EntityType::Org, "OR"),
    (EntityType::Sector, "SC"),
    (EntityType::Theme, "TH"),
    (EntityType::Commodity, "CM"),
    (EntityType::Fx, "FX"),
];

pub fn prefix_for(entity_type: EntityType) -> &'static str {
    PREFIX_MAP
        .iter()
        .find(|(t, _)| *t == entity_type)
        .map(|(_, p)| *p)
        .expect("every entity type has a prefix")
}

fn type_for_prefix(prefix: &str) -> Option<EntityType> {
    PREFIX_MAP
        .iter()
        .find(|(_, p)| *p == prefix)
        .map(|(t, _)| *t)
}

/// Mints syn_ids stamped from the injected clock.
#[derive(Clone)]
pub struct SynIdMinter {
    clock: Arc<dyn Clock>,
}

impl SynIdMinter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        SynIdMinter { clock }
    }

    /// Generate a syn_id for the given entity type (29 chars).
    pub fn mint(&self, entity_type: EntityType) -> String {
        let stamp = SystemTime::from(self.clock.now());
        let ulid = Ulid::from_datetime(stamp);
        format!("{}_{}", prefix_for(entity_type), ulid)
    }
}

/// Parse a syn_id into its entity type and sortable suffix.
pub fn parse_syn_id(syn_id: &str) -> OntologyResult<(EntityType, &str)> {
    let (prefix, suffix) = syn_id
        .split_once('_')
        .ok_or_else(|| OntologyError::InvalidArgument(format!("Invalid syn_id format: {syn_id}")))?;

    let entity_type = type_for_prefix(prefix)
        .ok_or_else(|| OntologyError::InvalidArgument(format!("Unknown syn_id prefix: {prefix}")))?;

    if suffix.len() != ulid::ULID_LEN {
        return Err(OntologyError::InvalidArgument(format!(
            "Invalid syn_id suffix length: {} (expected {})",
            suffix.len(),
            ulid::ULID_LEN
        )));
    }
    if Ulid::from_string(suffix).is_err() {
        return Err(OntologyError::InvalidArgument(format!(
            "Invalid syn_id suffix: {suffix}"
        )));
    }

    Ok((entity_type, suffix))
}

/// Non-throwing form of `parse_syn_id`.
pub fn validate_syn_id(syn_id: &str) -> bool {
    parse_syn_id(syn_id).is_ok()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::{FixedClock, SystemClock};
    use chrono::{Duration, TimeZone, Utc};

    fn minter() -> SynIdMinter {
        SynIdMinter::new(Arc::new(SystemClock))
    }

    #[test]
    fn test_mint_all_types_round_trip() {
        let m = minter();
        for entity_type in EntityType::ALL {
            let syn_id = m.mint(entity_type);
            assert_eq!(syn_id.len(), 29, "syn_id must be 29 chars: {syn_id}");
            let (parsed, suffix) = parse_syn_id(&syn_id).expect("minted id must parse");
            assert_eq!(parsed, entity_type);
            assert_eq!(suffix.len(), 26);
        }
    }

    #[test]
    fn test_mint_company_prefix() {
        let syn_id = minter().mint(EntityType::Company);
        assert!(syn_id.starts_with("CO_"));
    }

    #[test]
    fn test_minted_ids_unique() {
        let m = minter();
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| m.mint(EntityType::Company)).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_mint_time_ordering() {
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()));
        let m = SynIdMinter::new(clock.clone());
        let earlier = m.mint(EntityType::Company);
        clock.advance(Duration::seconds(5));
        let later = m.mint(EntityType::Company);
        assert!(earlier < later, "{earlier} should sort before {later}");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_syn_id("INVALID").is_err());
        assert!(parse_syn_id("").is_err());
        assert!(parse_syn_id("CO_TOOSHORT").is_err());
        // Unknown prefix with a plausible suffix.
        assert!(parse_syn_id("ZZ_01HQXYZ3F2M9RKWT5G8BCDEFGH").is_err());
    }

    #[test]
    fn test_validate_is_non_throwing_parse() {
        let syn_id = minter().mint(EntityType::Security);
        assert!(validate_syn_id(&syn_id));
        assert!(!validate_syn_id("SE_"));
        assert!(!validate_syn_id("notanid"));
    }
}
