// ── Engine: Configuration ───────────────────────────────────────────────────
// Environment-driven knobs for the store, cache, and resolver. Every knob is
// optional; defaults match the deployed service.
//
//   ONTOLOGY_DB_PATH                  — SQLite database file (default ./ontology.db)
//   ONTOLOGY_DB_STATEMENT_TIMEOUT_MS  — per-checkout statement budget (5000)
//   ONTOLOGY_DB_POOL_MIN              — idle connections kept warm (2)
//   ONTOLOGY_DB_POOL_MAX              — pool ceiling (10)
//   ONTOLOGY_DB_POOL_WAIT_MS          — waiter timeout before Unavailable (5000)
//   ONTOLOGY_CACHE_TTL_SECS           — entity view TTL before jitter (3600)
//   ONTOLOGY_CACHE_CAPACITY           — bounded entry count (10000)
//   ONTOLOGY_LINKER_THRESHOLD         — resolver operating threshold (0.95)

use std::path::PathBuf;
use std::time::Duration;

use crate::atoms::constants::CONFIDENCE_THRESHOLD;

#[derive(Debug, Clone)]
pub struct OntologyConfig {
    pub db_path: PathBuf,
    pub statement_timeout: Duration,
    pub pool_min: u32,
    pub pool_max: u32,
    pub pool_wait: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub linker_threshold: f64,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        OntologyConfig {
            db_path: PathBuf::from("./ontology.db"),
            statement_timeout: Duration::from_millis(5000),
            pool_min: 2,
            pool_max: 10,
            pool_wait: Duration::from_millis(5000),
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 10_000,
            linker_threshold: CONFIDENCE_THRESHOLD,
        }
    }
}

impl OntologyConfig {
    /// Read configuration from the environment, falling back to defaults for
    /// unset or unparseable values.
    pub fn from_env() -> Self {
        let d = OntologyConfig::default();
        OntologyConfig {
            db_path: std::env::var("ONTOLOGY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            statement_timeout: env_u64("ONTOLOGY_DB_STATEMENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.statement_timeout),
            pool_min: env_u64("ONTOLOGY_DB_POOL_MIN")
                .map(|v| v as u32)
                .unwrap_or(d.pool_min),
            pool_max: env_u64("ONTOLOGY_DB_POOL_MAX")
                .map(|v| v as u32)
                .unwrap_or(d.pool_max),
            pool_wait: env_u64("ONTOLOGY_DB_POOL_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.pool_wait),
            cache_ttl: env_u64("ONTOLOGY_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.cache_ttl),
            cache_capacity: env_u64("ONTOLOGY_CACHE_CAPACITY")
                .map(|v| v as usize)
                .unwrap_or(d.cache_capacity),
            linker_threshold: std::env::var("ONTOLOGY_LINKER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(d.linker_threshold),
        }
    }

    /// Configuration pointing at a throwaway database, for tests.
    pub fn for_db_path(path: impl Into<PathBuf>) -> Self {
        OntologyConfig {
            db_path: path.into(),
            ..OntologyConfig::default()
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployed_service() {
        let cfg = OntologyConfig::default();
        assert_eq!(cfg.pool_min, 2);
        assert_eq!(cfg.pool_max, 10);
        assert_eq!(cfg.statement_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.cache_capacity, 10_000);
        assert!((cfg.linker_threshold - 0.95).abs() < f64::EPSILON);
    }
}
