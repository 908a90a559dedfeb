// ── Engine: Linker Calibration ──────────────────────────────────────────────
// Quality metrics for the resolver over a labeled gold set: precision,
// recall, F1, accuracy, and Brier score (mean squared confidence error over
// resolved cases).
//
// The orchestration (loading the gold set, scheduling weekly runs,
// publishing) lives outside the core; this module is the metric computation
// those harnesses call.
//
// Quality gates: precision ≥ 0.95, recall ≥ 0.70, brier ≤ 0.10.

use serde::Deserialize;
use serde::Serialize;

use crate::atoms::error::OntologyResult;
use crate::atoms::types::{Candidate, EntityType};

/// One labeled test case. `expected_syn_id = None` means the mention must
/// NOT resolve (quarantine is the correct outcome).
#[derive(Debug, Clone, Deserialize)]
pub struct GoldCase {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub expected_syn_id: Option<String>,
    #[serde(default)]
    pub expected_name: Option<String>,
    #[serde(default)]
    pub expected_type: Option<EntityType>,
    #[serde(default)]
    pub expected_confidence: Option<f64>,
    #[serde(default)]
    pub expected_confidence_min: Option<f64>,
    #[serde(default)]
    pub expected_confidence_max: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Absolute tolerance when a case pins an exact expected confidence.
const EXPECTED_CONFIDENCE_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: i64,
    pub text: String,
    pub expected_match: bool,
    pub resolved: bool,
    pub correct: bool,
    pub error: Option<String>,
    pub syn_id: Option<String>,
    pub canonical_name: Option<String>,
    pub confidence: f64,
    pub num_candidates: usize,
    pub brier_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub brier_score: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub total_cases: usize,
    pub results: Vec<CaseResult>,
}

impl CalibrationReport {
    pub fn precision_gate(&self) -> bool {
        self.precision >= 0.95
    }

    pub fn recall_gate(&self) -> bool {
        self.recall >= 0.70
    }

    pub fn brier_gate(&self) -> bool {
        self.brier_score <= 0.10
    }

    pub fn passes_gates(&self) -> bool {
        self.precision_gate() && self.recall_gate() && self.brier_gate()
    }
}

/// Run every gold case through `resolve` and aggregate the confusion counts.
/// `resolve` is the resolver entry point: text in, `(best, candidates)` out.
pub fn evaluate<F>(cases: &[GoldCase], mut resolve: F) -> OntologyResult<CalibrationReport>
where
    F: FnMut(&str) -> OntologyResult<(Option<Candidate>, Vec<Candidate>)>,
{
    let mut results = Vec::with_capacity(cases.len());
    let (mut tp, mut fp, mut fn_, mut tn) = (0usize, 0usize, 0usize, 0usize);
    let mut brier_scores = Vec::new();

    for case in cases {
        let (best, candidates) = resolve(&case.text)?;
        let result = score_case(case, best.as_ref(), candidates.len());

        match (result.correct, result.expected_match) {
            (true, true) => tp += 1,
            (true, false) => tn += 1,
            (false, true) => fn_ += 1,
            (false, false) => fp += 1,
        }
        if let Some(b) = result.brier_score {
            brier_scores.push(b);
        }
        results.push(result);
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let total = tp + fp + fn_ + tn;
    let accuracy = ratio(tp + tn, total);
    let brier_score = if brier_scores.is_empty() {
        0.0
    } else {
        brier_scores.iter().sum::<f64>() / brier_scores.len() as f64
    };

    Ok(CalibrationReport {
        precision,
        recall,
        f1,
        accuracy,
        brier_score,
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        true_negatives: tn,
        total_cases: total,
        results,
    })
}

fn score_case(case: &GoldCase, best: Option<&Candidate>, num_candidates: usize) -> CaseResult {
    let expected_match = case.expected_syn_id.is_some();

    let (correct, error) = if expected_match {
        match best {
            None => (false, Some("Failed to resolve (quarantined)".to_string())),
            Some(c) => {
                if case
                    .expected_name
                    .as_deref()
                    .is_some_and(|n| n != c.canonical_name)
                {
                    (
                        false,
                        Some(format!("Resolved to wrong entity: {}", c.canonical_name)),
                    )
                } else if case.expected_type.is_some_and(|t| t != c.entity_type) {
                    (
                        false,
                        Some(format!("Resolved to wrong type: {}", c.entity_type)),
                    )
                } else if case.expected_confidence.is_some_and(|e| {
                    (c.confidence - e).abs() > EXPECTED_CONFIDENCE_TOLERANCE
                }) {
                    (
                        false,
                        Some(format!(
                            "Confidence mismatch: {} vs {}",
                            c.confidence,
                            case.expected_confidence.unwrap()
                        )),
                    )
                } else if case
                    .expected_confidence_min
                    .is_some_and(|min| c.confidence < min)
                {
                    (
                        false,
                        Some(format!(
                            "Confidence too low: {} < {}",
                            c.confidence,
                            case.expected_confidence_min.unwrap()
                        )),
                    )
                } else {
                    (true, None)
                }
            }
        }
    } else {
        match best {
            None => (true, None),
            Some(c)
                if case
                    .expected_confidence_max
                    .is_some_and(|max| c.confidence <= max) =>
            {
                (true, None)
            }
            Some(c) => (
                false,
                Some(format!("Incorrectly resolved to: {}", c.canonical_name)),
            ),
        }
    };

    // Brier term only applies where a resolution was produced for an
    // expected match: (confidence - actual)², actual ∈ {0, 1}.
    let brier_score = match (best, expected_match) {
        (Some(c), true) => {
            let actual = if correct { 1.0 } else { 0.0 };
            Some((c.confidence - actual).powi(2))
        }
        _ => None,
    };

    CaseResult {
        id: case.id,
        text: case.text.clone(),
        expected_match,
        resolved: best.is_some(),
        correct,
        error,
        syn_id: best.map(|c| c.syn_id.clone()),
        canonical_name: best.map(|c| c.canonical_name.clone()),
        confidence: best.map(|c| c.confidence).unwrap_or(0.0),
        num_candidates,
        brier_score,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::MatchMethod;

    fn candidate(syn_id: &str, name: &str, confidence: f64) -> Candidate {
        Candidate {
            syn_id: syn_id.to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Company,
            matched_via: MatchMethod::Ticker,
            matched_value: name.to_string(),
            confidence,
        }
    }

    fn gold(id: i64, text: &str, expected_syn_id: Option<&str>) -> GoldCase {
        GoldCase {
            id,
            text: text.to_string(),
            expected_syn_id: expected_syn_id.map(String::from),
            expected_name: None,
            expected_type: None,
            expected_confidence: None,
            expected_confidence_min: None,
            expected_confidence_max: None,
            category: None,
        }
    }

    #[test]
    fn test_perfect_resolver_passes_gates() {
        let cases = vec![
            gold(1, "AAPL", Some("CO_A")),
            gold(2, "garbage input", None),
        ];
        let report = evaluate(&cases, |text| {
            if text == "AAPL" {
                let c = candidate("CO_A", "Apple Inc.", 1.0);
                Ok((Some(c.clone()), vec![c]))
            } else {
                Ok((None, vec![]))
            }
        })
        .unwrap();

        assert_eq!(report.true_positives, 1);
        assert_eq!(report.true_negatives, 1);
        assert!((report.precision - 1.0).abs() < f64::EPSILON);
        assert!((report.recall - 1.0).abs() < f64::EPSILON);
        assert!(report.brier_score < 1e-9);
        assert!(report.passes_gates());
    }

    #[test]
    fn test_false_positive_hits_precision_and_brier() {
        let cases = vec![gold(1, "something", None)];
        let report = evaluate(&cases, |_| {
            let c = candidate("CO_Z", "Wrong Corp", 0.97);
            Ok((Some(c.clone()), vec![c]))
        })
        .unwrap();

        assert_eq!(report.false_positives, 1);
        assert!((report.precision - 0.0).abs() < f64::EPSILON);
        assert!(!report.passes_gates());
    }

    #[test]
    fn test_missed_match_counts_as_false_negative() {
        let cases = vec![gold(1, "Apple", Some("CO_A"))];
        let report = evaluate(&cases, |_| Ok((None, vec![]))).unwrap();

        assert_eq!(report.false_negatives, 1);
        assert!((report.recall - 0.0).abs() < f64::EPSILON);
        assert!(!report.recall_gate());
    }

    #[test]
    fn test_confidence_mismatch_is_incorrect() {
        let mut case = gold(1, "AAPL", Some("CO_A"));
        case.expected_confidence = Some(1.0);
        let report = evaluate(&[case], |_| {
            let c = candidate("CO_A", "Apple Inc.", 0.80);
            Ok((Some(c.clone()), vec![c]))
        })
        .unwrap();

        assert!(!report.results[0].correct);
        // Brier term: (0.80 - 0.0)² = 0.64.
        assert!((report.brier_score - 0.64).abs() < 1e-9);
    }
}
