use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::random::RandomSource;
use crate::{CarbonError, RawEmissionInput};

/// Plausible range for a per-page estimate; anything outside is clipped.
pub const CANONICAL_MIN_G: f64 = 0.01;
pub const CANONICAL_MAX_G: f64 = 2.0;

/// Reported figures above this are treated as totals over [`AGGREGATE_PAGE_LOADS`].
pub const AGGREGATE_THRESHOLD: f64 = 1000.0;
pub const AGGREGATE_PAGE_LOADS: f64 = 10_000.0;
/// Reported figures below this are already grams per page.
pub const GRAMS_CEILING: f64 = 10.0;
pub const MG_PER_G: f64 = 1000.0;

pub const SCORE_BEST_G: f64 = 0.05;
pub const SCORE_WORST_G: f64 = 1.5;
const SCORE_SPAN_G: f64 = 1.45;

pub const PLACEHOLDER_MIN_G: f64 = 0.05;
pub const PLACEHOLDER_MAX_G: f64 = 1.0;

/// Where a canonical value came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Reported,
    ScoreDerived,
    Placeholder,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Reported => "reported",
            Provenance::ScoreDerived => "score_derived",
            Provenance::Placeholder => "placeholder",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizationRuleInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provenance: Provenance,
}

/// The rule that turned a raw input into grams per page view. First match wins,
/// in declaration order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "id")]
pub enum NormalizationRule {
    #[serde(rename = "carbon.reported.aggregate.v1")]
    ReportedAggregateV1,
    #[serde(rename = "carbon.reported.grams.v1")]
    ReportedGramsV1,
    #[serde(rename = "carbon.reported.milligrams.v1")]
    ReportedMilligramsV1,
    #[serde(rename = "carbon.score.inverse_linear.v1")]
    ScoreInverseLinearV1,
    #[serde(rename = "carbon.placeholder.uniform.v1")]
    PlaceholderUniformV1,
}

impl NormalizationRule {
    pub const ALL: [NormalizationRule; 5] = [
        NormalizationRule::ReportedAggregateV1,
        NormalizationRule::ReportedGramsV1,
        NormalizationRule::ReportedMilligramsV1,
        NormalizationRule::ScoreInverseLinearV1,
        NormalizationRule::PlaceholderUniformV1,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            NormalizationRule::ReportedAggregateV1 => "carbon.reported.aggregate.v1",
            NormalizationRule::ReportedGramsV1 => "carbon.reported.grams.v1",
            NormalizationRule::ReportedMilligramsV1 => "carbon.reported.milligrams.v1",
            NormalizationRule::ScoreInverseLinearV1 => "carbon.score.inverse_linear.v1",
            NormalizationRule::PlaceholderUniformV1 => "carbon.placeholder.uniform.v1",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NormalizationRule::ReportedAggregateV1 => "Reported aggregate",
            NormalizationRule::ReportedGramsV1 => "Reported grams per page",
            NormalizationRule::ReportedMilligramsV1 => "Reported milligrams per page",
            NormalizationRule::ScoreInverseLinearV1 => "Score (inverse linear)",
            NormalizationRule::PlaceholderUniformV1 => "Placeholder",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NormalizationRule::ReportedAggregateV1 => {
                "Figures above 1000 are milligram totals over 10 000 page loads."
            }
            NormalizationRule::ReportedGramsV1 => "Figures below 10 are grams per page, unchanged.",
            NormalizationRule::ReportedMilligramsV1 => {
                "Figures in [10, 1000] are milligrams per page."
            }
            NormalizationRule::ScoreInverseLinearV1 => {
                "Score 100 maps to 0.05 g and score 0 to 1.5 g, linear in between."
            }
            NormalizationRule::PlaceholderUniformV1 => {
                "No usable figure: uniform value in [0.05, 1.0] g. Not an estimate."
            }
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            NormalizationRule::ReportedAggregateV1
            | NormalizationRule::ReportedGramsV1
            | NormalizationRule::ReportedMilligramsV1 => Provenance::Reported,
            NormalizationRule::ScoreInverseLinearV1 => Provenance::ScoreDerived,
            NormalizationRule::PlaceholderUniformV1 => Provenance::Placeholder,
        }
    }

    pub fn default_for_id(id: &str) -> Option<Self> {
        let normalized = id.trim();
        Self::ALL.into_iter().find(|rule| rule.id() == normalized)
    }
}

pub fn list_normalization_rules() -> Vec<NormalizationRuleInfo> {
    NormalizationRule::ALL
        .into_iter()
        .map(|rule| NormalizationRuleInfo {
            id: rule.id().to_string(),
            name: rule.name().to_string(),
            description: rule.description().to_string(),
            provenance: rule.provenance(),
        })
        .collect()
}

/// Grams of CO₂ per page view, always within `[CANONICAL_MIN_G, CANONICAL_MAX_G]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalEmission {
    grams: f64,
    rule: NormalizationRule,
}

impl CanonicalEmission {
    pub fn grams(&self) -> f64 {
        self.grams
    }

    pub fn rule(&self) -> NormalizationRule {
        self.rule
    }
}

/// Picks the rule for `input`. Non-finite numbers count as absent.
pub fn select_rule(input: &RawEmissionInput) -> NormalizationRule {
    if let Some(reported) = input.reported_emissions.filter(|v| v.is_finite()) {
        if reported > AGGREGATE_THRESHOLD {
            NormalizationRule::ReportedAggregateV1
        } else if reported < GRAMS_CEILING {
            NormalizationRule::ReportedGramsV1
        } else {
            NormalizationRule::ReportedMilligramsV1
        }
    } else if input.score_hint.is_some() {
        NormalizationRule::ScoreInverseLinearV1
    } else {
        NormalizationRule::PlaceholderUniformV1
    }
}

/// Folds `input` into a canonical value. Total: missing data falls back to a
/// placeholder drawn from `rng`, implausible values are clamped.
pub fn normalize(input: &RawEmissionInput, rng: &mut dyn RandomSource) -> CanonicalEmission {
    let rule = select_rule(input);
    let raw = apply_rule(rule, input, rng);
    let grams = raw.clamp(CANONICAL_MIN_G, CANONICAL_MAX_G);
    if rule == NormalizationRule::PlaceholderUniformV1 {
        warn!(grams, "no emissions or score supplied; using placeholder estimate");
    } else if grams != raw {
        warn!(raw, grams, rule = rule.id(), "emission estimate clipped to plausible range");
    }
    debug!(rule = rule.id(), grams, "normalized emission");
    CanonicalEmission { grams, rule }
}

/// Strict counterpart of [`normalize`]: no placeholder, no silent clamping.
pub fn normalize_strict(input: &RawEmissionInput) -> Result<CanonicalEmission, CarbonError> {
    if let Some(reported) = input.reported_emissions {
        if !reported.is_finite() {
            return Err(CarbonError::NonFiniteInput {
                field: "reportedEmissions",
            });
        }
        if reported < 0.0 {
            return Err(CarbonError::OutOfRangeInput {
                field: "reportedEmissions",
                value: reported,
            });
        }
    }
    if let Some(score) = input.score_hint {
        if !(0..=100).contains(&score) {
            return Err(CarbonError::OutOfRangeInput {
                field: "scoreHint",
                value: score as f64,
            });
        }
    }

    let rule = select_rule(input);
    if rule == NormalizationRule::PlaceholderUniformV1 {
        return Err(CarbonError::AmbiguousInput);
    }
    // Placeholder is excluded above, so the source is never consulted.
    let raw = apply_rule(rule, input, &mut crate::random::FixedSource(0.0));
    if !(CANONICAL_MIN_G..=CANONICAL_MAX_G).contains(&raw) {
        return Err(CarbonError::OutOfRangeInput {
            field: "co2PerPageGrams",
            value: raw,
        });
    }
    debug!(rule = rule.id(), grams = raw, "normalized emission (strict)");
    Ok(CanonicalEmission { grams: raw, rule })
}

fn apply_rule(rule: NormalizationRule, input: &RawEmissionInput, rng: &mut dyn RandomSource) -> f64 {
    let reported = input.reported_emissions.unwrap_or(0.0);
    match rule {
        NormalizationRule::ReportedAggregateV1 => (reported / AGGREGATE_PAGE_LOADS) / MG_PER_G,
        NormalizationRule::ReportedGramsV1 => reported,
        NormalizationRule::ReportedMilligramsV1 => reported / MG_PER_G,
        NormalizationRule::ScoreInverseLinearV1 => {
            let score = input.score_hint.unwrap_or(0) as f64;
            (SCORE_WORST_G - (score / 100.0) * SCORE_SPAN_G).clamp(SCORE_BEST_G, SCORE_WORST_G)
        }
        NormalizationRule::PlaceholderUniformV1 => {
            let u = rng.next_unit().clamp(0.0, 1.0);
            PLACEHOLDER_MIN_G + u * (PLACEHOLDER_MAX_G - PLACEHOLDER_MIN_G)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedSource;

    fn grams(input: &RawEmissionInput) -> f64 {
        normalize(input, &mut FixedSource(0.5)).grams()
    }

    #[test]
    fn reported_magnitude_selects_unit() {
        assert_eq!(grams(&RawEmissionInput::from_emissions(0.42)), 0.42);
        assert!((grams(&RawEmissionInput::from_emissions(10.0)) - 0.01).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_emissions(500.0)) - 0.5).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_emissions(1000.0)) - 1.0).abs() < 1e-12);
        // 1001 is an aggregate: 1001 / 10 000 / 1000 = 0.0001001, clipped up.
        assert_eq!(grams(&RawEmissionInput::from_emissions(1001.0)), CANONICAL_MIN_G);
        assert!((grams(&RawEmissionInput::from_emissions(150_000.0)) - 0.015).abs() < 1e-12);
    }

    #[test]
    fn boundaries_pick_expected_rules() {
        let rule = |v: f64| select_rule(&RawEmissionInput::from_emissions(v));
        assert_eq!(rule(9.999), NormalizationRule::ReportedGramsV1);
        assert_eq!(rule(10.0), NormalizationRule::ReportedMilligramsV1);
        assert_eq!(rule(1000.0), NormalizationRule::ReportedMilligramsV1);
        assert_eq!(rule(1000.5), NormalizationRule::ReportedAggregateV1);
    }

    #[test]
    fn grams_above_ceiling_are_clipped() {
        assert_eq!(grams(&RawEmissionInput::from_emissions(9.5)), CANONICAL_MAX_G);
        assert_eq!(grams(&RawEmissionInput::from_emissions(0.0)), CANONICAL_MIN_G);
        assert_eq!(grams(&RawEmissionInput::from_emissions(-3.0)), CANONICAL_MIN_G);
    }

    #[test]
    fn score_maps_inverse_linearly() {
        assert!((grams(&RawEmissionInput::from_score(100)) - 0.05).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_score(0)) - 1.5).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_score(50)) - 0.775).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_score(250)) - 0.05).abs() < 1e-12);
        assert!((grams(&RawEmissionInput::from_score(-40)) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn non_finite_emissions_fall_through_to_score() {
        let input = RawEmissionInput {
            score_hint: Some(100),
            reported_emissions: Some(f64::NAN),
            is_green_hosted: None,
        };
        assert_eq!(select_rule(&input), NormalizationRule::ScoreInverseLinearV1);
        assert!(matches!(
            normalize_strict(&input),
            Err(CarbonError::NonFiniteInput { .. })
        ));
    }

    #[test]
    fn placeholder_spans_its_range() {
        let empty = RawEmissionInput::default();
        let low = normalize(&empty, &mut FixedSource(0.0)).grams();
        let high = normalize(&empty, &mut FixedSource(1.0)).grams();
        assert!((low - PLACEHOLDER_MIN_G).abs() < 1e-12);
        assert!((high - PLACEHOLDER_MAX_G).abs() < 1e-12);
        let wild = normalize(&empty, &mut FixedSource(7.0)).grams();
        assert!((wild - PLACEHOLDER_MAX_G).abs() < 1e-12);
    }

    #[test]
    fn strict_rejects_negative_emissions() {
        assert!(matches!(
            normalize_strict(&RawEmissionInput::from_emissions(-0.1)),
            Err(CarbonError::OutOfRangeInput {
                field: "reportedEmissions",
                ..
            })
        ));
        assert!(matches!(
            normalize_strict(&RawEmissionInput::from_emissions(0.005)),
            Err(CarbonError::OutOfRangeInput {
                field: "co2PerPageGrams",
                ..
            })
        ));
        let ok = normalize_strict(&RawEmissionInput::from_emissions(312.0)).unwrap();
        assert!((ok.grams() - 0.312).abs() < 1e-12);
        assert_eq!(ok.rule(), NormalizationRule::ReportedMilligramsV1);
    }

    #[test]
    fn rules_round_trip_through_ids() {
        let infos = list_normalization_rules();
        assert_eq!(infos.len(), NormalizationRule::ALL.len());
        for info in infos {
            let rule = NormalizationRule::default_for_id(&info.id).unwrap();
            assert_eq!(rule.id(), info.id);
            assert_eq!(rule.provenance(), info.provenance);
        }
        assert!(NormalizationRule::default_for_id("carbon.unknown.v9").is_none());
        let json = serde_json::to_string(&NormalizationRule::ReportedGramsV1).unwrap();
        assert_eq!(json, r#"{"id":"carbon.reported.grams.v1"}"#);
    }
}
