//! Core carbon-footprint estimation library for web pages.
//!
//! Raw, loosely-typed figures from an upstream analysis service are folded into
//! one canonical value (grams of CO₂ per page view) which then drives the grade,
//! the "cleaner than" percentile and the annual projection of an
//! [`EmissionReport`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

pub mod findings;
pub mod format;
pub mod grade;
pub mod normalize;
pub mod percentile;
pub mod projection;
pub mod random;
pub mod session;
pub mod store;
pub mod upstream;

pub use findings::{parse_findings, Finding, FindingsReport, ValidationError};
pub use format::format_co2;
pub use grade::{classify, Grade};
pub use normalize::{
    list_normalization_rules, normalize, normalize_strict, CanonicalEmission, NormalizationRule,
    NormalizationRuleInfo, Provenance,
};
pub use percentile::{estimate_cleaner_than, GLOBAL_AVERAGE_G};
pub use projection::{project_annual, DEFAULT_MONTHLY_VIEWS};
pub use random::{FixedSource, FnSource, RandomSource, RngSource};
pub use session::{AnalysisKind, Role, Session, User};
pub use store::{KeyValueStore, MemoryStore, StoredAnalysis};
pub use upstream::{normalize_target_url, DashboardSnapshot, WebsiteAnalysis};

#[cfg(not(target_arch = "wasm32"))]
pub use store::JsonFileStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CarbonError {
    #[error("neither reported emissions nor a score hint was supplied")]
    AmbiguousInput,
    #[error("{field} out of range: {value}")]
    OutOfRangeInput { field: &'static str, value: f64 },
    #[error("{field} is not a finite number")]
    NonFiniteInput { field: &'static str },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("invalid upstream payload: {0}")]
    InvalidPayload(String),
    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("store error: {0}")]
    Store(String),
}

/// Untrusted input as mapped from an upstream "analyze website" response.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawEmissionInput {
    /// Coarse 0–100 sustainability score.
    pub score_hint: Option<i32>,
    /// Emission figure whose unit is only implied by its magnitude.
    pub reported_emissions: Option<f64>,
    pub is_green_hosted: Option<bool>,
}

impl RawEmissionInput {
    pub fn from_score(score: i32) -> Self {
        Self {
            score_hint: Some(score),
            ..Self::default()
        }
    }

    pub fn from_emissions(emissions: f64) -> Self {
        Self {
            reported_emissions: Some(emissions),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EstimateOptions {
    /// Baseline grams per page view for the "cleaner than" percentage.
    #[serde(rename = "globalAverage")]
    pub global_average_g: f64,
    /// Assumed traffic used by the annual projection; not a measurement.
    pub monthly_views: u32,
    /// Reject ambiguous or out-of-range input instead of falling back.
    pub strict: bool,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            global_average_g: GLOBAL_AVERAGE_G,
            monthly_views: DEFAULT_MONTHLY_VIEWS,
            strict: false,
        }
    }
}

impl EstimateOptions {
    pub fn validate(&self) -> Result<(), CarbonError> {
        if !self.global_average_g.is_finite() || self.global_average_g <= 0.0 {
            return Err(CarbonError::InvalidOption(format!(
                "global average must be a positive number of grams, got {}",
                self.global_average_g
            )));
        }
        if self.monthly_views == 0 {
            return Err(CarbonError::InvalidOption(
                "monthly views must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Replaces invalid fields with their defaults.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut out = self.clone();
        if !out.global_average_g.is_finite() || out.global_average_g <= 0.0 {
            warn!(
                global_average_g = out.global_average_g,
                "invalid global average; using {}", defaults.global_average_g
            );
            out.global_average_g = defaults.global_average_g;
        }
        if out.monthly_views == 0 {
            warn!("monthly views of zero; using {}", defaults.monthly_views);
            out.monthly_views = defaults.monthly_views;
        }
        out
    }

    /// SHA-256 over the canonical JSON form of the options.
    pub fn fingerprint(&self) -> Result<String, CarbonError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| CarbonError::InvalidOption(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

/// Immutable result of one estimation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmissionReport {
    pub co2_per_page_grams: f64,
    pub grade: Grade,
    pub cleaner_than_percent: u8,
    pub annual_co2_kg: f64,
    pub assumed_monthly_views: u32,
    pub provenance: Provenance,
    pub is_placeholder: bool,
    pub rule_id: String,
    pub score_hint: Option<i32>,
    pub green_hosted: Option<bool>,
    pub global_average_g: f64,
    /// `None` only when a permissive build could not encode its options.
    pub options_fingerprint: Option<String>,
}

/// Builds a report with the thread-local RNG backing the placeholder branch.
///
/// Never fails: ambiguous input falls back to a placeholder and implausible
/// values are clamped. Invalid options are replaced by their defaults.
pub fn build_report(input: &RawEmissionInput, options: &EstimateOptions) -> EmissionReport {
    let mut rng = RngSource::thread();
    build_report_with(input, options, &mut rng)
}

/// Same as [`build_report`] with an injected random source.
pub fn build_report_with(
    input: &RawEmissionInput,
    options: &EstimateOptions,
    rng: &mut dyn RandomSource,
) -> EmissionReport {
    let options = options.sanitized();
    let fingerprint = match options.fingerprint() {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!("failed to fingerprint options: {e}");
            None
        }
    };
    let canonical = normalize(input, rng);
    assemble(input, &options, canonical, fingerprint)
}

/// Builds a report, rejecting ambiguous or out-of-range input and invalid options.
pub fn build_report_strict(
    input: &RawEmissionInput,
    options: &EstimateOptions,
) -> Result<EmissionReport, CarbonError> {
    options.validate()?;
    let fingerprint = options.fingerprint()?;
    let canonical = normalize_strict(input)?;
    Ok(assemble(input, options, canonical, Some(fingerprint)))
}

/// Dispatches on [`EstimateOptions::strict`].
pub fn estimate(
    input: &RawEmissionInput,
    options: &EstimateOptions,
    rng: &mut dyn RandomSource,
) -> Result<EmissionReport, CarbonError> {
    if options.strict {
        build_report_strict(input, options)
    } else {
        Ok(build_report_with(input, options, rng))
    }
}

// The canonical value is the only figure the three calculators see.
fn assemble(
    input: &RawEmissionInput,
    options: &EstimateOptions,
    canonical: CanonicalEmission,
    fingerprint: Option<String>,
) -> EmissionReport {
    let grams = canonical.grams();
    let provenance = canonical.rule().provenance();
    EmissionReport {
        co2_per_page_grams: grams,
        grade: classify(grams),
        cleaner_than_percent: estimate_cleaner_than(grams, options.global_average_g),
        annual_co2_kg: project_annual(grams, options.monthly_views),
        assumed_monthly_views: options.monthly_views,
        provenance,
        is_placeholder: provenance == Provenance::Placeholder,
        rule_id: canonical.rule().id().to_string(),
        score_hint: input.score_hint,
        green_hosted: input.is_green_hosted,
        global_average_g: options.global_average_g,
        options_fingerprint: fingerprint,
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
