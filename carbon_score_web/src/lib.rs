//! Browser bindings for the estimation engine.
//!
//! Values cross the boundary as plain JS objects in the same camelCase shape
//! the core types serialize to.

use carbon_score::{
    estimate, CarbonError, DashboardSnapshot, EmissionReport, EstimateOptions, FnSource, Grade,
    RawEmissionInput, RngSource, WebsiteAnalysis,
};
use serde::Serialize;
use wasm_bindgen::prelude::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    version: &'static str,
    commit: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GradeInfo {
    grade: Grade,
    color_hex: &'static str,
    upper_bound_g: Option<f64>,
}

impl GradeInfo {
    fn for_co2(co2: f64) -> Self {
        let grade = carbon_score::classify(co2);
        Self {
            grade,
            color_hex: grade.color_hex(),
            upper_bound_g: grade.upper_bound_g(),
        }
    }
}

fn to_js_error(err: CarbonError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn decode_input(input: JsValue) -> Result<RawEmissionInput, JsValue> {
    serde_wasm_bindgen::from_value(input)
        .map_err(|e| JsValue::from_str(&format!("Failed to parse input: {}", e)))
}

fn decode_options(options: JsValue) -> Result<EstimateOptions, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(EstimateOptions::default());
    }
    serde_wasm_bindgen::from_value(options)
        .map_err(|e| JsValue::from_str(&format!("Failed to parse options: {}", e)))
}

fn encode_report(report: &EmissionReport) -> Result<JsValue, JsValue> {
    Ok(serde_wasm_bindgen::to_value(report)?)
}

/// Estimates from `{scoreHint, reportedEmissions, isGreenHosted}`. The
/// placeholder branch draws from `Math.random`.
#[wasm_bindgen(js_name = buildReport)]
pub fn build_report(input: JsValue, options: JsValue) -> Result<JsValue, JsValue> {
    let input = decode_input(input)?;
    let options = decode_options(options)?;
    let report =
        estimate(&input, &options, &mut FnSource(js_sys::Math::random)).map_err(to_js_error)?;
    encode_report(&report)
}

#[wasm_bindgen(js_name = buildReportSeeded)]
pub fn build_report_seeded(input: JsValue, options: JsValue, seed: u64) -> Result<JsValue, JsValue> {
    let input = decode_input(input)?;
    let options = decode_options(options)?;
    let report = estimate(&input, &options, &mut RngSource::seeded(seed)).map_err(to_js_error)?;
    encode_report(&report)
}

/// Parses a raw website-analysis response and estimates from it in one step.
#[wasm_bindgen(js_name = analyzeWebsite)]
pub fn analyze_website(json: &str, options: JsValue) -> Result<JsValue, JsValue> {
    let analysis = WebsiteAnalysis::from_json(json).map_err(to_js_error)?;
    let options = decode_options(options)?;
    let report = estimate(
        &analysis.to_input(),
        &options,
        &mut FnSource(js_sys::Math::random),
    )
    .map_err(to_js_error)?;
    encode_report(&report)
}

#[wasm_bindgen(js_name = parseWebsiteAnalysis)]
pub fn parse_website_analysis(json: &str) -> Result<JsValue, JsValue> {
    let analysis = WebsiteAnalysis::from_json(json).map_err(to_js_error)?;
    Ok(serde_wasm_bindgen::to_value(&analysis)?)
}

#[wasm_bindgen(js_name = parseDashboard)]
pub fn parse_dashboard(json: &str) -> Result<JsValue, JsValue> {
    let snapshot = DashboardSnapshot::from_json(json).map_err(to_js_error)?;
    Ok(serde_wasm_bindgen::to_value(&snapshot)?)
}

#[wasm_bindgen(js_name = parseFindings)]
pub fn parse_findings(json: &str) -> Result<JsValue, JsValue> {
    let report = carbon_score::parse_findings(json).map_err(to_js_error)?;
    Ok(serde_wasm_bindgen::to_value(&report)?)
}

#[wasm_bindgen]
pub fn classify(co2: f64) -> JsValue {
    serde_wasm_bindgen::to_value(&GradeInfo::for_co2(co2)).unwrap_or(JsValue::NULL)
}

#[wasm_bindgen(js_name = formatCo2)]
pub fn format_co2(grams: f64) -> String {
    carbon_score::format_co2(grams)
}

#[wasm_bindgen(js_name = normalizeUrl)]
pub fn normalize_url(input: &str) -> Result<String, JsValue> {
    carbon_score::normalize_target_url(input).map_err(to_js_error)
}

#[wasm_bindgen(js_name = buildInfo)]
pub fn build_info() -> JsValue {
    let info = BuildInfo {
        version: APP_VERSION,
        commit: APP_COMMIT,
    };
    serde_wasm_bindgen::to_value(&info).unwrap_or(JsValue::NULL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_info_carries_band_details() {
        let info = GradeInfo::for_co2(0.18);
        assert_eq!(info.grade, Grade::A);
        assert_eq!(info.upper_bound_g, Some(0.2));
        assert!(info.color_hex.starts_with('#'));

        let worst = GradeInfo::for_co2(5.0);
        assert_eq!(worst.grade, Grade::F);
        assert_eq!(worst.upper_bound_g, None);
    }

    #[test]
    fn build_info_serializes_camel_case() {
        let info = BuildInfo {
            version: APP_VERSION,
            commit: APP_COMMIT,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["version"], APP_VERSION);
        assert!(value.get("commit").is_some());
    }
}
