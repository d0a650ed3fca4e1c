//! Typed views over the JSON returned by the website-analysis service.
//!
//! The service contract is loose: fields may sit under `data` or at the top
//! level, numbers may arrive as strings. Everything is checked here so the
//! engine only ever sees a [`RawEmissionInput`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::grade::Grade;
use crate::{CarbonError, RawEmissionInput};

/// Grid intensity assumed when the payload has none (gCO₂/kWh).
pub const DEFAULT_GRID_INTENSITY: f64 = 494.0;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAnalysis {
    pub project: Option<String>,
    pub score: Option<i32>,
    pub emissions: Option<f64>,
    pub green: Option<bool>,
    pub analyzed_at: Option<String>,
}

impl WebsiteAnalysis {
    pub fn from_json(text: &str) -> Result<Self, CarbonError> {
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|e| CarbonError::InvalidPayload(format!("not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &JsonValue) -> Result<Self, CarbonError> {
        let root = value
            .as_object()
            .ok_or_else(|| CarbonError::InvalidPayload("expected a JSON object".into()))?;
        if root.get("success").and_then(JsonValue::as_bool) == Some(false) {
            let message = root
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("analysis failed");
            return Err(CarbonError::InvalidPayload(format!(
                "upstream reported failure: {message}"
            )));
        }
        let data = root.get("data").and_then(JsonValue::as_object);
        let lookup = |key: &str| lookup_field(root, data, key);

        let score = match lookup("score") {
            Some(v) => {
                let raw = number_value("score", v)?;
                let rounded = raw.round();
                if !(0.0..=100.0).contains(&rounded) {
                    return Err(CarbonError::InvalidPayload(format!(
                        "score must be within 0..=100, got {raw}"
                    )));
                }
                Some(rounded as i32)
            }
            None => None,
        };
        let emissions = lookup("emissions")
            .map(|v| number_value("emissions", v))
            .transpose()?;
        let green = lookup("green")
            .map(|v| {
                v.as_bool().ok_or_else(|| {
                    CarbonError::InvalidPayload("green must be a boolean".into())
                })
            })
            .transpose()?;

        Ok(Self {
            project: lookup("project").and_then(JsonValue::as_str).map(str::to_string),
            score,
            emissions,
            green,
            analyzed_at: lookup("analyzedAt")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        })
    }

    pub fn to_input(&self) -> RawEmissionInput {
        RawEmissionInput {
            score_hint: self.score,
            reported_emissions: self.emissions,
            is_green_hosted: self.green,
        }
    }
}

fn lookup_field<'a>(
    root: &'a Map<String, JsonValue>,
    data: Option<&'a Map<String, JsonValue>>,
    key: &str,
) -> Option<&'a JsonValue> {
    data.and_then(|d| d.get(key))
        .filter(|v| !v.is_null())
        .or_else(|| root.get(key).filter(|v| !v.is_null()))
}

fn number_value(field: &str, value: &JsonValue) -> Result<f64, CarbonError> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(CarbonError::InvalidPayload(format!(
            "{field} must be a finite number, got {value}"
        ))),
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GridIntensity {
    pub device: f64,
    pub data_center: f64,
    pub network: f64,
}

impl Default for GridIntensity {
    fn default() -> Self {
        Self {
            device: DEFAULT_GRID_INTENSITY,
            data_center: DEFAULT_GRID_INTENSITY,
            network: DEFAULT_GRID_INTENSITY,
        }
    }
}

/// The stored `{analysis: {...}}` payload behind the emission dashboard.
///
/// Field mapping is lenient: missing or non-numeric values become zero (or the
/// default grid intensity), matching how the dashboard renders partial data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub url: String,
    pub co2_total_g: f64,
    pub green: bool,
    pub transfer_bytes: u64,
    pub grid_intensity: GridIntensity,
    pub rating: Grade,
}

impl DashboardSnapshot {
    pub fn from_json(text: &str) -> Result<Self, CarbonError> {
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|e| CarbonError::InvalidPayload(format!("not valid JSON: {e}")))?;
        let analysis = value
            .get("analysis")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| CarbonError::InvalidPayload("missing analysis object".into()))?;
        Ok(Self::from_analysis(analysis))
    }

    fn from_analysis(analysis: &Map<String, JsonValue>) -> Self {
        let green = analysis
            .get("green")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let intensity = |node: &str| {
            analysis
                .get("variables")
                .and_then(|v| v.get("gridIntensity"))
                .and_then(|v| v.get(node))
                .and_then(|v| v.get("value"))
                .and_then(lenient_number)
                .filter(|v| *v != 0.0)
                .unwrap_or(DEFAULT_GRID_INTENSITY)
        };
        Self {
            url: analysis
                .get("url")
                .and_then(JsonValue::as_str)
                .unwrap_or("Unknown URL")
                .to_string(),
            co2_total_g: analysis.get("co2").and_then(lenient_number).unwrap_or(0.0),
            green,
            transfer_bytes: analysis
                .get("totalTransferBytes")
                .and_then(lenient_number)
                .filter(|v| *v > 0.0)
                .map(|v| v as u64)
                .unwrap_or(0),
            grid_intensity: GridIntensity {
                device: intensity("device"),
                data_center: intensity("dataCenter"),
                network: intensity("network"),
            },
            rating: if green { Grade::A } else { Grade::C },
        }
    }

    pub fn transfer_kib(&self) -> f64 {
        self.transfer_bytes as f64 / 1024.0
    }

    /// Feeds the dashboard figure back into the engine as a reported value.
    pub fn to_input(&self) -> RawEmissionInput {
        RawEmissionInput {
            score_hint: None,
            reported_emissions: Some(self.co2_total_g),
            is_green_hosted: Some(self.green),
        }
    }
}

fn lenient_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Trims `input`, adds `https://` when no scheme is given and checks the host
/// looks like `name.tld` with a 2–6 letter TLD.
pub fn normalize_target_url(input: &str) -> Result<String, CarbonError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CarbonError::InvalidPayload("please enter a website URL".into()));
    }
    let lower = trimmed.to_ascii_lowercase();
    let (with_scheme, rest) = if let Some(rest) = lower.strip_prefix("https://") {
        (trimmed.to_string(), rest)
    } else if let Some(rest) = lower.strip_prefix("http://") {
        (trimmed.to_string(), rest)
    } else {
        (format!("https://{trimmed}"), lower.as_str())
    };

    let host = rest.split('/').next().unwrap_or_default();
    if !valid_host(host) {
        return Err(CarbonError::InvalidPayload(format!(
            "not a valid URL (e.g. example.com): {trimmed}"
        )));
    }
    Ok(with_scheme)
}

fn valid_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return false;
    }
    let tld = labels[labels.len() - 1];
    let tld_ok = (2..=6).contains(&tld.len()) && tld.chars().all(|c| c.is_ascii_alphabetic());
    let labels_ok = labels[..labels.len() - 1]
        .iter()
        .all(|l| l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    tld_ok && labels_ok
}
