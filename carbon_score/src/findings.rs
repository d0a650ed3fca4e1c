//! Parse-and-validate for the repository-analysis service.
//!
//! The service answers with either a bare array of findings or an envelope
//! `{repo, file_count, report_path, analysis: [...]}`. Each item is checked on
//! its own; bad items are collected with their index instead of failing the
//! whole payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::CarbonError;

/// `problem` value the backend uses when the model reply could not be parsed.
const UNPARSED_REPLY_MARKER: &str = "Invalid JSON format";

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("finding is not a JSON object")]
    NotAnObject,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("field {0} is empty")]
    EmptyField(&'static str),
    #[error("field {field} must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("upstream reply could not be parsed: {0}")]
    UnparsedUpstreamReply(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub file_name: String,
    pub problem: Option<String>,
    pub problem_description: String,
    pub problematic_code: String,
    pub optimized_code: String,
    pub optimization: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FindingsReport {
    pub repo: Option<String>,
    pub file_count: Option<u64>,
    pub findings: Vec<Finding>,
    pub rejected: Vec<(usize, ValidationError)>,
}

impl FindingsReport {
    pub fn by_file(&self) -> BTreeMap<&str, Vec<&Finding>> {
        let mut out: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in &self.findings {
            out.entry(finding.file_name.as_str()).or_default().push(finding);
        }
        out
    }
}

pub fn parse_findings(text: &str) -> Result<FindingsReport, CarbonError> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| CarbonError::InvalidPayload(format!("not valid JSON: {e}")))?;
    parse_findings_value(&value)
}

pub fn parse_findings_value(value: &JsonValue) -> Result<FindingsReport, CarbonError> {
    let (items, repo, file_count) = match value {
        JsonValue::Array(items) => (items, None, None),
        JsonValue::Object(envelope) => {
            if let Some(message) = envelope.get("error").and_then(JsonValue::as_str) {
                return Err(CarbonError::InvalidPayload(format!(
                    "upstream reported failure: {message}"
                )));
            }
            let items = envelope
                .get("analysis")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| CarbonError::InvalidPayload("missing analysis array".into()))?;
            let repo = envelope
                .get("repo")
                .or_else(|| envelope.get("uploaded_file"))
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            let file_count = envelope.get("file_count").and_then(JsonValue::as_u64);
            (items, repo, file_count)
        }
        _ => {
            return Err(CarbonError::InvalidPayload(
                "expected an array or an analysis envelope".into(),
            ))
        }
    };

    let mut report = FindingsReport {
        repo,
        file_count,
        ..FindingsReport::default()
    };
    for (index, item) in items.iter().enumerate() {
        match validate_finding(item) {
            Ok(finding) => report.findings.push(finding),
            Err(err) => report.rejected.push((index, err)),
        }
    }
    Ok(report)
}

pub fn validate_finding(item: &JsonValue) -> Result<Finding, ValidationError> {
    let obj = item.as_object().ok_or(ValidationError::NotAnObject)?;

    let problem = optional_string(obj, &["problem"], "problem")?;
    let problem_description = required_string(obj, "problemDescription")?;
    if problem.as_deref() == Some(UNPARSED_REPLY_MARKER) {
        return Err(ValidationError::UnparsedUpstreamReply(problem_description));
    }
    let file_name = required_string(obj, "fileName")?;
    if file_name.trim().is_empty() {
        return Err(ValidationError::EmptyField("fileName"));
    }
    if problem_description.trim().is_empty() {
        return Err(ValidationError::EmptyField("problemDescription"));
    }

    Ok(Finding {
        file_name,
        problem,
        problem_description,
        problematic_code: optional_string(obj, &["problematicCode"], "problematicCode")?
            .unwrap_or_default(),
        optimized_code: optional_string(
            obj,
            &["optimizedCode", "problematicCodeOptimized"],
            "optimizedCode",
        )?
        .unwrap_or_default(),
        optimization: optional_string(
            obj,
            &["optimization", "codeOptimisationSummary"],
            "optimization",
        )?
        .unwrap_or_default(),
    })
}

fn required_string(
    obj: &Map<String, JsonValue>,
    field: &'static str,
) -> Result<String, ValidationError> {
    optional_string(obj, &[field], field)?.ok_or(ValidationError::MissingField(field))
}

fn optional_string(
    obj: &Map<String, JsonValue>,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    for key in keys {
        match obj.get(*key) {
            None | Some(JsonValue::Null) => continue,
            Some(JsonValue::String(s)) => return Ok(Some(s.clone())),
            Some(_) => {
                return Err(ValidationError::WrongType {
                    field,
                    expected: "string",
                })
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: &str = r#"{
        "fileName": "app.js",
        "problem": "Nested loops",
        "problemDescription": "Quadratic scan over users",
        "problematicCode": "for (a of xs) for (b of xs) {}",
        "optimizedCode": "const seen = new Set(xs);",
        "optimization": "Use a Set lookup"
    }"#;

    #[test]
    fn parses_bare_array() {
        let report = parse_findings(&format!("[{ITEM}]")).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert!(report.rejected.is_empty());
        let finding = &report.findings[0];
        assert_eq!(finding.file_name, "app.js");
        assert_eq!(finding.optimization, "Use a Set lookup");
        assert_eq!(report.repo, None);
    }

    #[test]
    fn parses_envelope_and_collects_rejects() {
        let text = format!(
            r#"{{"repo": "shop", "file_count": 7, "report_path": "reports/shop_report.json",
               "analysis": [{ITEM}, 42, {{"fileName": "", "problemDescription": "x"}},
                 {{"fileName": "b.js", "problem": "Invalid JSON format", "problemDescription": "garbled"}},
                 {{"fileName": "c.ts", "problemDescription": 3}}]}}"#
        );
        let report = parse_findings(&text).unwrap();
        assert_eq!(report.repo.as_deref(), Some("shop"));
        assert_eq!(report.file_count, Some(7));
        assert_eq!(report.findings.len(), 1);
        assert_eq!(
            report.rejected,
            vec![
                (1, ValidationError::NotAnObject),
                (2, ValidationError::EmptyField("fileName")),
                (
                    3,
                    ValidationError::UnparsedUpstreamReply("garbled".to_string())
                ),
                (
                    4,
                    ValidationError::WrongType {
                        field: "problemDescription",
                        expected: "string"
                    }
                ),
            ]
        );
    }

    #[test]
    fn accepts_front_end_field_aliases() {
        let finding = validate_finding(&serde_json::json!({
            "fileName": "login.js",
            "problemDescription": "Callback pyramid",
            "problematicCodeOptimized": "await login()",
            "codeOptimisationSummary": "Use async/await"
        }))
        .unwrap();
        assert_eq!(finding.optimized_code, "await login()");
        assert_eq!(finding.optimization, "Use async/await");
        assert_eq!(finding.problematic_code, "");
        assert_eq!(finding.problem, None);
    }

    #[test]
    fn envelope_errors_surface() {
        assert!(matches!(
            parse_findings(r#"{"error": "No JS/TS files found"}"#),
            Err(CarbonError::InvalidPayload(_))
        ));
        assert!(parse_findings("\"nope\"").is_err());
        assert_eq!(
            validate_finding(&serde_json::json!({"fileName": "a.js"})),
            Err(ValidationError::MissingField("problemDescription"))
        );
    }

    #[test]
    fn groups_by_file() {
        let text = r#"[
            {"fileName": "a.js", "problemDescription": "one"},
            {"fileName": "b.js", "problemDescription": "two"},
            {"fileName": "a.js", "problemDescription": "three"}
        ]"#;
        let report = parse_findings(text).unwrap();
        let grouped = report.by_file();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a.js"].len(), 2);
    }
}
