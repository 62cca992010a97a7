//! Turns raw model output into stored artefacts and failure messages users can act on.

use chrono::Utc;
use scriptflow_ai::AiError;
use scriptflow_core::{
    DiagnosticReport, Finding, FindingLocation, FindingType, ProjectId, Severity,
};
use serde_json::Value;

use crate::{prompts::MAX_FINDINGS, WorkflowError};

const DEFAULT_FINDING_CONFIDENCE: f64 = 0.8;
const DEFAULT_REPORT_CONFIDENCE: f64 = 0.85;

pub fn finding_type(raw: &str) -> FindingType {
    match raw {
        "character_inconsistency" | "character" => FindingType::Character,
        "timeline_error" | "timeline" => FindingType::Timeline,
        "scene_continuity" | "scene" => FindingType::Scene,
        "dialogue_inconsistency" | "dialogue" => FindingType::Dialogue,
        _ => FindingType::Plot,
    }
}

pub fn severity(raw: &str) -> Severity {
    match raw {
        "critical" | "high" => Severity::Critical,
        "medium" => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Values above 1 are read as percentages.
pub fn normalize_confidence(raw: Option<f64>, default: f64) -> f64 {
    match raw {
        Some(c) if c > 1.0 => (c / 100.0).min(1.0),
        Some(c) if c >= 0.0 => c,
        _ => default,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn location(value: &Value) -> Option<FindingLocation> {
    let obj = value.as_object()?;
    let location = FindingLocation {
        scene_number: obj
            .get("sceneNumber")
            .or_else(|| obj.get("sceneId"))
            .and_then(as_u32),
        line: obj
            .get("line")
            .or_else(|| obj.get("lineNumber"))
            .and_then(as_u32),
        character: obj
            .get("characterName")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    (location != FindingLocation::default()).then_some(location)
}

fn summary(value: Option<&Value>, finding_count: usize) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Object(obj)) => format!(
            "Overall consistency: {}. Total issues: {}, critical issues: {}",
            obj.get("overallConsistency")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
            obj.get("totalIssues").and_then(Value::as_u64).unwrap_or(0),
            obj.get("criticalIssues").and_then(Value::as_u64).unwrap_or(0),
        ),
        _ => format!("Detected {} logic errors in the script", finding_count),
    }
}

/// Build a diagnostic report from the analysis model's JSON answer.
pub fn diagnostic_report(project_id: ProjectId, raw: &Value) -> DiagnosticReport {
    let findings: Vec<Finding> = raw
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .take(MAX_FINDINGS)
                .map(|error| Finding {
                    finding_type: finding_type(
                        error.get("type").and_then(Value::as_str).unwrap_or_default(),
                    ),
                    severity: severity(
                        error
                            .get("severity")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                    ),
                    description: error
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    location: error.get("location").and_then(location),
                    suggestion: error
                        .get("suggestion")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    confidence: normalize_confidence(
                        error.get("confidence").and_then(Value::as_f64),
                        DEFAULT_FINDING_CONFIDENCE,
                    ),
                })
                .collect()
        })
        .unwrap_or_default();

    DiagnosticReport {
        project_id,
        summary: Some(summary(raw.get("summary"), findings.len())),
        confidence: normalize_confidence(
            raw.get("confidence").and_then(Value::as_f64),
            DEFAULT_REPORT_CONFIDENCE,
        ),
        findings,
        created_at: Utc::now(),
    }
}

/// Message stored on a failed job, prefixed with a hint for the common upstream failures.
pub fn describe_failure(err: &WorkflowError) -> String {
    let detail = err.to_string();
    match err {
        WorkflowError::Ai(AiError::Timeout(_)) => format!(
            "The AI service timed out; the script may be too long or the service is slow. Please retry later. ({})",
            detail
        ),
        WorkflowError::Ai(AiError::RateLimited { .. }) => format!(
            "The AI service rate limit was exceeded. Please retry later. ({})",
            detail
        ),
        WorkflowError::Ai(AiError::Network(_) | AiError::Upstream { .. } | AiError::Client(_)) => {
            format!(
                "Could not reach the AI service. Check the network or retry later. ({})",
                detail
            )
        }
        _ => detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn maps_types_and_severities() {
        assert_eq!(finding_type("timeline_error"), FindingType::Timeline);
        assert_eq!(finding_type("plot_hole"), FindingType::Plot);
        assert_eq!(finding_type("something_new"), FindingType::Plot);
        assert_eq!(severity("high"), Severity::Critical);
        assert_eq!(severity("medium"), Severity::Warning);
        assert_eq!(severity("low"), Severity::Info);
    }

    #[test]
    fn confidence_percentages_are_scaled() {
        assert_eq!(normalize_confidence(Some(85.0), 0.8), 0.85);
        assert_eq!(normalize_confidence(Some(0.4), 0.8), 0.4);
        assert_eq!(normalize_confidence(None, 0.8), 0.8);
    }

    #[test]
    fn builds_report_from_model_output() {
        let raw = json!({
            "errors": [
                {
                    "type": "character_inconsistency",
                    "severity": "high",
                    "description": "Mara is left-handed in scene 2, right-handed in scene 9",
                    "location": {"sceneNumber": 9, "characterName": "Mara"},
                    "confidence": 92
                },
                {"type": "dialogue_inconsistency", "severity": "low", "description": "tone shift"}
            ],
            "summary": {"overallConsistency": "good", "totalIssues": 2, "criticalIssues": 1},
            "confidence": 0.9
        });
        let report = diagnostic_report(Uuid::nil(), &raw);
        assert_eq!(report.findings.len(), 2);
        let first = &report.findings[0];
        assert_eq!(first.finding_type, FindingType::Character);
        assert_eq!(first.severity, Severity::Critical);
        assert_eq!(first.confidence, 0.92);
        assert_eq!(
            first.location.as_ref().and_then(|l| l.scene_number),
            Some(9)
        );
        assert!(report.findings[1].location.is_none());
        assert_eq!(report.findings[1].confidence, 0.8);
        assert_eq!(
            report.summary.as_deref(),
            Some("Overall consistency: good. Total issues: 2, critical issues: 1")
        );
        assert_eq!(report.confidence, 0.9);
    }

    #[test]
    fn empty_output_gives_empty_report() {
        let report = diagnostic_report(Uuid::nil(), &json!({}));
        assert!(report.findings.is_empty());
        assert_eq!(
            report.summary.as_deref(),
            Some("Detected 0 logic errors in the script")
        );
        assert_eq!(report.confidence, 0.85);
    }

    #[test]
    fn failures_get_hints() {
        let timeout = describe_failure(&WorkflowError::Ai(AiError::Timeout(
            Duration::from_secs(30),
        )));
        assert!(timeout.starts_with("The AI service timed out"));
        assert!(timeout.ends_with("(Request timeout after 30000ms)"));

        let plain = describe_failure(&WorkflowError::Validation("no script".into()));
        assert_eq!(plain, "Validation failed: no script");
    }
}
