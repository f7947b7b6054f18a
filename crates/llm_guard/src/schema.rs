//! Wire schema for the LLM analysis document.
//!
//! The model is instructed to return exactly this JSON shape. Parsing is
//! lenient: missing fields default, markdown code fences are stripped, and
//! anything that still fails to parse degrades to an UNKNOWN-severity
//! document that preserves the raw text for human inspection.

use serde::{Deserialize, Serialize};

/// Severity the model did not or could not assess.
pub const SEVERITY_UNKNOWN: &str = "UNKNOWN";

/// A remediation step proposed by the model. Fields are optional because
/// presence is a validation concern, not a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aws_service: Option<String>,
    #[serde(default)]
    pub documentation_link: Option<String>,
}

/// A root cause the model identified, with the log evidence backing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootCause {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub affected_services: Vec<String>,
}

/// The full analysis document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub root_causes: Vec<RootCause>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default = "default_severity")]
    pub severity_assessment: String,
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub preventive_measures: Vec<String>,
}

fn default_severity() -> String {
    SEVERITY_UNKNOWN.to_string()
}

impl Analysis {
    /// Fallback document for responses that were not valid JSON: raw text
    /// preserved in the summary, everything else empty, severity UNKNOWN.
    pub fn degraded(raw_text: &str) -> Self {
        Self {
            executive_summary: raw_text.to_string(),
            severity_assessment: SEVERITY_UNKNOWN.to_string(),
            ..Self::default()
        }
    }

    /// Executive summary, synthesized when the model omitted one.
    pub fn executive_summary_or_default(&self) -> String {
        if !self.executive_summary.trim().is_empty() {
            return self.executive_summary.clone();
        }
        format!(
            "{} severity incident detected. {} root causes identified. Immediate action recommended.",
            self.severity_assessment,
            self.root_causes.len()
        )
    }
}

/// Strip the markdown code fences the model sometimes wraps JSON in. Only
/// the wrapping fences at the document edges are removed; backticks inside
/// string values are content and stay untouched.
pub fn strip_code_fences(text: &str) -> String {
    let mut stripped = text.trim();
    if let Some(rest) = stripped.strip_prefix("```json") {
        stripped = rest;
    } else if let Some(rest) = stripped.strip_prefix("```") {
        stripped = rest;
    }
    if let Some(rest) = stripped.trim_end().strip_suffix("```") {
        stripped = rest;
    }
    stripped.trim().to_string()
}

/// Parse a model response into an [`Analysis`], degrading on malformed JSON
/// instead of failing.
pub fn parse_analysis(raw: &str) -> Analysis {
    let cleaned = strip_code_fences(raw);
    match serde_json::from_str::<Analysis>(&cleaned) {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::warn!("LLM response was not valid analysis JSON: {e}");
            Analysis::degraded(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let raw = r#"{
            "executive_summary": "Database connections exhausted",
            "root_causes": [{"title": "Pool exhaustion", "description": "d", "evidence": "15 timeouts"}],
            "recommendations": [{"priority": "HIGH", "title": "t", "description": "d", "aws_service": "Amazon RDS"}],
            "severity_assessment": "HIGH",
            "affected_services": ["rds"],
            "preventive_measures": ["add alarms"]
        }"#;
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.severity_assessment, "HIGH");
        assert_eq!(analysis.root_causes.len(), 1);
        assert_eq!(analysis.recommendations.len(), 1);
        assert_eq!(
            analysis.recommendations[0].priority.as_deref(),
            Some("HIGH")
        );
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let raw = "```json\n{\"executive_summary\": \"ok\", \"severity_assessment\": \"LOW\"}\n```";
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.executive_summary, "ok");
        assert_eq!(analysis.severity_assessment, "LOW");
    }

    #[test]
    fn test_fences_inside_string_values_are_content() {
        let raw = r#"{"executive_summary": "wrap the command in ``` fences before running", "severity_assessment": "LOW"}"#;
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.severity_assessment, "LOW");
        assert!(analysis.executive_summary.contains("```"));
    }

    #[test]
    fn test_parse_malformed_degrades() {
        let raw = "The incident was caused by... (model ignored the schema)";
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.severity_assessment, SEVERITY_UNKNOWN);
        assert!(analysis.recommendations.is_empty());
        assert!(analysis.root_causes.is_empty());
        assert_eq!(analysis.executive_summary, raw);
    }

    #[test]
    fn test_missing_fields_default() {
        let analysis = parse_analysis(r#"{"recommendations": [{}]}"#);
        assert_eq!(analysis.severity_assessment, SEVERITY_UNKNOWN);
        assert!(analysis.recommendations[0].priority.is_none());
    }

    #[test]
    fn test_summary_fallback() {
        let analysis = parse_analysis(r#"{"severity_assessment": "HIGH"}"#);
        let summary = analysis.executive_summary_or_default();
        assert!(summary.contains("HIGH severity incident"));
    }
}
