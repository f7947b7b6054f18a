//! Prompt construction for incident analysis.
//!
//! Builds the analysis prompt from sanitized error patterns and embeds the
//! exact JSON schema the model must return. Only redacted text may reach
//! this module; the pipeline enforces that.

use crate::patterns::{ErrorPattern, LogSummary};
use std::fmt::Write;

/// Patterns included in the prompt; more adds cost without adding signal.
const MAX_PROMPT_PATTERNS: usize = 10;

/// Build the analysis prompt for the model.
pub fn build_analysis_prompt(patterns: &[ErrorPattern], summary: &LogSummary) -> String {
    let mut patterns_text = String::new();
    for (i, pattern) in patterns.iter().take(MAX_PROMPT_PATTERNS).enumerate() {
        let example: String = pattern.example.chars().take(200).collect();
        let _ = write!(
            patterns_text,
            "\n{}. Pattern: {}\n   Occurrences: {}\n   Example: {}...\n",
            i + 1,
            pattern.pattern,
            pattern.count,
            example
        );
    }

    format!(
        r#"You are an AWS infrastructure expert analyzing CloudWatch logs for a post-mortem incident report.

**Log Summary:**
- Timeframe: Last {lookback} hours
- Total Errors: {errors}
- Total Warnings: {warnings}
- Unique Error Patterns: {unique}

**Top Error Patterns:**
{patterns_text}

**Your Task:**
Analyze these logs and provide a comprehensive post-mortem report in **valid JSON format** with the following structure:

{{
  "executive_summary": "2-3 sentence high-level summary for executives",
  "root_causes": [
    {{
      "title": "Brief title of root cause",
      "description": "Detailed explanation",
      "evidence": "What in the logs supports this",
      "impact": "HIGH/MEDIUM/LOW",
      "affected_services": ["service1", "service2"]
    }}
  ],
  "recommendations": [
    {{
      "priority": "CRITICAL/HIGH/MEDIUM/LOW",
      "title": "Actionable recommendation title",
      "description": "Detailed steps to fix",
      "aws_service": "Relevant AWS service",
      "documentation_link": "Link to AWS docs if applicable"
    }}
  ],
  "severity_assessment": "CRITICAL/HIGH/MEDIUM/LOW",
  "affected_services": ["list", "of", "services"],
  "preventive_measures": [
    "Future prevention step 1",
    "Future prevention step 2"
  ]
}}

**Important:**
- Focus on AWS-specific insights (Lambda, EC2, RDS, etc.)
- Provide actionable recommendations with specific AWS service references
- Include AWS documentation links where relevant
- Identify patterns that might indicate larger systemic issues
- Consider cost implications if relevant

Return ONLY the JSON object, no markdown code blocks, no additional text."#,
        lookback = summary.lookback_hours,
        errors = summary.total_errors,
        warnings = summary.total_warnings,
        unique = patterns.len(),
        patterns_text = patterns_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(text: &str, count: usize) -> ErrorPattern {
        ErrorPattern {
            pattern: text.to_string(),
            count,
            example: format!("example of {text}"),
            first_seen: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_prompt_includes_patterns_and_summary() {
        let patterns = vec![pattern("Lambda timeout exceeded", 15)];
        let summary = LogSummary {
            total_errors: 23,
            total_warnings: 5,
            lookback_hours: 24,
        };
        let prompt = build_analysis_prompt(&patterns, &summary);
        assert!(prompt.contains("Lambda timeout exceeded"));
        assert!(prompt.contains("Occurrences: 15"));
        assert!(prompt.contains("Total Errors: 23"));
        assert!(prompt.contains("\"executive_summary\""));
        assert!(prompt.contains("Return ONLY the JSON object"));
    }

    #[test]
    fn test_prompt_caps_pattern_count() {
        let patterns: Vec<ErrorPattern> =
            (0..30).map(|i| pattern(&format!("pattern-{i}"), 1)).collect();
        let summary = LogSummary::default();
        let prompt = build_analysis_prompt(&patterns, &summary);
        assert!(prompt.contains("pattern-9"));
        assert!(!prompt.contains("pattern-10\n"));
        // Unique count still reflects everything observed.
        assert!(prompt.contains("Unique Error Patterns: 30"));
    }
}
