//! The governance pipeline: every outbound LLM call goes through here.
//!
//! Sequence: redact -> rate gate -> cost gate -> external call -> validate
//! -> record usage. Raw caller text never reaches the backend, a blocked
//! caller never triggers the call at all, and the model's answer is never
//! surfaced unvalidated. The only side effects are quota-state mutation and
//! the single network call.

use crate::config::GovernanceConfig;
use crate::llm_client::{LlmClient, LlmError};
use crate::patterns::{group_errors, ErrorPattern, LogEvent, LogSummary};
use crate::prompt::build_analysis_prompt;
use crate::quota::{QuotaGuard, QuotaLimits, UsageStats};
use crate::redact::RedactionEngine;
use crate::schema::{parse_analysis, Analysis};
use crate::validate::{OutputValidator, ValidatedAnalysis};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// How the pipeline answered when the model was not consulted or usable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackMode {
    RuleBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    /// The call went through; the analysis (possibly degraded) is attached.
    Completed,
    /// A quota gate refused the call before it was made.
    Blocked,
    /// The external call did not return in time; no usage was recorded.
    TimedOut,
}

/// What the caller gets back from one governed invocation.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<FallbackMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ValidatedAnalysis>,
    /// Rule-based recommendations, populated whenever the model's answer is
    /// unavailable.
    pub fallback_recommendations: Vec<String>,
    pub redaction_stats: BTreeMap<&'static str, usize>,
    pub quota_stats: UsageStats,
}

/// Per-caller usage snapshot plus the limits it is measured against.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub stats: UsageStats,
    pub limits: QuotaLimits,
}

/// Orchestrates redaction, quota gates, the external call, and validation.
pub struct GovernancePipeline {
    redaction: RedactionEngine,
    quota: QuotaGuard,
    validator: OutputValidator,
    client: Box<dyn LlmClient>,
}

impl GovernancePipeline {
    /// Pipeline with a live documentation-link prober.
    pub fn new(config: &GovernanceConfig, client: Box<dyn LlmClient>) -> Self {
        Self::with_validator(config, client, OutputValidator::new())
    }

    pub fn with_validator(
        config: &GovernanceConfig,
        client: Box<dyn LlmClient>,
        validator: OutputValidator,
    ) -> Self {
        Self {
            redaction: RedactionEngine::new(config.redaction.redact_ips),
            quota: QuotaGuard::new(config.quota_limits(), config.cost_model()),
            validator,
            client,
        }
    }

    /// Run one governed analysis for a caller.
    pub fn analyze(
        &self,
        caller: &str,
        events: &[LogEvent],
        summary: &LogSummary,
    ) -> PipelineResult {
        // Step 1: nothing leaves this function unredacted.
        let (sanitized, redaction_stats) = self.redaction.redact_log_events(events);
        let patterns = group_errors(&sanitized);

        // Step 2: quota gates, cheapest check first. A blocked caller gets a
        // definite answer and the external call is never made.
        for decision in [
            self.quota.check_rate_limit(caller),
            self.quota.check_cost_limit(caller),
        ] {
            if let Some(reason) = decision.reason() {
                warn!(caller, reason, "LLM call blocked by quota");
                return PipelineResult {
                    status: PipelineStatus::Blocked,
                    fallback_mode: Some(FallbackMode::RuleBased),
                    blocked_reason: Some(reason.to_string()),
                    analysis: None,
                    fallback_recommendations: rule_based_recommendations(&patterns),
                    redaction_stats,
                    quota_stats: self.quota.stats(caller),
                };
            }
        }

        // Step 3: the one external call, built exclusively from sanitized
        // patterns.
        let prompt = build_analysis_prompt(&patterns, summary);
        let analysis = match self.client.analyze(&prompt) {
            Ok(response) => {
                // Step 5: bill after the fact with observed counts.
                self.quota
                    .record_usage(caller, response.input_tokens, response.output_tokens);
                parse_analysis(&response.text)
            }
            Err(LlmError::Timeout(secs)) => {
                // Actual token usage is unknown; record nothing, retry is
                // the caller's decision.
                warn!(caller, timeout_secs = secs, "LLM call timed out");
                return PipelineResult {
                    status: PipelineStatus::TimedOut,
                    fallback_mode: Some(FallbackMode::RuleBased),
                    blocked_reason: None,
                    analysis: None,
                    fallback_recommendations: rule_based_recommendations(&patterns),
                    redaction_stats,
                    quota_stats: self.quota.stats(caller),
                };
            }
            Err(e) => {
                warn!(caller, error = %e, "LLM call failed, degrading");
                Analysis::degraded(&format!("Error during LLM analysis: {e}"))
            }
        };

        // Step 4: never surface the model's answer unvalidated.
        let validated = self.validator.validate_full_analysis(&analysis);
        info!(
            caller,
            recommendations = validated.summary.total_recommendations,
            dangerous = validated.summary.dangerous_operations,
            overall_valid = validated.overall_valid,
            "analysis validated"
        );

        PipelineResult {
            status: PipelineStatus::Completed,
            fallback_mode: None,
            blocked_reason: None,
            analysis: Some(validated),
            fallback_recommendations: Vec::new(),
            redaction_stats,
            quota_stats: self.quota.stats(caller),
        }
    }

    /// Usage snapshot plus configured limits for a caller.
    pub fn usage_report(&self, caller: &str) -> UsageReport {
        UsageReport {
            stats: self.quota.stats(caller),
            limits: self.quota.limits(),
        }
    }

    /// The quota guard, for callers that gate other work on the same
    /// budgets.
    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }
}

/// Recommendations when the model's answer is unavailable.
fn rule_based_recommendations(patterns: &[ErrorPattern]) -> Vec<String> {
    if patterns.is_empty() {
        return vec!["No errors found - system appears healthy".to_string()];
    }

    let mut recommendations = Vec::new();
    let top = &patterns[0];
    recommendations.push(format!(
        "Investigate most frequent error: {} ({} occurrences)",
        top.pattern, top.count
    ));
    if patterns.len() > 5 {
        recommendations.push(format!(
            "Multiple error types detected ({} unique patterns) - consider systematic review",
            patterns.len()
        ));
    }
    recommendations
        .push("Review CloudWatch Logs for detailed stack traces and context".to_string());
    recommendations.push("Set up CloudWatch Alarms for critical error patterns".to_string());
    recommendations
}
