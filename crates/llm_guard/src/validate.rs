//! Validation of model-generated recommendations before they are surfaced.
//!
//! Checks run in escalating order of consequence: required fields, a
//! destructive-operation denylist, priority sanity, documentation-link
//! verification, and a vagueness heuristic. A validated item's severity is
//! the maximum of its findings; DANGEROUS wins over everything, and an item
//! with a missing required field is never SAFE.
//!
//! Pure with respect to its input: the original document is never mutated,
//! every call returns fresh annotated values.

use crate::schema::{Analysis, Recommendation, RootCause};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;

/// Operations that must never be surfaced without human review. Matching is
/// substring-based over the lowercased description, fail-closed: a false
/// DANGEROUS costs review time, a false SAFE costs an outage.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "delete all",
    "drop database",
    "drop table",
    "truncate table",
    "rm -rf",
    "format",
    "destroy",
    "terminate all",
    "remove all",
    "--force",
    "--no-preserve-root",
];

/// Allow-listed documentation domains.
const VALID_DOC_DOMAINS: &[&str] = &[
    "docs.aws.amazon.com",
    "aws.amazon.com/documentation",
    "aws.amazon.com/getting-started",
];

/// Phrases that mark a recommendation as non-actionable.
const VAGUE_PHRASES: &[&str] = &[
    "just restart",
    "try restarting",
    "increase resources",
    "check the logs",
    "investigate further",
    "contact support",
];

/// Hedge words that mark root-cause evidence as speculative.
const SPECULATION_INDICATORS: &[&str] = &["might", "possibly", "could be", "perhaps", "maybe"];

const REQUIRED_RECOMMENDATION_FIELDS: &[&str] = &["priority", "title", "description", "aws_service"];
const REQUIRED_ROOT_CAUSE_FIELDS: &[&str] = &["title", "description", "evidence"];

const VALID_PRIORITIES: &[&str] = &["CRITICAL", "HIGH", "MEDIUM", "LOW"];

const MIN_DESCRIPTION_LEN: usize = 50;

static SERVICE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ec2|rds|s3|lambda|cloudwatch|iam|vpc)\b").unwrap());
static CLI_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)aws (ec2|rds|s3|cloudwatch)").unwrap());

/// Three-level severity taxonomy. Ordering matters: an item's severity is
/// the max of its findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Safe,
    RequiresReview,
    Dangerous,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Safe => "SAFE",
            Severity::RequiresReview => "REQUIRES_REVIEW",
            Severity::Dangerous => "DANGEROUS",
        };
        f.write_str(s)
    }
}

/// One validation finding attached to an item.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub category: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn new(category: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }
}

/// A recommendation with its validation verdict attached.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedRecommendation {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub findings: Vec<Finding>,
    pub severity: Severity,
}

impl ValidatedRecommendation {
    pub fn requires_human_approval(&self) -> bool {
        self.severity != Severity::Safe
    }
}

/// A root cause with its validation verdict attached.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedRootCause {
    #[serde(flatten)]
    pub root_cause: RootCause,
    pub findings: Vec<Finding>,
    pub severity: Severity,
}

/// Aggregate counts over a full validated analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub total_recommendations: usize,
    pub total_root_causes: usize,
    pub dangerous_operations: usize,
    pub requires_review: usize,
    pub all_warnings: Vec<String>,
}

/// The full analysis with every item validated.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedAnalysis {
    pub executive_summary: String,
    pub severity_assessment: String,
    pub affected_services: Vec<String>,
    pub preventive_measures: Vec<String>,
    pub recommendations: Vec<ValidatedRecommendation>,
    pub root_causes: Vec<ValidatedRootCause>,
    pub summary: ValidationSummary,
    pub overall_valid: bool,
}

/// Outcome of probing a documentation link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Reachable,
    BadStatus(u16),
    /// Network failure. Means "unverified", never "invalid".
    Unverifiable,
}

/// Best-effort reachability check for documentation links. Injectable so
/// validation stays deterministic under test and usable offline.
pub trait LinkProber: Send + Sync {
    fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Probes links with a short-timeout HEAD request.
pub struct HttpLinkProber {
    client: reqwest::blocking::Client,
}

impl HttpLinkProber {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self { client })
    }
}

impl LinkProber for HttpLinkProber {
    fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.head(url).send() {
            Ok(response) if response.status().is_success() => ProbeOutcome::Reachable,
            Ok(response) => ProbeOutcome::BadStatus(response.status().as_u16()),
            Err(_) => ProbeOutcome::Unverifiable,
        }
    }
}

/// Never touches the network; every link is simply unverified.
pub struct OfflineLinkProber;

impl LinkProber for OfflineLinkProber {
    fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome::Unverifiable
    }
}

/// Validates model output. Deterministic for a fixed prober.
pub struct OutputValidator {
    prober: Box<dyn LinkProber>,
}

impl Default for OutputValidator {
    fn default() -> Self {
        Self::offline()
    }
}

impl OutputValidator {
    /// Validator with a live HTTP link prober; falls back to offline
    /// validation when the HTTP client cannot be built.
    pub fn new() -> Self {
        match HttpLinkProber::new() {
            Ok(prober) => Self::with_prober(Box::new(prober)),
            Err(e) => {
                tracing::warn!("link prober unavailable, links will be unverified: {e}");
                Self::offline()
            }
        }
    }

    /// Validator that never touches the network.
    pub fn offline() -> Self {
        Self::with_prober(Box::new(OfflineLinkProber))
    }

    pub fn with_prober(prober: Box<dyn LinkProber>) -> Self {
        Self { prober }
    }

    /// Validate a single recommendation.
    pub fn validate_recommendation(&self, rec: &Recommendation) -> ValidatedRecommendation {
        let mut findings = Vec::new();

        // Check 1: required field presence.
        let fields = [
            &rec.priority,
            &rec.title,
            &rec.description,
            &rec.aws_service,
        ];
        let missing: Vec<&str> = REQUIRED_RECOMMENDATION_FIELDS
            .iter()
            .zip(fields)
            .filter(|(_, value)| is_absent(value))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            findings.push(Finding::new(
                "missing_fields",
                Severity::RequiresReview,
                format!("Missing required fields: {}", missing.join(", ")),
            ));
        }

        // Check 2: destructive operations, one finding per match.
        let description = rec.description.as_deref().unwrap_or("").to_lowercase();
        for keyword in DANGEROUS_KEYWORDS {
            if description.contains(keyword) {
                findings.push(Finding::new(
                    "dangerous_operation",
                    Severity::Dangerous,
                    format!("Dangerous operation detected: {keyword}"),
                ));
            }
        }

        // Check 3: priority must be one of the fixed enum.
        if let Some(priority) = rec.priority.as_deref() {
            if !priority.trim().is_empty()
                && !VALID_PRIORITIES.contains(&priority.to_uppercase().as_str())
            {
                findings.push(Finding::new(
                    "invalid_priority",
                    Severity::RequiresReview,
                    format!("Invalid priority: {priority}"),
                ));
            }
        }

        // Check 4: documentation link. Absent is never SAFE; a network
        // failure during verification never escalates.
        match rec.documentation_link.as_deref() {
            Some(link) if !link.trim().is_empty() => {
                if !VALID_DOC_DOMAINS.iter().any(|domain| link.contains(domain)) {
                    findings.push(Finding::new(
                        "documentation_link",
                        Severity::RequiresReview,
                        format!("Invalid AWS documentation link: {link}"),
                    ));
                } else {
                    match self.prober.probe(link) {
                        ProbeOutcome::Reachable => {}
                        ProbeOutcome::BadStatus(status) => findings.push(Finding::new(
                            "documentation_link",
                            Severity::RequiresReview,
                            format!("Documentation link returned HTTP {status}: {link}"),
                        )),
                        ProbeOutcome::Unverifiable => findings.push(Finding::new(
                            "documentation_link",
                            Severity::Safe,
                            format!("Could not verify documentation link (network): {link}"),
                        )),
                    }
                }
            }
            _ => findings.push(Finding::new(
                "documentation_link",
                Severity::RequiresReview,
                "No AWS documentation link provided".to_string(),
            )),
        }

        // Check 5: vagueness heuristic.
        if !description.is_empty() && is_vague_description(&description) {
            findings.push(Finding::new(
                "vague_description",
                Severity::RequiresReview,
                "Description appears vague or generic".to_string(),
            ));
        }

        let severity = max_severity(&findings);
        ValidatedRecommendation {
            recommendation: rec.clone(),
            findings,
            severity,
        }
    }

    /// Validate a root cause. Speculative evidence is flagged without
    /// invalidating the item.
    pub fn validate_root_cause(&self, cause: &RootCause) -> ValidatedRootCause {
        let mut findings = Vec::new();

        let fields = [&cause.title, &cause.description, &cause.evidence];
        let missing: Vec<&str> = REQUIRED_ROOT_CAUSE_FIELDS
            .iter()
            .zip(fields)
            .filter(|(_, value)| is_absent(value))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            findings.push(Finding::new(
                "missing_fields",
                Severity::RequiresReview,
                format!("Missing fields: {}", missing.join(", ")),
            ));
        }

        let evidence = cause.evidence.as_deref().unwrap_or("").to_lowercase();
        if SPECULATION_INDICATORS
            .iter()
            .any(|indicator| evidence.contains(indicator))
        {
            findings.push(Finding::new(
                "speculative_evidence",
                Severity::Safe,
                "Evidence contains speculative language - may not be conclusive".to_string(),
            ));
        }

        let severity = max_severity(&findings);
        ValidatedRootCause {
            root_cause: cause.clone(),
            findings,
            severity,
        }
    }

    /// Validate every item in an analysis and aggregate the verdicts.
    pub fn validate_full_analysis(&self, analysis: &Analysis) -> ValidatedAnalysis {
        let recommendations: Vec<ValidatedRecommendation> = analysis
            .recommendations
            .iter()
            .map(|rec| self.validate_recommendation(rec))
            .collect();
        let root_causes: Vec<ValidatedRootCause> = analysis
            .root_causes
            .iter()
            .map(|cause| self.validate_root_cause(cause))
            .collect();

        let all_warnings: Vec<String> = recommendations
            .iter()
            .flat_map(|r| r.findings.iter())
            .chain(root_causes.iter().flat_map(|c| c.findings.iter()))
            .map(|f| f.message.clone())
            .collect();

        let dangerous_operations = recommendations
            .iter()
            .filter(|r| r.severity == Severity::Dangerous)
            .count();
        let requires_review = recommendations
            .iter()
            .filter(|r| r.severity == Severity::RequiresReview)
            .count();

        ValidatedAnalysis {
            executive_summary: analysis.executive_summary_or_default(),
            severity_assessment: analysis.severity_assessment.clone(),
            affected_services: analysis.affected_services.clone(),
            preventive_measures: analysis.preventive_measures.clone(),
            summary: ValidationSummary {
                total_recommendations: recommendations.len(),
                total_root_causes: root_causes.len(),
                dangerous_operations,
                requires_review,
                all_warnings,
            },
            overall_valid: dangerous_operations == 0,
            recommendations,
            root_causes,
        }
    }
}

fn is_absent(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn max_severity(findings: &[Finding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Safe)
}

fn is_vague_description(description_lower: &str) -> bool {
    if description_lower.chars().count() < MIN_DESCRIPTION_LEN {
        return true;
    }
    if VAGUE_PHRASES
        .iter()
        .any(|phrase| description_lower.contains(phrase))
    {
        return true;
    }
    // Must mention at least one recognizable service or CLI invocation.
    !(SERVICE_MENTION.is_match(description_lower) || CLI_MENTION.is_match(description_lower))
}
