//! Error pattern extraction from raw log events.
//!
//! Groups similar log messages by normalizing out the variable parts
//! (timestamps, UUIDs, instance ids, numbers) so the analysis prompt sees
//! "Lambda timeout exceeded" once with a count, not 500 near-duplicates.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Maximum length of a normalized pattern key.
const MAX_PATTERN_LEN: usize = 200;

/// A single log event as delivered by the log collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Source timestamp, if the collector provided one.
    #[serde(default)]
    pub timestamp: Option<String>,
    pub message: String,
    /// Set by the redaction engine when any sensitive pattern matched.
    #[serde(default)]
    pub redacted: bool,
}

impl LogEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            message: message.into(),
            redacted: false,
        }
    }
}

/// A group of similar errors, keyed by normalized message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: usize,
    /// First raw message seen for this pattern.
    pub example: String,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
}

/// Summary statistics over the analyzed window, included in the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub lookback_hours: u64,
}

static NORMALIZERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2}").unwrap(),
            "[TIMESTAMP]",
        ),
        (
            Regex::new(r"[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}").unwrap(),
            "[ID]",
        ),
        (Regex::new(r"i-[a-f0-9]+").unwrap(), "[INSTANCE-ID]"),
        (Regex::new(r"\d+").unwrap(), "[NUM]"),
    ]
});

/// Normalize a log message into its pattern key.
pub fn extract_pattern(message: &str) -> String {
    let mut pattern = message.to_string();
    for (re, replacement) in NORMALIZERS.iter() {
        pattern = re.replace_all(&pattern, *replacement).to_string();
    }
    let collapsed = pattern.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_PATTERN_LEN).collect()
}

/// Group log events by normalized pattern, most frequent first.
pub fn group_errors(events: &[LogEvent]) -> Vec<ErrorPattern> {
    let mut groups: HashMap<String, ErrorPattern> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for event in events {
        let key = extract_pattern(&event.message);
        match groups.get_mut(&key) {
            Some(group) => {
                group.count += 1;
                group.last_seen = event.timestamp.clone();
            }
            None => {
                order.push(key.clone());
                groups.insert(
                    key.clone(),
                    ErrorPattern {
                        pattern: key,
                        count: 1,
                        example: event.message.clone(),
                        first_seen: event.timestamp.clone(),
                        last_seen: event.timestamp.clone(),
                    },
                );
            }
        }
    }

    let mut patterns: Vec<ErrorPattern> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count));
    patterns
}
