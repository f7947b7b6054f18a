//! Per-caller request-rate and cost ceilings for LLM calls.
//!
//! Sliding-window accounting: a caller's request history is pruned of
//! entries older than 24h before every read or write, the hourly check
//! counts the trailing hour, and the daily cost check sums the cost of
//! requests still inside the 24h window. Checks never fail — they always
//! return a definite allow/block decision.
//!
//! Billing is after-the-fact: `check_*` gates on usage recorded so far and
//! the admitted request's own cost lands at `record_usage` once real token
//! counts are known.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Token pricing, dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub input_rate_per_million: f64,
    pub output_rate_per_million: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        // Claude Sonnet pricing as of Dec 2024.
        Self {
            input_rate_per_million: 3.0,
            output_rate_per_million: 15.0,
        }
    }
}

impl CostModel {
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_rate_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_rate_per_million
    }
}

/// Configured ceilings, shared by all callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaLimits {
    pub hourly_requests: usize,
    pub daily_requests: usize,
    pub daily_cost_usd: f64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            hourly_requests: 10,
            daily_requests: 50,
            daily_cost_usd: 10.0,
        }
    }
}

/// Outcome of a quota check. Blocking is a control condition, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QuotaDecision {
    Allowed,
    Blocked { reason: String },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            QuotaDecision::Allowed => None,
            QuotaDecision::Blocked { reason } => Some(reason),
        }
    }
}

/// One recorded request: when it happened and what it cost.
#[derive(Debug, Clone, Copy)]
struct RequestRecord {
    at: Instant,
    cost_usd: f64,
}

/// Per-caller usage. Created lazily on first contact, pruned but never
/// deleted.
#[derive(Debug, Default)]
struct CallerUsage {
    requests: VecDeque<RequestRecord>,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost_usd: f64,
}

impl CallerUsage {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.duration_since(front.at) > DAY {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests_last_hour(&self, now: Instant) -> usize {
        self.requests
            .iter()
            .filter(|r| now.duration_since(r.at) < HOUR)
            .count()
    }

    /// Cost of requests still inside the trailing 24h window.
    fn window_cost_usd(&self) -> f64 {
        self.requests.iter().map(|r| r.cost_usd).sum()
    }
}

/// Usage snapshot for one caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub requests_last_hour: usize,
    pub requests_last_day: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub today_cost_usd: f64,
}

/// Enforces rate and cost ceilings per caller.
///
/// An explicit service object constructed once per process and shared by
/// reference; there is no global accessor. All operations run inside one
/// internal mutex doing only in-memory arithmetic.
#[derive(Debug)]
pub struct QuotaGuard {
    limits: QuotaLimits,
    cost_model: CostModel,
    callers: Mutex<HashMap<String, CallerUsage>>,
}

impl QuotaGuard {
    pub fn new(limits: QuotaLimits, cost_model: CostModel) -> Self {
        Self {
            limits,
            cost_model,
            callers: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Check the hourly and daily request windows for a caller.
    pub fn check_rate_limit(&self, caller: &str) -> QuotaDecision {
        self.check_rate_limit_at(caller, Instant::now())
    }

    /// Check the trailing-24h cost window for a caller.
    pub fn check_cost_limit(&self, caller: &str) -> QuotaDecision {
        self.check_cost_limit_at(caller, Instant::now())
    }

    /// Record a completed request with observed token usage.
    pub fn record_usage(&self, caller: &str, input_tokens: u64, output_tokens: u64) {
        self.record_usage_at(caller, input_tokens, output_tokens, Instant::now());
    }

    /// Usage snapshot for a caller.
    pub fn stats(&self, caller: &str) -> UsageStats {
        self.stats_at(caller, Instant::now())
    }

    // Time-injected variants: windows are pure arithmetic over the supplied
    // instant, which keeps them testable without sleeping.

    pub fn check_rate_limit_at(&self, caller: &str, now: Instant) -> QuotaDecision {
        let mut callers = self.lock();
        let usage = callers.entry(caller.to_string()).or_default();
        usage.prune(now);

        let last_hour = usage.requests_last_hour(now);
        if last_hour >= self.limits.hourly_requests {
            let retry_mins = usage
                .requests
                .iter()
                .filter(|r| now.duration_since(r.at) < HOUR)
                .map(|r| (HOUR - now.duration_since(r.at)).as_secs() / 60 + 1)
                .min()
                .unwrap_or(60);
            return QuotaDecision::Blocked {
                reason: format!(
                    "Hourly rate limit exceeded ({last_hour}/{}). Try again in {retry_mins} minutes.",
                    self.limits.hourly_requests
                ),
            };
        }

        let last_day = usage.requests.len();
        if last_day >= self.limits.daily_requests {
            let retry_hours = usage
                .requests
                .front()
                .map(|r| (DAY - now.duration_since(r.at)).as_secs() / 3600 + 1)
                .unwrap_or(24);
            return QuotaDecision::Blocked {
                reason: format!(
                    "Daily rate limit exceeded ({last_day}/{}). Try again in {retry_hours} hours.",
                    self.limits.daily_requests
                ),
            };
        }

        QuotaDecision::Allowed
    }

    pub fn check_cost_limit_at(&self, caller: &str, now: Instant) -> QuotaDecision {
        let mut callers = self.lock();
        let usage = callers.entry(caller.to_string()).or_default();
        usage.prune(now);

        let window_cost = usage.window_cost_usd();
        if window_cost >= self.limits.daily_cost_usd {
            return QuotaDecision::Blocked {
                reason: format!(
                    "Daily cost limit exceeded (${window_cost:.2}/${:.2}). Limit clears as usage ages out of the 24h window.",
                    self.limits.daily_cost_usd
                ),
            };
        }

        QuotaDecision::Allowed
    }

    pub fn record_usage_at(&self, caller: &str, input_tokens: u64, output_tokens: u64, now: Instant) {
        let cost = self.cost_model.cost_usd(input_tokens, output_tokens);
        let mut callers = self.lock();
        let usage = callers.entry(caller.to_string()).or_default();
        usage.prune(now);
        usage.requests.push_back(RequestRecord { at: now, cost_usd: cost });
        usage.total_input_tokens += input_tokens;
        usage.total_output_tokens += output_tokens;
        usage.total_cost_usd += cost;
        debug!(
            caller,
            input_tokens, output_tokens, cost_usd = cost, "recorded LLM usage"
        );
    }

    pub fn stats_at(&self, caller: &str, now: Instant) -> UsageStats {
        let mut callers = self.lock();
        let usage = callers.entry(caller.to_string()).or_default();
        usage.prune(now);
        UsageStats {
            requests_last_hour: usage.requests_last_hour(now),
            requests_last_day: usage.requests.len(),
            total_input_tokens: usage.total_input_tokens,
            total_output_tokens: usage.total_output_tokens,
            total_cost_usd: usage.total_cost_usd,
            today_cost_usd: usage.window_cost_usd(),
        }
    }

    // A poisoned lock means another thread panicked mid-update; the state is
    // plain counters, so recover rather than propagate the panic.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallerUsage>> {
        self.callers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn guard() -> QuotaGuard {
        QuotaGuard::new(QuotaLimits::default(), CostModel::default())
    }

    #[test]
    fn test_hourly_limit_blocks_eleventh_request() {
        let guard = guard();
        let now = Instant::now();
        for i in 0..10 {
            let decision = guard.check_rate_limit_at("caller-1", now);
            assert!(decision.is_allowed(), "request {} should be allowed", i + 1);
            guard.record_usage_at("caller-1", 100, 50, now);
        }
        let decision = guard.check_rate_limit_at("caller-1", now);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("Hourly"));
        assert_eq!(guard.stats_at("caller-1", now).requests_last_hour, 10);
    }

    #[test]
    fn test_hourly_window_slides() {
        let guard = guard();
        let start = Instant::now();
        for _ in 0..10 {
            guard.record_usage_at("caller-1", 10, 10, start);
        }
        let later = start + Duration::from_secs(3601);
        assert!(guard.check_rate_limit_at("caller-1", later).is_allowed());
        let stats = guard.stats_at("caller-1", later);
        assert_eq!(stats.requests_last_hour, 0);
        assert_eq!(stats.requests_last_day, 10);
    }

    #[test]
    fn test_daily_limit_and_pruning() {
        let limits = QuotaLimits {
            hourly_requests: 100,
            daily_requests: 50,
            daily_cost_usd: 1000.0,
        };
        let guard = QuotaGuard::new(limits, CostModel::default());
        let start = Instant::now();
        for _ in 0..50 {
            guard.record_usage_at("caller-1", 10, 10, start);
        }
        let same_day = start + Duration::from_secs(7200);
        let decision = guard.check_rate_limit_at("caller-1", same_day);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("Daily"));

        // Once the records age past 24h they stop counting entirely.
        let next_day = start + Duration::from_secs(86_401);
        assert!(guard.check_rate_limit_at("caller-1", next_day).is_allowed());
        assert_eq!(guard.stats_at("caller-1", next_day).requests_last_day, 0);
    }

    #[test]
    fn test_cost_arithmetic() {
        let guard = guard();
        let now = Instant::now();
        guard.record_usage_at("caller-2", 1000, 500, now);
        let stats = guard.stats_at("caller-2", now);
        let expected = (1000.0 / 1e6) * 3.0 + (500.0 / 1e6) * 15.0;
        assert_abs_diff_eq!(stats.total_cost_usd, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.today_cost_usd, expected, epsilon = 1e-9);
        assert_eq!(stats.total_input_tokens, 1000);
        assert_eq!(stats.total_output_tokens, 500);
    }

    #[test]
    fn test_cost_limit_blocks() {
        let limits = QuotaLimits {
            daily_cost_usd: 0.01,
            ..QuotaLimits::default()
        };
        let guard = QuotaGuard::new(limits, CostModel::default());
        let now = Instant::now();
        guard.record_usage_at("caller-4", 100_000, 50_000, now);
        let decision = guard.check_cost_limit_at("caller-4", now);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().to_lowercase().contains("cost limit exceeded"));
    }

    #[test]
    fn test_cost_window_is_rolling_but_total_is_cumulative() {
        let guard = guard();
        let start = Instant::now();
        guard.record_usage_at("caller-5", 1_000_000, 0, start);
        let next_day = start + Duration::from_secs(86_401);
        let stats = guard.stats_at("caller-5", next_day);
        assert_abs_diff_eq!(stats.total_cost_usd, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.today_cost_usd, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_callers_are_independent() {
        let guard = guard();
        let now = Instant::now();
        for _ in 0..10 {
            guard.record_usage_at("caller-a", 10, 10, now);
        }
        assert!(!guard.check_rate_limit_at("caller-a", now).is_allowed());
        assert!(guard.check_rate_limit_at("caller-b", now).is_allowed());
    }

    #[test]
    fn test_concurrent_recording_is_exact() {
        let limits = QuotaLimits {
            hourly_requests: 1000,
            daily_requests: 1000,
            daily_cost_usd: 1000.0,
        };
        let guard = QuotaGuard::new(limits, CostModel::default());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        guard.record_usage("shared-caller", 10, 5);
                        assert!(guard.check_rate_limit("shared-caller").is_allowed());
                    }
                });
            }
        });
        // No lost updates: every recorded request is visible.
        let stats = guard.stats("shared-caller");
        assert_eq!(stats.requests_last_day, 200);
        assert_eq!(stats.total_input_tokens, 2000);
        assert_eq!(stats.total_output_tokens, 1000);
    }

    #[test]
    fn test_unknown_caller_has_empty_stats() {
        let guard = guard();
        let stats = guard.stats("never-seen");
        assert_eq!(stats.requests_last_day, 0);
        assert_eq!(stats.total_cost_usd, 0.0);
    }
}
