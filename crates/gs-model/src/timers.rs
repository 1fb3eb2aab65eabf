//! Scheduled job persistence and resume/catch-up (spec §6 `gsTimers`, §9
//! "Serialization of timers/intervals").

/// A delayed or interval call, as persisted on the owning entity. Internal
/// and anonymous timers are never added here, matching spec §6
/// ("a `gsTimers` sub-record persists scheduled delayed calls for each
/// entity (but not internal/anonymous timers)").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimerEntry {
    /// Milliseconds since epoch at which this timer was (re)scheduled.
    pub start: u64,
    pub options: TimerOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimerOptions {
    pub fname: String,
    /// Delay (one-shot) or initial delay (interval), in milliseconds.
    pub delay: u64,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    /// `Some(period_ms)` for an interval timer; `None` for one-shot.
    #[serde(default)]
    pub interval: Option<u64>,
    /// When true, elapsed interval ticks are not replayed on resume.
    #[serde(default)]
    pub no_catch_up: bool,
}

/// Hard ceiling on synchronous catch-up calls performed for a single timer
/// on resume, so a long-unloaded entity with a tight interval can't stall
/// startup processing a storm of missed ticks.
pub const MAX_CATCH_UP_CALLS: u64 = 1000;

/// What to do with a resumed timer: how many catch-up invocations to run
/// synchronously right now, and when the next invocation after that falls,
/// aligned to the original cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Number of calls to make immediately (0 or 1 for a one-shot; 0..=N for
    /// an interval).
    pub immediate_calls: u64,
    /// Whether `immediate_calls` was capped below what the elapsed time
    /// would otherwise imply.
    pub truncated: bool,
    /// Delay, in milliseconds from `now_ms`, until the next scheduled call.
    pub next_delay_ms: u64,
}

/// Plan how to resume `entry` given the current wall-clock time.
///
/// One-shot: fires immediately if its delay has already elapsed (clamped to
/// the past), otherwise waits out the remainder.
///
/// Interval: replays `floor(age / period)` missed ticks (unless
/// `no_catch_up`), capped at `cap`, then reschedules so the next tick lands
/// on the original cadence rather than restarting the period from `now`.
pub fn plan_resume(entry: &TimerEntry, now_ms: u64, cap: u64) -> ResumePlan {
    let age = now_ms.saturating_sub(entry.start);

    match entry.options.interval {
        None => {
            if age >= entry.options.delay {
                ResumePlan { immediate_calls: 1, truncated: false, next_delay_ms: 0 }
            } else {
                ResumePlan {
                    immediate_calls: 0,
                    truncated: false,
                    next_delay_ms: entry.options.delay - age,
                }
            }
        }
        Some(period) if period > 0 => {
            let elapsed_since_first = age.saturating_sub(entry.options.delay);
            let ticks = if age < entry.options.delay {
                0
            } else {
                1 + elapsed_since_first / period
            };

            let immediate_calls = if entry.options.no_catch_up {
                if ticks > 0 { 1 } else { 0 }
            } else {
                ticks
            };
            let truncated = !entry.options.no_catch_up && immediate_calls > cap;
            let immediate_calls = immediate_calls.min(cap);

            let next_delay_ms = if age < entry.options.delay {
                entry.options.delay - age
            } else {
                period - (elapsed_since_first % period)
            };

            ResumePlan { immediate_calls, truncated, next_delay_ms }
        }
        Some(_) => ResumePlan { immediate_calls: 0, truncated: false, next_delay_ms: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot(delay: u64) -> TimerEntry {
        TimerEntry {
            start: 0,
            options: TimerOptions { fname: "f".into(), delay, args: None, interval: None, no_catch_up: false },
        }
    }

    fn interval(delay: u64, period: u64, no_catch_up: bool) -> TimerEntry {
        TimerEntry {
            start: 0,
            options: TimerOptions { fname: "f".into(), delay, args: None, interval: Some(period), no_catch_up },
        }
    }

    #[test]
    fn one_shot_not_yet_due_waits_remainder() {
        let plan = plan_resume(&one_shot(1000), 400, MAX_CATCH_UP_CALLS);
        assert_eq!(plan, ResumePlan { immediate_calls: 0, truncated: false, next_delay_ms: 600 });
    }

    #[test]
    fn one_shot_elapsed_fires_once() {
        let plan = plan_resume(&one_shot(1000), 5000, MAX_CATCH_UP_CALLS);
        assert_eq!(plan, ResumePlan { immediate_calls: 1, truncated: false, next_delay_ms: 0 });
    }

    #[test]
    fn interval_replays_missed_ticks_and_realigns() {
        // delay=100, period=100: ticks fire at 100, 200, 300, ...
        // at age=350, three ticks (100,200,300) have already happened.
        let plan = plan_resume(&interval(100, 100, false), 350, MAX_CATCH_UP_CALLS);
        assert_eq!(plan.immediate_calls, 3);
        assert_eq!(plan.next_delay_ms, 50);
        assert!(!plan.truncated);
    }

    #[test]
    fn interval_no_catch_up_fires_at_most_once() {
        let plan = plan_resume(&interval(100, 100, true), 10_000, MAX_CATCH_UP_CALLS);
        assert_eq!(plan.immediate_calls, 1);
    }

    #[test]
    fn interval_catch_up_is_capped() {
        let plan = plan_resume(&interval(0, 1, false), 10_000, 50);
        assert_eq!(plan.immediate_calls, 50);
        assert!(plan.truncated);
    }

    #[test]
    fn interval_before_first_delay_has_no_immediate_calls() {
        let plan = plan_resume(&interval(500, 100, false), 200, MAX_CATCH_UP_CALLS);
        assert_eq!(plan.immediate_calls, 0);
        assert_eq!(plan.next_delay_ms, 300);
    }
}
