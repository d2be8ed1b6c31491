use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use crate::crd::SafetySpec;

/* ============================= CLOCK ============================= */

/// Source of wall-clock seconds for cooldown arithmetic.
///
/// Injected so tests can simulate elapsed time deterministically.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Production clock: seconds since the Unix epoch.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/* ============================= DIRECTION ============================= */

/// Which way a scale decision moves, selecting the matching cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

impl ScaleDirection {
    pub fn between(current: i32, desired: i32) -> Self {
        if desired > current { Self::Up } else { Self::Down }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/* ============================= DURATION GRAMMAR ============================= */

/// Fallback applied to malformed cooldown strings.
pub const FALLBACK_COOLDOWN_SECS: u64 = 300;

/// Parse a cooldown of the form `<int><unit>` with unit in {s, m, h, d}.
///
/// Anything outside the grammar yields the five-minute fallback.
pub fn parse_duration(s: &str) -> u64 {
    let Some(unit) = s.chars().last() else {
        error!(duration = %s, "invalid_duration_string");
        return FALLBACK_COOLDOWN_SECS;
    };

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => {
            error!(duration = %s, "invalid_duration_string");
            return FALLBACK_COOLDOWN_SECS;
        }
    };

    let digits = &s[..s.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        error!(duration = %s, "invalid_duration_string");
        return FALLBACK_COOLDOWN_SECS;
    }

    match digits.parse::<u64>() {
        Ok(value) => value * multiplier,
        Err(_) => {
            error!(duration = %s, "invalid_duration_string");
            FALLBACK_COOLDOWN_SECS
        }
    }
}

/* ============================= SAFETY MANAGER ============================= */

/// Gates scale decisions through cooldowns and rate limits.
///
/// Owns the process-local cooldown ledger: scaler key → epoch seconds of
/// the most recent recorded mutation. Entries are overwritten on each
/// record and never evicted, so the ledger is bounded by the number of
/// active scalers.
pub struct SafetyManager {
    ledger: Mutex<HashMap<String, u64>>,
    clock: Arc<dyn Clock>,
}

impl SafetyManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// True iff the cooldown for the given direction has elapsed since the
    /// last recorded scale of this scaler. An absent ledger entry reads as
    /// epoch zero, i.e. never scaled.
    pub fn can_scale(&self, key: &str, safety: &SafetySpec, direction: ScaleDirection) -> bool {
        let cooldown = match direction {
            ScaleDirection::Up => parse_duration(safety.scale_up_cooldown()),
            ScaleDirection::Down => parse_duration(safety.scale_down_cooldown()),
        };

        let last = self
            .ledger
            .lock()
            .expect("cooldown ledger lock poisoned")
            .get(key)
            .copied()
            .unwrap_or(0);

        let elapsed = self.clock.now_secs().saturating_sub(last);

        if elapsed < cooldown {
            info!(
                scaler = %key,
                direction = direction.as_str(),
                elapsed,
                cooldown,
                "cooldown_active"
            );
            return false;
        }

        true
    }

    /// Clamp `desired` into `[current - R, current + R]` with
    /// `R = max_scale_rate`. Identity when no change is requested.
    pub fn apply_rate_limits(&self, current: i32, desired: i32, safety: &SafetySpec) -> i32 {
        let max_rate = safety.max_scale_rate();

        if desired > current {
            let limited = desired.min(current + max_rate);
            if limited != desired {
                info!(current, desired, limited, "rate_limited_scale_up");
            }
            limited
        } else if desired < current {
            let limited = desired.max(current - max_rate);
            if limited != desired {
                info!(current, desired, limited, "rate_limited_scale_down");
            }
            limited
        } else {
            desired
        }
    }

    /// Start the cooldown window for a scaler.
    ///
    /// Called only after an actual mutation; a decision that collapses to a
    /// no-op must not record.
    pub fn record_scale_operation(&self, key: &str) {
        let now = self.clock.now_secs();
        self.ledger
            .lock()
            .expect("cooldown ledger lock poisoned")
            .insert(key.to_string(), now);
        info!(scaler = %key, at = now, "scale_operation_recorded");
    }

    /// Number of scalers with a recorded scale operation.
    pub fn ledger_len(&self) -> usize {
        self.ledger
            .lock()
            .expect("cooldown ledger lock poisoned")
            .len()
    }
}

impl Default for SafetyManager {
    fn default() -> Self {
        Self::new()
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock {
        secs: AtomicU64,
    }

    impl ManualClock {
        fn at(secs: u64) -> Arc<Self> {
            Arc::new(Self {
                secs: AtomicU64::new(secs),
            })
        }

        fn set(&self, secs: u64) {
            self.secs.store(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_secs(&self) -> u64 {
            self.secs.load(Ordering::SeqCst)
        }
    }

    fn safety(max_rate: i32, up: &str, down: &str) -> SafetySpec {
        SafetySpec {
            max_scale_rate: Some(max_rate),
            scale_up_cooldown: Some(up.to_string()),
            scale_down_cooldown: Some(down.to_string()),
        }
    }

    // ── duration grammar ──

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("30s"), 30);
    }

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration("5m"), 300);
    }

    #[test]
    fn test_parse_duration_hours() {
        assert_eq!(parse_duration("2h"), 7200);
    }

    #[test]
    fn test_parse_duration_days() {
        assert_eq!(parse_duration("1d"), 86400);
    }

    #[test]
    fn test_parse_duration_zero() {
        assert_eq!(parse_duration("0s"), 0);
    }

    #[test]
    fn test_parse_duration_empty_falls_back() {
        assert_eq!(parse_duration(""), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_no_unit_falls_back() {
        assert_eq!(parse_duration("10"), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_no_digits_falls_back() {
        assert_eq!(parse_duration("m"), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_unknown_unit_falls_back() {
        assert_eq!(parse_duration("5x"), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_signed_falls_back() {
        assert_eq!(parse_duration("+5m"), FALLBACK_COOLDOWN_SECS);
        assert_eq!(parse_duration("-5m"), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_garbage_falls_back() {
        assert_eq!(parse_duration("abc"), FALLBACK_COOLDOWN_SECS);
        assert_eq!(parse_duration("5 m"), FALLBACK_COOLDOWN_SECS);
    }

    #[test]
    fn test_parse_duration_inverts_canonical_emission() {
        for (unit, multiplier) in [("s", 1), ("m", 60), ("h", 3600), ("d", 86400)] {
            for value in [0u64, 1, 5, 30, 90, 600] {
                let emitted = format!("{value}{unit}");
                assert_eq!(parse_duration(&emitted), value * multiplier, "{emitted}");
            }
        }
    }

    // ── direction ──

    #[test]
    fn test_direction_between() {
        assert_eq!(ScaleDirection::between(5, 7), ScaleDirection::Up);
        assert_eq!(ScaleDirection::between(7, 5), ScaleDirection::Down);
    }

    #[test]
    fn test_direction_as_str() {
        assert_eq!(ScaleDirection::Up.as_str(), "up");
        assert_eq!(ScaleDirection::Down.as_str(), "down");
    }

    // ── rate limits ──

    #[test]
    fn test_rate_limit_scale_up() {
        let manager = SafetyManager::new();
        let limited = manager.apply_rate_limits(5, 10, &safety(2, "5m", "5m"));
        assert_eq!(limited, 7);
    }

    #[test]
    fn test_rate_limit_scale_down() {
        let manager = SafetyManager::new();
        let limited = manager.apply_rate_limits(10, 2, &safety(2, "5m", "5m"));
        assert_eq!(limited, 8);
    }

    #[test]
    fn test_rate_limit_within_rate_untouched() {
        let manager = SafetyManager::new();
        assert_eq!(manager.apply_rate_limits(5, 6, &safety(2, "5m", "5m")), 6);
        assert_eq!(manager.apply_rate_limits(5, 3, &safety(2, "5m", "5m")), 3);
    }

    #[test]
    fn test_rate_limit_no_change() {
        let manager = SafetyManager::new();
        assert_eq!(manager.apply_rate_limits(5, 5, &safety(2, "5m", "5m")), 5);
    }

    #[test]
    fn test_rate_limit_delta_bounded_grid() {
        let manager = SafetyManager::new();
        let cfg = safety(3, "5m", "5m");
        for current in 0..=15 {
            for desired in 0..=15 {
                let limited = manager.apply_rate_limits(current, desired, &cfg);
                assert!(
                    (limited - current).abs() <= 3,
                    "delta exceeded: current={current} desired={desired} limited={limited}"
                );
            }
        }
    }

    // ── cooldowns ──

    #[test]
    fn test_cooldown_blocking() {
        let clock = ManualClock::at(100);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "30s", "5m");

        manager.record_scale_operation("default/test-scaler");
        clock.set(120);

        assert!(!manager.can_scale("default/test-scaler", &cfg, ScaleDirection::Up));
    }

    #[test]
    fn test_cooldown_expired() {
        let clock = ManualClock::at(100);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "30s", "5m");

        manager.record_scale_operation("default/test-scaler");
        clock.set(131);

        assert!(manager.can_scale("default/test-scaler", &cfg, ScaleDirection::Up));
    }

    #[test]
    fn test_cooldown_boundary_elapsed_equals_cooldown() {
        let clock = ManualClock::at(100);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "30s", "5m");

        manager.record_scale_operation("default/test-scaler");
        clock.set(130);

        assert!(manager.can_scale("default/test-scaler", &cfg, ScaleDirection::Up));
    }

    #[test]
    fn test_cooldown_directions_independent() {
        let clock = ManualClock::at(1000);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "30s", "2m");

        manager.record_scale_operation("default/test-scaler");
        clock.set(1060);

        // 60s elapsed: up cooldown (30s) passed, down cooldown (120s) not
        assert!(manager.can_scale("default/test-scaler", &cfg, ScaleDirection::Up));
        assert!(!manager.can_scale("default/test-scaler", &cfg, ScaleDirection::Down));
    }

    #[test]
    fn test_cooldown_missing_entry_allows() {
        let clock = ManualClock::at(1_000_000);
        let manager = SafetyManager::with_clock(clock);
        let cfg = safety(2, "5m", "5m");

        assert!(manager.can_scale("default/never-scaled", &cfg, ScaleDirection::Up));
        assert!(manager.can_scale("default/never-scaled", &cfg, ScaleDirection::Down));
    }

    #[test]
    fn test_cooldown_keys_independent() {
        let clock = ManualClock::at(1_000_000);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "5m", "5m");

        manager.record_scale_operation("default/a");
        clock.set(1_000_010);

        assert!(!manager.can_scale("default/a", &cfg, ScaleDirection::Up));
        assert!(manager.can_scale("default/b", &cfg, ScaleDirection::Up));
    }

    #[test]
    fn test_record_overwrites_previous_entry() {
        let clock = ManualClock::at(1_000_000);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "30s", "30s");

        manager.record_scale_operation("default/a");
        clock.set(1_000_040);
        assert!(manager.can_scale("default/a", &cfg, ScaleDirection::Up));

        // Second record restarts the window
        manager.record_scale_operation("default/a");
        clock.set(1_000_060);
        assert!(!manager.can_scale("default/a", &cfg, ScaleDirection::Up));

        assert_eq!(manager.ledger_len(), 1);
    }

    #[test]
    fn test_malformed_cooldown_uses_fallback() {
        let clock = ManualClock::at(1_000_000);
        let manager = SafetyManager::with_clock(clock.clone());
        let cfg = safety(2, "soon", "soon");

        manager.record_scale_operation("default/a");

        // 299s elapsed: under the 300s fallback
        clock.set(1_000_299);
        assert!(!manager.can_scale("default/a", &cfg, ScaleDirection::Up));

        clock.set(1_000_300);
        assert!(manager.can_scale("default/a", &cfg, ScaleDirection::Up));
    }
}
