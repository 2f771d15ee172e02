use std::time::Duration;

use weft_core::config::EngineConfig;
use weft_core::types::StepSpec;

/// Fixed-delay retry policy for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            jitter: false,
        }
    }

    /// Effective policy for `spec`: its own retry count if set, else the
    /// engine default.
    pub fn for_step(spec: &StepSpec, config: &EngineConfig) -> Self {
        Self {
            max_retries: spec.retry_count.unwrap_or(config.default_retry_count),
            delay: config.retry_delay(),
            jitter: config.retry_jitter,
        }
    }

    /// Total invocations allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the next attempt. Constant unless jitter is on, which
    /// scales it by 0.8x to 1.2x.
    pub fn next_delay(&self) -> Duration {
        if !self.jitter {
            return self.delay;
        }
        let factor = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((self.delay.as_millis() as f64 * factor) as u64)
    }
}

/// Effective per-attempt timeout: the step's override if positive, else the
/// engine default.
pub fn step_timeout(spec: &StepSpec, config: &EngineConfig) -> Duration {
    match spec.timeout_seconds {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        _ => config.step_timeout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_override_beats_default() {
        let config = EngineConfig::default();
        let spec = StepSpec::new("a", "echo").with_retries(5);
        assert_eq!(RetryPolicy::for_step(&spec, &config).max_retries, 5);

        let spec = StepSpec::new("a", "echo");
        assert_eq!(
            RetryPolicy::for_step(&spec, &config).max_retries,
            config.default_retry_count
        );
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_should_retry_up_to_limit() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_delay_constant_without_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let mut policy = RetryPolicy::new(3, Duration::from_millis(1000));
        policy.jitter = true;
        for _ in 0..50 {
            let d = policy.next_delay().as_millis();
            assert!((800..=1200).contains(&d), "delay {} out of band", d);
        }
    }

    #[test]
    fn test_timeout_zero_uses_default() {
        let config = EngineConfig::default();
        let spec = StepSpec::new("a", "echo").with_timeout_secs(0);
        assert_eq!(step_timeout(&spec, &config), config.step_timeout());
        let spec = StepSpec::new("a", "echo").with_timeout_secs(3);
        assert_eq!(step_timeout(&spec, &config), Duration::from_secs(3));
    }
}
