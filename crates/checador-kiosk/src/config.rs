//! Timing settings for the scan state machine.

use std::time::Duration;

use checador_core::constants::{
    DEFAULT_FAILED_SETTLE_MS, DEFAULT_QUICK_SETTLE_MS, DEFAULT_SUCCESS_SETTLE_MS,
};

/// How long `Success` and `Failed` are shown before returning to `Ready`.
///
/// # Example
///
/// ```
/// use checador_kiosk::SettleConfig;
/// use std::time::Duration;
///
/// let settle = SettleConfig::default().quick(Duration::from_secs(1));
/// assert_eq!(settle.success, Duration::from_secs(5));
/// assert_eq!(settle.quick, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    /// After a recognized scan in normal mode
    pub success: Duration,

    /// After any scan in quick mode
    pub quick: Duration,

    /// After an unrecognized scan in normal mode
    pub failed: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            success: Duration::from_millis(DEFAULT_SUCCESS_SETTLE_MS),
            quick: Duration::from_millis(DEFAULT_QUICK_SETTLE_MS),
            failed: Duration::from_millis(DEFAULT_FAILED_SETTLE_MS),
        }
    }
}

impl SettleConfig {
    pub fn success(mut self, delay: Duration) -> Self {
        self.success = delay;
        self
    }

    pub fn quick(mut self, delay: Duration) -> Self {
        self.quick = delay;
        self
    }

    pub fn failed(mut self, delay: Duration) -> Self {
        self.failed = delay;
        self
    }

    /// Settle delay for a scan outcome.
    ///
    /// Quick mode uses the short delay for both outcomes, but never more than
    /// the normal delay for that outcome.
    pub fn delay_for(&self, identified: bool, quick_mode: bool) -> Duration {
        let normal = if identified { self.success } else { self.failed };
        if quick_mode { self.quick.min(normal) } else { normal }
    }

    /// Longest delay any outcome can take.
    pub fn max_delay(&self) -> Duration {
        self.success.max(self.quick).max(self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, false, 5000)]
    #[case(false, false, 2000)]
    #[case(true, true, 1500)]
    #[case(false, true, 1500)]
    fn test_default_delays(#[case] identified: bool, #[case] quick: bool, #[case] expected_ms: u64) {
        assert_eq!(
            SettleConfig::default().delay_for(identified, quick),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_quick_never_exceeds_normal_delay() {
        let settle = SettleConfig::default()
            .quick(Duration::from_secs(3))
            .failed(Duration::from_secs(1));

        assert_eq!(settle.delay_for(false, true), Duration::from_secs(1));
        assert_eq!(settle.delay_for(true, true), Duration::from_secs(3));
        assert_eq!(settle.max_delay(), Duration::from_secs(5));
    }
}
