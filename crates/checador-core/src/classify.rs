//! Entry/exit classification for recognized scans.
//!
//! The kiosk needs *a* deterministic rule to label each recognized scan as
//! an entry or an exit. The only rule available client-side is a time-of-day
//! cutoff, which cannot be right near shift boundaries or for night shifts;
//! the authoritative answer belongs to server-side attendance logic that
//! knows the subject's last action of the day. [`ActionClassifier`] keeps the
//! rule pluggable so that logic can replace [`TimeOfDayClassifier`].

use chrono::{DateTime, Local, NaiveTime, Timelike};

use crate::{AttendanceAction, ScanEvent, constants::DEFAULT_EXIT_CUTOFF_HOUR};

/// Labels a recognized scan as an entry or an exit.
pub trait ActionClassifier: Send + Sync {
    /// Classify `event`, observed at local time `at`.
    fn classify(&self, event: &ScanEvent, at: DateTime<Local>) -> AttendanceAction;
}

impl<F> ActionClassifier for F
where
    F: Fn(&ScanEvent, DateTime<Local>) -> AttendanceAction + Send + Sync,
{
    fn classify(&self, event: &ScanEvent, at: DateTime<Local>) -> AttendanceAction {
        self(event, at)
    }
}

/// Stand-in classifier: entries before a cutoff time, exits from it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDayClassifier {
    cutoff: NaiveTime,
}

impl TimeOfDayClassifier {
    pub fn new(cutoff: NaiveTime) -> Self {
        Self { cutoff }
    }

    /// Classifier with the cutoff at the given whole hour.
    ///
    /// Hours above 23 are clamped to 23.
    pub fn at_hour(hour: u32) -> Self {
        let hour = hour.min(23);
        Self {
            cutoff: NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }
}

impl Default for TimeOfDayClassifier {
    fn default() -> Self {
        Self::at_hour(DEFAULT_EXIT_CUTOFF_HOUR)
    }
}

impl ActionClassifier for TimeOfDayClassifier {
    fn classify(&self, _event: &ScanEvent, at: DateTime<Local>) -> AttendanceAction {
        let time = NaiveTime::from_hms_opt(at.hour(), at.minute(), at.second())
            .unwrap_or(NaiveTime::MIN);

        if time < self.cutoff {
            AttendanceAction::Entry
        } else {
            AttendanceAction::Exit
        }
    }
}
