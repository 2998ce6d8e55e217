// Shared timing window definitions for the judgment engine and hold tracking.

use crate::game::judgment::JudgeGrade;

// All windows are in seconds.
pub const ENTER_WINDOW_S: f64 = 0.16;
pub const EXIT_WINDOW_S: f64 = 0.10;
pub const PATCHED_WINDOW_S: f64 = 0.06;
pub const FIXED_WINDOW_S: f64 = 0.03;

pub const HOLD_GRACE_S: f64 = 0.10;
pub const HOLD_EARLY_RELEASE_S: f64 = 0.10;
// Minimum spacing between two empty-press errors on the same key.
pub const ERROR_COOLDOWN_S: f64 = 0.20;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingProfile {
    pub enter_s: f64,
    pub exit_s: f64,
    pub patched_s: f64,
    pub fixed_s: f64,
    pub hold_grace_s: f64,
    pub hold_early_release_s: f64,
    pub error_cooldown_s: f64,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            enter_s: ENTER_WINDOW_S,
            exit_s: EXIT_WINDOW_S,
            patched_s: PATCHED_WINDOW_S,
            fixed_s: FIXED_WINDOW_S,
            hold_grace_s: HOLD_GRACE_S,
            hold_early_release_s: HOLD_EARLY_RELEASE_S,
            error_cooldown_s: ERROR_COOLDOWN_S,
        }
    }
}

impl TimingProfile {
    /// Forces `fixed <= patched <= exit <= enter` and non-negative values.
    pub fn clamped(self) -> Self {
        let fixed_s = self.fixed_s.max(0.0);
        let patched_s = self.patched_s.max(fixed_s);
        let exit_s = self.exit_s.max(patched_s);
        let enter_s = self.enter_s.max(exit_s);
        Self {
            enter_s,
            exit_s,
            patched_s,
            fixed_s,
            hold_grace_s: self.hold_grace_s.max(0.0),
            hold_early_release_s: self.hold_early_release_s.max(0.0),
            error_cooldown_s: self.error_cooldown_s.max(0.0),
        }
    }

    #[inline(always)]
    pub fn windows_ms(&self) -> [f64; 4] {
        [
            self.fixed_s * 1000.0,
            self.patched_s * 1000.0,
            self.exit_s * 1000.0,
            self.enter_s * 1000.0,
        ]
    }
}

/// Classify a signed offset `delta_s = trigger_time - now` into a grade.
/// Positive means the input came before the note.
///
/// Anything outside the exit window is a miss; on the early side that is
/// `TooFast`, which input handling never produces since presses are only
/// matched to notes already inside the exit window.
#[inline(always)]
pub fn classify_offset_s(delta_s: f64, profile: &TimingProfile) -> JudgeGrade {
    let abs = delta_s.abs();
    let early = delta_s > 0.0;
    if abs <= profile.fixed_s {
        JudgeGrade::Critical
    } else if abs <= profile.patched_s {
        if early { JudgeGrade::PatchedFast } else { JudgeGrade::PatchedLate }
    } else if abs <= profile.exit_s {
        if early { JudgeGrade::Fast } else { JudgeGrade::Late }
    } else if early {
        JudgeGrade::TooFast
    } else {
        JudgeGrade::TooLate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_boundaries() {
        let p = TimingProfile::default();
        assert_eq!(classify_offset_s(0.03, &p), JudgeGrade::Critical);
        assert_eq!(classify_offset_s(-0.03, &p), JudgeGrade::Critical);
        assert_eq!(classify_offset_s(0.031, &p), JudgeGrade::PatchedFast);
        assert_eq!(classify_offset_s(-0.031, &p), JudgeGrade::PatchedLate);
        assert_eq!(classify_offset_s(0.061, &p), JudgeGrade::Fast);
        assert_eq!(classify_offset_s(-0.061, &p), JudgeGrade::Late);
        assert_eq!(classify_offset_s(-0.11, &p), JudgeGrade::TooLate);
        assert_eq!(classify_offset_s(0.11, &p), JudgeGrade::TooFast);
    }

    #[test]
    fn clamping_restores_window_order() {
        let p = TimingProfile {
            enter_s: 0.05,
            exit_s: 0.2,
            patched_s: 0.01,
            fixed_s: 0.03,
            ..TimingProfile::default()
        }
        .clamped();
        assert!(p.fixed_s <= p.patched_s && p.patched_s <= p.exit_s && p.exit_s <= p.enter_s, "{p:?}");
        assert_eq!(p.enter_s, 0.2);
    }
}
