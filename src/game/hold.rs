use log::{debug, trace};
use serde::Serialize;

use crate::core::input::Key;
use crate::game::cursor::{LiveId, LiveNote};
use crate::game::judgment::{JudgeGrade, Judgment, JudgmentSession};
use crate::game::note::NoteStore;
use crate::game::timing_windows::{TimingProfile, classify_offset_s};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum HoldPhase {
    Idle,
    Holding,
    /// Released early; the same key may come back within the grace period.
    Protected,
    Judged,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HoldState {
    pub live: LiveId,
    pub phase: HoldPhase,
    pub held_key: Option<Key>,
    pub release_time: Option<f64>,
    pub has_started: bool,
    pub entry_grade: Option<JudgeGrade>,
    pub trigger_time: f64,
    pub end_time: f64,
    pub result: Option<JudgeGrade>,
}

impl HoldState {
    #[inline(always)]
    pub fn is_holding(&self) -> bool {
        self.phase == HoldPhase::Holding
    }

    #[inline(always)]
    pub fn in_protection(&self) -> bool {
        self.phase == HoldPhase::Protected
    }
}

/// Tracks every hold between queue entry and its final judgment.
#[derive(Clone, Debug)]
pub struct HoldTracker {
    profile: TimingProfile,
    holds: Vec<HoldState>,
}

fn hold_judgment(h: &HoldState, n: &LiveNote, grade: JudgeGrade, time: f64) -> Judgment {
    Judgment {
        live: h.live,
        note: n.note,
        row: n.row,
        position: n.position,
        grade,
        delta_s: h.trigger_time - time,
        time,
        layer: None,
    }
}

fn finish_hold(
    h: &mut HoldState,
    grade: JudgeGrade,
    time: f64,
    live: &mut [LiveNote],
    session: &mut JudgmentSession,
    out: &mut Vec<Judgment>,
) {
    h.phase = HoldPhase::Judged;
    h.result = Some(grade);
    session.record(grade);
    if grade.is_miss()
        && let Some(key) = h.held_key
    {
        session.mark_key_error(key, time);
    }
    if let Some(n) = live.get_mut(h.live.index()) {
        n.is_judged = true;
        n.result = Some(grade);
        debug!("hold at row {} pos {} finished {grade:?} at {time:.3}s", n.row, n.position);
        out.push(hold_judgment(h, n, grade, time));
    }
}

impl HoldTracker {
    pub fn new(profile: TimingProfile) -> Self {
        Self {
            profile,
            holds: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn holds(&self) -> &[HoldState] {
        &self.holds
    }

    pub fn get(&self, id: LiveId) -> Option<&HoldState> {
        self.holds.iter().find(|h| h.live == id)
    }

    /// Holds currently driven by a key (holding or protected).
    pub fn engaged_count(&self) -> usize {
        self.holds
            .iter()
            .filter(|h| matches!(h.phase, HoldPhase::Holding | HoldPhase::Protected))
            .count()
    }

    /// Registers a hold that just entered the judgment queue.
    pub fn track(&mut self, id: LiveId, live: &[LiveNote], notes: &NoteStore, speed: f64) {
        if self.get(id).is_some() {
            return;
        }
        let Some(n) = live.get(id.index()) else {
            return;
        };
        let length = notes.get(n.note).map_or(0.0, |note| note.length);
        self.holds.push(HoldState {
            live: id,
            phase: HoldPhase::Idle,
            held_key: None,
            release_time: None,
            has_started: false,
            entry_grade: None,
            trigger_time: n.trigger_time,
            end_time: n.trigger_time + length / speed,
            result: None,
        });
    }

    /// Time-driven transitions: natural ends, expired protection, and idle
    /// holds the judgment queue already missed.
    pub fn update(&mut self, now: f64, live: &mut [LiveNote], session: &mut JudgmentSession, out: &mut Vec<Judgment>) {
        let grace = self.profile.hold_grace_s;
        for h in &mut self.holds {
            match h.phase {
                HoldPhase::Idle => {
                    if live.get(h.live.index()).is_some_and(|n| n.is_judged) {
                        trace!("hold {:?} missed before it started", h.live);
                        h.phase = HoldPhase::Judged;
                        h.result = live.get(h.live.index()).and_then(|n| n.result);
                    }
                }
                HoldPhase::Holding => {
                    if now >= h.end_time {
                        let end = h.end_time;
                        finish_hold(h, JudgeGrade::Critical, end, live, session, out);
                    }
                }
                HoldPhase::Protected => {
                    let released = h.release_time.unwrap_or(now);
                    let expires = released + grace;
                    if h.end_time <= expires && now >= h.end_time {
                        let end = h.end_time;
                        finish_hold(h, JudgeGrade::Critical, end, live, session, out);
                    } else if now - released > grace {
                        finish_hold(h, JudgeGrade::TooLate, expires, live, session, out);
                    }
                }
                HoldPhase::Judged => {}
            }
        }
        self.holds.retain(|h| h.phase != HoldPhase::Judged);
    }

    /// Same key pressed again inside the grace period.
    pub fn try_resume(&mut self, key: Key, time: f64) -> bool {
        let grace = self.profile.hold_grace_s;
        let Some(h) = self.holds.iter_mut().find(|h| {
            h.in_protection()
                && h.held_key == Some(key)
                && h.release_time.is_some_and(|r| time - r <= grace)
        }) else {
            return false;
        };
        h.phase = HoldPhase::Holding;
        h.release_time = None;
        trace!("hold {:?} resumed by {key} at {time:.3}s", h.live);
        true
    }

    /// Starts an idle hold with `key`. Returns false if the hold cannot start.
    pub fn start(
        &mut self,
        id: LiveId,
        key: Key,
        time: f64,
        live: &mut [LiveNote],
        notes: &NoteStore,
        session: &mut JudgmentSession,
        speed: f64,
    ) -> bool {
        if self
            .holds
            .iter()
            .any(|h| h.held_key == Some(key) && matches!(h.phase, HoldPhase::Holding | HoldPhase::Protected))
        {
            return false;
        }
        self.track(id, live, notes, speed);
        let exit = self.profile.exit_s;
        let profile = self.profile;
        let Some(h) = self.holds.iter_mut().find(|h| h.live == id) else {
            return false;
        };
        if h.phase != HoldPhase::Idle || (h.trigger_time - time).abs() > exit {
            return false;
        }
        let grade = classify_offset_s(h.trigger_time - time, &profile);
        h.phase = HoldPhase::Holding;
        h.held_key = Some(key);
        h.has_started = true;
        h.entry_grade = Some(grade);
        session.apply_grade(grade);
        if let Some(n) = live.get(id.index()) {
            debug!("hold at row {} pos {} started {grade:?} with {key}", n.row, n.position);
        }
        true
    }

    /// A judgment key other than the protected hold's own key was pressed.
    pub fn cross_talk(
        &mut self,
        key: Key,
        time: f64,
        live: &mut [LiveNote],
        session: &mut JudgmentSession,
        out: &mut Vec<Judgment>,
    ) {
        for h in &mut self.holds {
            if h.in_protection() && h.held_key != Some(key) {
                debug!("{key} pressed while hold {:?} was protected", h.live);
                finish_hold(h, JudgeGrade::TooLate, time, live, session, out);
            }
        }
        self.holds.retain(|h| h.phase != HoldPhase::Judged);
    }

    pub fn release(
        &mut self,
        key: Key,
        time: f64,
        live: &mut [LiveNote],
        session: &mut JudgmentSession,
        out: &mut Vec<Judgment>,
    ) {
        let tolerance = self.profile.hold_early_release_s;
        for h in &mut self.holds {
            if !h.is_holding() || h.held_key != Some(key) {
                continue;
            }
            if time >= h.end_time - tolerance {
                finish_hold(h, JudgeGrade::Critical, time, live, session, out);
            } else {
                h.phase = HoldPhase::Protected;
                h.release_time = Some(time);
                trace!("hold {:?} released at {time:.3}s, protected", h.live);
            }
        }
        self.holds.retain(|h| h.phase != HoldPhase::Judged);
    }
}
