use std::collections::VecDeque;

use log::{debug, error, trace};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::core::input::Key;
use crate::game::cursor::{LiveId, LiveNote};
use crate::game::note::{NoteId, NoteStore, NoteType, RowId};
use crate::game::timing_windows::{TimingProfile, classify_offset_s};

// Cleanup scans longer than this mean the queue is corrupt.
const MAX_QUEUE_SCAN: usize = 10_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum JudgeGrade {
    Critical,
    PatchedFast,
    PatchedLate,
    Fast,
    Late,
    TooFast,
    TooLate,
}

impl JudgeGrade {
    pub const ALL: [Self; 7] = [
        Self::Critical,
        Self::PatchedFast,
        Self::PatchedLate,
        Self::Fast,
        Self::Late,
        Self::TooFast,
        Self::TooLate,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn is_miss(self) -> bool {
        matches!(self, Self::TooFast | Self::TooLate)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::PatchedFast => "Fast (patched)",
            Self::PatchedLate => "Late (patched)",
            Self::Fast => "Fast",
            Self::Late => "Late",
            Self::TooFast => "Too Fast",
            Self::TooLate => "Too Late",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Judgment {
    pub live: LiveId,
    pub note: NoteId,
    pub row: RowId,
    pub position: f64,
    pub grade: JudgeGrade,
    /// `trigger_time - time`; positive is early.
    pub delta_s: f64,
    pub time: f64,
    /// Set for the individual layers of a multi note.
    pub layer: Option<usize>,
}

/// Score counters shared by tap and hold judgment.
#[derive(Clone, Debug, Default, Serialize)]
pub struct JudgmentSession {
    pub combo: u32,
    pub max_combo: u32,
    pub errors: u32,
    pub total_judged: u32,
    pub empty_presses: u32,
    pub grade_counts: [u32; 7],
    #[serde(skip)]
    last_error_at: FxHashMap<Key, f64>,
}

impl JudgmentSession {
    /// Combo and error effect of a grade, without counting a judged note.
    pub fn apply_grade(&mut self, grade: JudgeGrade) {
        if grade.is_miss() {
            self.combo = 0;
            self.errors += 1;
        } else {
            self.combo += 1;
            self.max_combo = self.max_combo.max(self.combo);
        }
    }

    /// Counts a note as finished with `grade`.
    #[inline(always)]
    pub fn tally(&mut self, grade: JudgeGrade) {
        self.total_judged += 1;
        self.grade_counts[grade.index()] += 1;
    }

    #[inline(always)]
    pub fn record(&mut self, grade: JudgeGrade) {
        self.apply_grade(grade);
        self.tally(grade);
    }

    #[inline(always)]
    pub fn count(&self, grade: JudgeGrade) -> u32 {
        self.grade_counts[grade.index()]
    }

    #[inline(always)]
    pub fn mark_key_error(&mut self, key: Key, time: f64) {
        self.last_error_at.insert(key, time);
    }

    /// Charges an empty press unless `key` already produced an error within
    /// `cooldown_s`. Returns whether an error was counted.
    pub fn empty_press(&mut self, key: Key, time: f64, cooldown_s: f64) -> bool {
        if let Some(&last) = self.last_error_at.get(&key)
            && time - last <= cooldown_s
        {
            trace!("empty press on {key} at {time:.3}s suppressed");
            return false;
        }
        self.combo = 0;
        self.errors += 1;
        self.empty_presses += 1;
        self.last_error_at.insert(key, time);
        debug!("empty press on {key} at {time:.3}s");
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PressOutcome {
    Judged,
    /// First eligible note is a hold; the press belongs to the hold tracker.
    Hold(LiveId),
    Unmatched,
}

#[inline(always)]
fn judgment_for(id: LiveId, n: &LiveNote, grade: JudgeGrade, time: f64, layer: Option<usize>) -> Judgment {
    Judgment {
        live: id,
        note: n.note,
        row: n.row,
        position: n.position,
        grade,
        delta_s: n.trigger_time - time,
        time,
        layer,
    }
}

#[inline(always)]
fn finish_note(n: &mut LiveNote, grade: JudgeGrade) {
    n.is_judged = true;
    n.result = Some(grade);
}

/// Whether a judgable note of this visit sits within the exit window of
/// `time`, judged or not.
pub fn note_near(visit_notes: &[LiveNote], notes: &NoteStore, time: f64, profile: &TimingProfile) -> bool {
    visit_notes.iter().any(|n| {
        (n.trigger_time - time).abs() <= profile.exit_s
            && notes.get(n.note).is_some_and(|note| note.note_type.is_judgable())
    })
}

#[derive(Clone, Debug)]
pub struct JudgmentEngine {
    profile: TimingProfile,
    queue: VecDeque<LiveId>,
    // Next live note not yet considered for the queue.
    next_live: usize,
    // Worst layer so far for multi notes still being judged.
    multi_worst: FxHashMap<LiveId, (f64, JudgeGrade)>,
}

impl JudgmentEngine {
    pub fn new(profile: TimingProfile) -> Self {
        Self {
            profile,
            queue: VecDeque::new(),
            next_live: 0,
            multi_worst: FxHashMap::default(),
        }
    }

    #[inline(always)]
    pub const fn profile(&self) -> &TimingProfile {
        &self.profile
    }

    /// Active queue in insertion order.
    #[inline(always)]
    pub fn queue(&self) -> &VecDeque<LiveId> {
        &self.queue
    }

    pub fn remove(&mut self, id: LiveId) {
        self.queue.retain(|q| *q != id);
    }

    /// Queues notes that came within the entry window and force-judges the
    /// ones whose exit window closed. Newly queued ids go to `entered`.
    pub fn maintain(
        &mut self,
        now: f64,
        live: &mut [LiveNote],
        notes: &NoteStore,
        session: &mut JudgmentSession,
        out: &mut Vec<Judgment>,
        entered: &mut Vec<LiveId>,
    ) {
        while let Some(n) = live.get(self.next_live) {
            if n.trigger_time - now > self.profile.enter_s {
                break;
            }
            let judgable = notes.get(n.note).is_some_and(|note| note.note_type.is_judgable());
            if judgable && !n.is_judged {
                let Ok(raw) = u32::try_from(self.next_live) else {
                    error!("live note {} is past the id range, not queued", self.next_live);
                    break;
                };
                let id = LiveId(raw);
                trace!("queued row {} pos {} (trigger {:.3}s)", n.row, n.position, n.trigger_time);
                self.queue.push_back(id);
                entered.push(id);
            }
            self.next_live += 1;
        }

        let mut scans = 0;
        while let Some(&front) = self.queue.front() {
            scans += 1;
            if scans > MAX_QUEUE_SCAN {
                error!("judgment queue cleanup exceeded {MAX_QUEUE_SCAN} steps, {} left", self.queue.len());
                break;
            }
            let Some(n) = live.get_mut(front.index()) else {
                self.queue.pop_front();
                continue;
            };
            if n.is_judged {
                self.queue.pop_front();
                continue;
            }
            if now - n.trigger_time <= self.profile.exit_s {
                break;
            }
            self.queue.pop_front();
            let grade = classify_offset_s(n.trigger_time - now, &self.profile);
            self.multi_worst.remove(&front);
            finish_note(n, grade);
            session.record(grade);
            debug!(
                "MISSED (time-based): row {} pos {} trigger {:.3}s at {now:.3}s",
                n.row, n.position, n.trigger_time
            );
            out.push(judgment_for(front, n, grade, now, None));
        }
    }

    /// Judges the first queued note whose exit window contains `time`.
    /// At most one note (or one multi layer) is judged per press.
    pub fn press(
        &mut self,
        time: f64,
        live: &mut [LiveNote],
        notes: &NoteStore,
        session: &mut JudgmentSession,
        out: &mut Vec<Judgment>,
    ) -> PressOutcome {
        let found = self
            .queue
            .iter()
            .take(MAX_QUEUE_SCAN)
            .enumerate()
            .find(|(_, id)| {
                live.get(id.index())
                    .is_some_and(|n| !n.is_judged && (n.trigger_time - time).abs() <= self.profile.exit_s)
            })
            .map(|(pos, id)| (pos, *id));
        let Some((pos, id)) = found else {
            return PressOutcome::Unmatched;
        };
        let Some(note) = live.get(id.index()).and_then(|n| notes.get(n.note)) else {
            return PressOutcome::Unmatched;
        };
        let Some(n) = live.get_mut(id.index()) else {
            return PressOutcome::Unmatched;
        };
        let grade = classify_offset_s(n.trigger_time - time, &self.profile);

        match &note.note_type {
            NoteType::Hold => return PressOutcome::Hold(id),
            NoteType::Multi if !note.layers.is_empty() => {
                let layer = n.layers_done;
                n.layers_done += 1;
                session.apply_grade(grade);
                debug!("layer {layer} of multi at row {} judged {grade:?}", n.row);
                out.push(judgment_for(id, n, grade, time, Some(layer)));

                let delta = (n.trigger_time - time).abs();
                let worst = self.multi_worst.entry(id).or_insert((delta, grade));
                if delta > worst.0 {
                    *worst = (delta, grade);
                }
                if n.layers_done >= note.layers.len() {
                    let final_grade = worst.1;
                    self.multi_worst.remove(&id);
                    self.queue.remove(pos);
                    finish_note(n, final_grade);
                    session.tally(final_grade);
                    out.push(judgment_for(id, n, final_grade, time, None));
                }
            }
            _ => {
                self.queue.remove(pos);
                finish_note(n, grade);
                session.record(grade);
                debug!(
                    "judged {:?} row {} pos {} delta {:+.3}s",
                    grade,
                    n.row,
                    n.position,
                    n.trigger_time - time
                );
                out.push(judgment_for(id, n, grade, time, None));
            }
        }
        PressOutcome::Judged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::note::Note;

    fn setup(types: &[(NoteType, f64)]) -> (NoteStore, Vec<LiveNote>) {
        let mut store = NoteStore::default();
        let mut live = Vec::new();
        for (i, (t, trigger)) in types.iter().enumerate() {
            let id = store.push(Note::new(-1, i as f64, t.clone(), 1.0)).expect("note id");
            live.push(LiveNote {
                note: id,
                visit: 0,
                row: -1,
                position: i as f64,
                trigger_time: *trigger,
                is_judged: false,
                result: None,
                layers_done: 0,
            });
        }
        (store, live)
    }

    #[test]
    fn late_expiry_is_a_miss_with_combo_reset() {
        let (store, mut live) = setup(&[(NoteType::Tap, 1.0), (NoteType::Tap, 1.5)]);
        let mut engine = JudgmentEngine::new(TimingProfile::default());
        let mut session = JudgmentSession::default();
        let (mut out, mut entered) = (Vec::new(), Vec::new());

        engine.maintain(1.0, &mut live, &store, &mut session, &mut out, &mut entered);
        assert_eq!(entered, vec![LiveId(0)], "second note still outside the entry window");
        assert_eq!(engine.press(1.0, &mut live, &store, &mut session, &mut out), PressOutcome::Judged);
        assert_eq!(session.combo, 1);

        engine.maintain(1.5 + 0.125, &mut live, &store, &mut session, &mut out, &mut entered);
        assert_eq!(out.last().map(|j| j.grade), Some(JudgeGrade::TooLate));
        assert_eq!(session.combo, 0);
        assert_eq!(session.errors, 1);
        assert_eq!(session.total_judged, 2);
        assert!(engine.queue().is_empty());
        assert!(live.iter().all(|n| n.is_judged));
    }

    #[test]
    fn press_takes_queue_order_not_proximity() {
        let (store, mut live) = setup(&[(NoteType::Tap, 1.0), (NoteType::Break, 1.0625)]);
        let mut engine = JudgmentEngine::new(TimingProfile::default());
        let mut session = JudgmentSession::default();
        let (mut out, mut entered) = (Vec::new(), Vec::new());
        engine.maintain(1.0625, &mut live, &store, &mut session, &mut out, &mut entered);
        engine.press(1.0625, &mut live, &store, &mut session, &mut out);
        assert_eq!(out.len(), 1, "one note per press");
        assert_eq!(out[0].live, LiveId(0));
        assert_eq!(out[0].grade, JudgeGrade::Late);
        assert_eq!(engine.queue().len(), 1);
    }

    #[test]
    fn holds_and_track_notes_are_routed_elsewhere() {
        let (store, mut live) = setup(&[(NoteType::Track, 1.0), (NoteType::Hold, 1.0)]);
        let mut engine = JudgmentEngine::new(TimingProfile::default());
        let mut session = JudgmentSession::default();
        let (mut out, mut entered) = (Vec::new(), Vec::new());
        engine.maintain(1.0, &mut live, &store, &mut session, &mut out, &mut entered);
        assert_eq!(entered, vec![LiveId(1)], "track notes never enter the queue");
        assert_eq!(
            engine.press(1.0, &mut live, &store, &mut session, &mut out),
            PressOutcome::Hold(LiveId(1))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn multi_layers_need_one_press_each() {
        let mut store = NoteStore::default();
        let mut note = Note::new(-1, 0.0, NoteType::Multi, 1.0);
        note.layers = vec![
            crate::game::note::Layer { note_type: NoteType::Tap, length: 1.0 },
            crate::game::note::Layer { note_type: NoteType::Tap, length: 1.0 },
        ];
        let id = store.push(note).expect("note id");
        let mut live = vec![LiveNote {
            note: id,
            visit: 0,
            row: -1,
            position: 0.0,
            trigger_time: 1.0,
            is_judged: false,
            result: None,
            layers_done: 0,
        }];
        let mut engine = JudgmentEngine::new(TimingProfile::default());
        let mut session = JudgmentSession::default();
        let (mut out, mut entered) = (Vec::new(), Vec::new());
        engine.maintain(1.0, &mut live, &store, &mut session, &mut out, &mut entered);
        engine.press(1.0, &mut live, &store, &mut session, &mut out);
        assert!(!live[0].is_judged, "one layer left");
        engine.press(0.9375, &mut live, &store, &mut session, &mut out);
        assert!(live[0].is_judged);
        assert_eq!(live[0].result, Some(JudgeGrade::Fast), "parent takes the worst layer");
        assert_eq!(out.iter().filter(|j| j.layer.is_some()).count(), 2);
        assert_eq!(session.total_judged, 1);
        assert_eq!(session.combo, 2);
    }

    #[test]
    fn empty_presses_within_cooldown_count_once() {
        let mut session = JudgmentSession::default();
        let k = Key('f');
        assert!(session.empty_press(k, 2.0, 0.2));
        assert!(!session.empty_press(k, 2.125, 0.2));
        assert_eq!(session.errors, 1);
        assert!(session.empty_press(k, 2.5, 0.2));
        assert!(session.empty_press(Key('j'), 2.5, 0.2), "cooldown is per key");
        assert_eq!(session.errors, 3);
    }
}
