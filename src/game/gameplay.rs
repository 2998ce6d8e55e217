use std::collections::VecDeque;

use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::core::input::{InputEdge, Key, KeyStates, Keymap};
use crate::game::chart::ChartData;
use crate::game::cursor::{Cursor, CursorEvent, CursorEvents, LiveId};
use crate::game::flow::NavReason;
use crate::game::hold::HoldTracker;
use crate::game::judgment::{JudgeGrade, Judgment, JudgmentEngine, JudgmentSession, PressOutcome, note_near};
use crate::game::note::{NoteType, RowId};
use crate::game::timing::{DEFAULT_SPEED, compute_trigger_times, sanitize_speed};
use crate::game::timing_windows::TimingProfile;

// Visits are planned this far past the entry window.
const PLAN_MARGIN_S: f64 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSettings {
    pub speed: f64,
    pub start_offset_s: f64,
    pub profile: TimingProfile,
    pub keymap: Keymap,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            start_offset_s: 0.0,
            profile: TimingProfile::default(),
            keymap: Keymap::default(),
        }
    }
}

impl PlaybackSettings {
    /// `speed:` and `offset:` in the chart's meta section win over the
    /// configured values.
    pub fn with_chart_overrides(mut self, chart: &ChartData) -> Self {
        if let Some(v) = chart.meta_value("speed") {
            match v.trim().parse::<f64>() {
                Ok(s) if s.is_finite() && s > 0.0 => self.speed = s,
                _ => warn!("chart meta speed '{v}' is not a positive number, ignored"),
            }
        }
        if let Some(v) = chart.meta_value("offset") {
            match v.trim().parse::<f64>() {
                Ok(o) if o.is_finite() => self.start_offset_s = o,
                _ => warn!("chart meta offset '{v}' is not a number, ignored"),
            }
        }
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum UpdateStatus {
    Playing,
    Finished,
}

pub struct State {
    pub chart: ChartData,
    pub session: JudgmentSession,
    cursor: Cursor,
    engine: JudgmentEngine,
    holds: HoldTracker,
    keymap: Keymap,
    key_states: KeyStates,
    pending_edges: VecDeque<InputEdge>,
    judgments: Vec<Judgment>,
    events: Vec<CursorEvent>,
    entered: Vec<LiveId>,
    row_visits: usize,
    commands_fired: usize,
    log_timer: f64,
}

impl State {
    #[inline(always)]
    pub const fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    #[inline(always)]
    pub const fn engine(&self) -> &JudgmentEngine {
        &self.engine
    }

    #[inline(always)]
    pub const fn holds(&self) -> &HoldTracker {
        &self.holds
    }

    /// Judgments produced since the last call.
    pub fn take_judgments(&mut self) -> Vec<Judgment> {
        std::mem::take(&mut self.judgments)
    }

    /// Cursor events produced since the last call.
    pub fn take_events(&mut self) -> Vec<CursorEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_finished(&self) -> bool {
        !self.cursor.is_active() && self.engine.queue().is_empty() && self.holds.engaged_count() == 0
    }
}

pub fn init(mut chart: ChartData, settings: &PlaybackSettings) -> State {
    let settings = settings.clone().with_chart_overrides(&chart);
    let speed = sanitize_speed(settings.speed);
    let profile = settings.profile.clamped();
    info!(
        "Initializing playback: {} rows, {} judgable notes, speed {speed}, offset {:.3}s",
        chart.rows.len(),
        chart.judgable_note_count(),
        settings.start_offset_s
    );
    if !chart.diagnostics.is_empty() {
        warn!("chart parsed with {} diagnostics", chart.diagnostics.len());
    }
    let first_pass_end = compute_trigger_times(&mut chart, speed, settings.start_offset_s);
    debug!("first pass without control flow ends at {first_pass_end:.3}s");
    let cursor = Cursor::new(&chart, speed, settings.start_offset_s);
    State {
        cursor,
        engine: JudgmentEngine::new(profile),
        holds: HoldTracker::new(profile),
        session: JudgmentSession::default(),
        keymap: settings.keymap,
        key_states: KeyStates::default(),
        pending_edges: VecDeque::new(),
        judgments: Vec::new(),
        events: Vec::new(),
        entered: Vec::new(),
        row_visits: 0,
        commands_fired: 0,
        log_timer: 0.0,
        chart,
    }
}

/// Edges are kept sorted by time; equal times keep arrival order.
pub fn queue_input_edge(state: &mut State, edge: InputEdge) {
    if !edge.time.is_finite() {
        warn!("input edge for {} with non-finite time dropped", edge.key);
        return;
    }
    let at = state.pending_edges.partition_point(|e| e.time <= edge.time);
    state.pending_edges.insert(at, edge);
}

fn maintain_queue(state: &mut State, now: f64) {
    state.entered.clear();
    let speed = state.cursor.speed();
    let live = state.cursor.live_notes_mut();
    state.engine.maintain(
        now,
        live,
        &state.chart.notes,
        &mut state.session,
        &mut state.judgments,
        &mut state.entered,
    );
    for id in &state.entered {
        let is_hold = live
            .get(id.index())
            .and_then(|n| state.chart.notes.get(n.note))
            .is_some_and(|note| note.note_type == NoteType::Hold);
        if is_hold {
            state.holds.track(*id, live, &state.chart.notes, speed);
        }
    }
}

fn update_holds(state: &mut State, now: f64) {
    let live = state.cursor.live_notes_mut();
    state.holds.update(now, live, &mut state.session, &mut state.judgments);
}

fn handle_press(state: &mut State, key: Key, time: f64) {
    maintain_queue(state, time);
    update_holds(state, time);

    let resumed = state.holds.try_resume(key, time);
    {
        let live = state.cursor.live_notes_mut();
        state.holds.cross_talk(key, time, live, &mut state.session, &mut state.judgments);
    }
    if resumed {
        return;
    }

    let speed = state.cursor.speed();
    let live = state.cursor.live_notes_mut();
    let outcome = state.engine.press(time, live, &state.chart.notes, &mut state.session, &mut state.judgments);
    let consumed = match outcome {
        PressOutcome::Judged => true,
        PressOutcome::Hold(id) => {
            let started = state.holds.start(id, key, time, live, &state.chart.notes, &mut state.session, speed);
            if started {
                state.engine.remove(id);
            }
            started
        }
        PressOutcome::Unmatched => false,
    };
    if consumed {
        return;
    }

    let profile = *state.engine.profile();
    let near = state
        .cursor
        .current_visit()
        .is_some_and(|v| note_near(state.cursor.live_in_visit(v.seq), &state.chart.notes, time, &profile));
    if !near {
        state.session.empty_press(key, time, profile.error_cooldown_s);
    }
}

fn handle_release(state: &mut State, key: Key, time: f64) {
    update_holds(state, time);
    let live = state.cursor.live_notes_mut();
    state.holds.release(key, time, live, &mut state.session, &mut state.judgments);
}

fn process_input_edges(state: &mut State, now: f64) {
    while let Some(edge) = state.pending_edges.front().copied() {
        if edge.time > now {
            break;
        }
        state.pending_edges.pop_front();
        if !state.key_states.apply(&edge) {
            trace!("repeated edge for {} at {:.3}s ignored", edge.key, edge.time);
            continue;
        }
        if !state.keymap.is_judge_key(edge.key) {
            continue;
        }
        if edge.pressed {
            handle_press(state, edge.key, edge.time);
        } else {
            handle_release(state, edge.key, edge.time);
        }
    }
}

fn handle_cursor_events(state: &mut State, events: CursorEvents) {
    for event in events {
        match &event {
            CursorEvent::RowEntered { .. } => state.row_visits += 1,
            CursorEvent::Command { row, command, time, .. } => {
                state.commands_fired += 1;
                debug!("command {}{:?} at row {row} ({time:.3}s)", command.name, command.params);
            }
            CursorEvent::Navigated(nav) if nav.reason != NavReason::Next => {
                debug!("row {} -> {:?} ({:?})", nav.from, nav.target, nav.reason);
            }
            _ => {}
        }
        state.events.push(event);
    }
}

/// Advances playback by `delta_time` seconds.
pub fn update(state: &mut State, delta_time: f64) -> UpdateStatus {
    let now = state.cursor.cursor_time();
    let horizon = now + state.engine.profile().enter_s + PLAN_MARGIN_S;
    state.cursor.plan_until(horizon, &state.chart);

    process_input_edges(state, now);
    maintain_queue(state, now);
    update_holds(state, now);

    let mut events = CursorEvents::new();
    state.cursor.fire_row_triggers(&state.chart, &mut events);
    state.cursor.advance_time(delta_time);
    state.cursor.resolve_row_ends(&state.chart, &mut events);
    handle_cursor_events(state, events);

    state.log_timer += delta_time;
    if state.log_timer >= 1.0 {
        info!(
            "Time: {:.2}, Row: {:?}, Pos: {:.2}, Combo: {}, Errors: {}, Queue: {}",
            state.cursor.cursor_time(),
            state.cursor.row_id(),
            state.cursor.position(),
            state.session.combo,
            state.session.errors,
            state.engine.queue().len()
        );
        state.log_timer -= 1.0;
    }

    if state.is_finished() {
        UpdateStatus::Finished
    } else {
        UpdateStatus::Playing
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct NoteReport {
    pub visit: usize,
    pub row: RowId,
    pub position: f64,
    pub note_type: NoteType,
    pub length: f64,
    pub trigger_time: f64,
    pub is_judged: bool,
    pub result: Option<JudgeGrade>,
}

/// Every live note spawned so far, in visit order.
pub fn note_reports(state: &State) -> Vec<NoteReport> {
    state
        .cursor
        .live_notes()
        .iter()
        .filter_map(|n| {
            let note = state.chart.notes.get(n.note)?;
            Some(NoteReport {
                visit: n.visit,
                row: n.row,
                position: n.position,
                note_type: note.note_type.clone(),
                length: note.length,
                trigger_time: n.trigger_time,
                is_judged: n.is_judged,
                result: n.result,
            })
        })
        .collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct StageSummary {
    pub score: JudgmentSession,
    pub grades: Vec<(&'static str, u32)>,
    pub row_visits: usize,
    pub commands_fired: usize,
    pub diagnostics: usize,
    pub end_time: f64,
    pub finished: bool,
}

pub fn summary(state: &State) -> StageSummary {
    StageSummary {
        score: state.session.clone(),
        grades: JudgeGrade::ALL
            .iter()
            .map(|g| (g.label(), state.session.count(*g)))
            .collect(),
        row_visits: state.row_visits,
        commands_fired: state.commands_fired,
        diagnostics: state.chart.diagnostics.len(),
        end_time: state.cursor.cursor_time(),
        finished: state.is_finished(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::parsing::parse_chart;
    use crate::game::replay::autoplay_edges;

    const DT: f64 = 1.0 / 256.0;

    fn start(text: &str) -> State {
        init(parse_chart(text), &PlaybackSettings::default())
    }

    fn run_until(state: &mut State, until: f64) -> UpdateStatus {
        let mut status = UpdateStatus::Playing;
        while state.cursor().cursor_time() < until {
            status = update(state, DT);
        }
        status
    }

    fn press(state: &mut State, c: char, down: f64, up: f64) {
        queue_input_edge(state, InputEdge::down(Key(c), down));
        queue_input_edge(state, InputEdge::up(Key(c), up));
    }

    #[test]
    fn autoplay_clears_a_chart_with_every_construct() {
        let text = concat!(
            "# Main\n",
            "-1:\n0:[1;t loop{2}]\n",
            "-2:\ntab:1\n0:[2;h]\n",
            "-3:\ntab:1\n0:[1;t if{1,0}]\n",
            "-4:\ntab:2\n0:[1;m(t,t)]\n1:[b]\n",
            "-5:\n0:[t]\n",
        );
        let chart = parse_chart(text);
        let settings = PlaybackSettings::default();
        let edges = autoplay_edges(&chart, settings.speed, settings.start_offset_s, &settings.keymap);
        let mut state = init(chart, &settings);
        for e in edges {
            queue_input_edge(&mut state, e);
        }
        let status = run_until(&mut state, 3.0);

        assert_eq!(status, UpdateStatus::Finished);
        let s = &state.session;
        assert_eq!(s.errors, 0, "{s:?}");
        assert_eq!(s.total_judged, 8, "looped rows are judged per visit: {s:?}");
        assert_eq!(s.count(JudgeGrade::Critical), 8);
        assert_eq!(summary(&state).row_visits, 7);
        assert!(note_reports(&state).iter().all(|n| n.is_judged || !n.note_type.is_judgable()));
    }

    #[test]
    fn presses_are_graded_and_untouched_notes_expire() {
        let mut state = start("# Main\n-1:\n0:[t]\n1:[t]\n-2:\n0:[t]\n");
        press(&mut state, 'd', 0.0, 0.03125);
        press(&mut state, 'f', 0.3125, 0.34375);
        let status = run_until(&mut state, 1.0);

        assert_eq!(status, UpdateStatus::Finished);
        let s = &state.session;
        assert_eq!(s.count(JudgeGrade::Critical), 1);
        assert_eq!(s.count(JudgeGrade::Late), 1);
        assert_eq!(s.count(JudgeGrade::TooLate), 1, "third note never pressed");
        assert_eq!(s.max_combo, 2);
        assert_eq!(s.combo, 0);
        assert_eq!(s.errors, 1);
    }

    #[test]
    fn empty_presses_respect_the_error_cooldown() {
        let mut state = start("# Main\n-1:\n0:[t]\n-2:\n0:[16;0]\n-3:\n0:[t]\n");
        press(&mut state, 'd', 1.0, 1.03125);
        press(&mut state, 'd', 1.125, 1.15625);
        press(&mut state, 'd', 1.5, 1.53125);
        run_until(&mut state, 2.0);

        let s = &state.session;
        assert_eq!(s.empty_presses, 2, "second press falls inside the cooldown");
        assert_eq!(s.errors, 3, "one miss plus two counted empty presses");
    }

    #[test]
    fn hold_survives_a_quick_repress() {
        let mut state = start("# Main\n-1:\n0:[4;h]\n-2:\n0:[t]\n");
        queue_input_edge(&mut state, InputEdge::down(Key('d'), 0.0));
        queue_input_edge(&mut state, InputEdge::up(Key('d'), 0.25));
        queue_input_edge(&mut state, InputEdge::down(Key('d'), 0.3125));
        queue_input_edge(&mut state, InputEdge::up(Key('d'), 1.0));
        press(&mut state, 'f', 1.0, 1.03125);
        let status = run_until(&mut state, 1.5);

        assert_eq!(status, UpdateStatus::Finished);
        assert_eq!(state.session.errors, 0, "{:?}", state.session);
        assert_eq!(state.session.count(JudgeGrade::Critical), 2);
    }

    #[test]
    fn late_repress_after_grace_costs_one_error() {
        let mut state = start("# Main\n-1:\n0:[4;h]\n-2:\n0:[t]\n");
        queue_input_edge(&mut state, InputEdge::down(Key('d'), 0.0));
        queue_input_edge(&mut state, InputEdge::up(Key('d'), 0.25));
        queue_input_edge(&mut state, InputEdge::down(Key('d'), 0.40625));
        queue_input_edge(&mut state, InputEdge::up(Key('d'), 0.5));
        press(&mut state, 'f', 1.0, 1.03125);
        run_until(&mut state, 1.5);

        let s = &state.session;
        assert_eq!(s.errors, 1, "re-press lands in the miss cooldown: {s:?}");
        assert_eq!(s.empty_presses, 0);
        assert_eq!(s.count(JudgeGrade::TooLate), 1);
    }

    #[test]
    fn gap_halts_and_the_queue_still_drains() {
        let mut state = start("# Main\n-1:\n0:[t]\n-3:\n0:[t]\n");
        let status = run_until(&mut state, 1.0);

        assert_eq!(status, UpdateStatus::Finished);
        assert!(!state.cursor().is_active());
        assert_eq!(state.session.total_judged, 1, "row -3 is unreachable");
        assert_eq!(state.session.count(JudgeGrade::TooLate), 1);
        assert!(
            state
                .take_events()
                .iter()
                .any(|e| matches!(e, CursorEvent::Halted { row: -1, .. }))
        );
    }

    #[test]
    fn looping_over_rows_without_length_stays_bounded() {
        for text in [
            "# Main\n-1:\n0:[1;t loop{50000000}]\n-2:\ntab:1\n0:[0;0]\n-3:\n0:[t]\n",
            "# Main\n-1:\n0:[1;t loop{50000000}]\n-2:\ntab:1\n-3:\ntab:1\n-4:\n0:[t]\n",
        ] {
            let mut state = start(text);
            let status = run_until(&mut state, 1.0);
            assert_eq!(status, UpdateStatus::Finished, "{text}");
            assert!(state.cursor().live_notes().len() <= 3, "{text}");
            assert!(state.row_visits <= 4, "body entered once: {}", state.row_visits);
            assert_eq!(state.session.count(JudgeGrade::TooLate), 2);
        }
    }

    #[test]
    fn first_pass_times_are_stamped_at_init() {
        let state = start("# Main\n-1:\n0:[1;t]\n-2:\n0:[t]\n");
        let times: Vec<f64> = state.chart.notes.iter().map(|(_, n)| n.trigger_time).collect();
        assert_eq!(times, vec![0.0, 0.25]);
    }

    #[test]
    fn key_outside_the_keymap_is_ignored() {
        let mut state = start("# Main\n-1:\n0:[t]\n");
        press(&mut state, 'x', 0.0, 0.03125);
        run_until(&mut state, 0.5);
        assert_eq!(state.session.empty_presses, 0);
        assert_eq!(state.session.count(JudgeGrade::TooLate), 1);
    }

    #[test]
    fn chart_meta_overrides_speed() {
        let chart = parse_chart("# Main\n-1:\n0:[2;t]\n-2:\n0:[t]\n# Meta\nspeed: 8\n");
        let settings = PlaybackSettings::default().with_chart_overrides(&chart);
        assert_eq!(settings.speed, 8.0);
        let state = init(chart, &PlaybackSettings::default());
        assert_eq!(state.cursor().speed(), 8.0);
    }
}
