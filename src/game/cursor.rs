use crate::game::chart::ChartData;
use crate::game::flow::{NavReason, Navigation};
use crate::game::judgment::JudgeGrade;
use crate::game::note::{Command, NoteId, RowId};
use crate::game::timing::{RowVisit, VisitPlanner};
use log::{error, info, trace, warn};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::VecDeque;

// A tick that crosses more row ends than this is treated as stuck.
const MAX_ROW_ENDS_PER_TICK: usize = 100_000;
/// Planned visits held ahead of the cursor, counting the current one.
pub const MAX_VISITS_AHEAD: usize = 4096;
/// Live notes stamped over a whole run; stays below the `LiveId` range.
pub const MAX_LIVE_NOTES: usize = 4_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LiveId(pub u32);

impl LiveId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One note as it occurs in one physical row visit. Loops create several
/// live notes for the same chart note; each is judged on its own.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveNote {
    pub note: NoteId,
    pub visit: usize,
    pub row: RowId,
    pub position: f64,
    pub trigger_time: f64,
    pub is_judged: bool,
    pub result: Option<JudgeGrade>,
    /// Multi notes: layers judged so far.
    pub layers_done: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CursorEvent {
    RowEntered { row: RowId, visit: usize, time: f64 },
    Command { row: RowId, visit: usize, command: Command, time: f64 },
    Navigated(Navigation),
    Halted { row: RowId, time: f64 },
}

pub type CursorEvents = SmallVec<[CursorEvent; 4]>;

#[derive(Clone, Debug)]
pub struct Cursor {
    planner: VisitPlanner,
    // Front is the visit the cursor is in; the rest are planned ahead.
    visits: VecDeque<RowVisit>,
    live: Vec<LiveNote>,
    fired_seq: Option<usize>,
    cursor_time: f64,
    // Position where playback froze, set once navigation finds no target.
    halted: Option<(Option<RowId>, f64)>,
    ahead_capped: bool,
}

impl Cursor {
    /// Playback starts at `cursor_time = 0`; the first row begins at
    /// `start_time`, so a positive value gives a lead-in.
    pub fn new(chart: &ChartData, speed: f64, start_time: f64) -> Self {
        let mut cursor = Self {
            planner: VisitPlanner::new(chart, speed, start_time),
            visits: VecDeque::new(),
            live: Vec::new(),
            fired_seq: None,
            cursor_time: 0.0,
            halted: None,
            ahead_capped: false,
        };
        cursor.plan_until(start_time, chart);
        if cursor.visits.is_empty() {
            info!("chart has no rows, nothing to play");
            cursor.halted = Some((None, 0.0));
        }
        cursor
    }

    #[inline(always)]
    pub const fn cursor_time(&self) -> f64 {
        self.cursor_time
    }

    #[inline(always)]
    pub const fn speed(&self) -> f64 {
        self.planner.speed()
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.halted.is_none()
    }

    #[inline(always)]
    pub fn current_visit(&self) -> Option<&RowVisit> {
        self.visits.front()
    }

    pub fn row_id(&self) -> Option<RowId> {
        match self.halted {
            Some((row, _)) => row,
            None => self.visits.front().map(|v| v.row),
        }
    }

    /// Grid position within the current row. Negative during lead-in.
    pub fn position(&self) -> f64 {
        if let Some((_, pos)) = self.halted {
            return pos;
        }
        self.visits
            .front()
            .map_or(0.0, |v| (self.cursor_time - v.start_time) * self.speed())
    }

    /// Visits planned but not yet left, the current one included.
    #[inline(always)]
    pub fn planned_ahead(&self) -> usize {
        self.visits.len()
    }

    #[inline(always)]
    pub fn live_notes(&self) -> &[LiveNote] {
        &self.live
    }

    #[inline(always)]
    pub fn live_notes_mut(&mut self) -> &mut [LiveNote] {
        &mut self.live
    }

    #[inline(always)]
    pub const fn planner(&self) -> &VisitPlanner {
        &self.planner
    }

    /// Live notes stamped for visit `seq`.
    pub fn live_in_visit(&self, seq: usize) -> &[LiveNote] {
        let lo = self.live.partition_point(|n| n.visit < seq);
        let hi = self.live.partition_point(|n| n.visit <= seq);
        &self.live[lo..hi]
    }

    fn spawn_live(&mut self, visit: &RowVisit, chart: &ChartData) {
        let Some(row) = chart.row(visit.row) else {
            return;
        };
        let speed = self.speed();
        for id in &row.notes {
            if let Some(note) = chart.notes.get(*id) {
                self.live.push(LiveNote {
                    note: *id,
                    visit: visit.seq,
                    row: visit.row,
                    position: note.position,
                    trigger_time: visit.start_time + note.position / speed,
                    is_judged: false,
                    result: None,
                    layers_done: 0,
                });
            }
        }
    }

    /// Plans visits until one starts after `until`, stamping their live notes.
    /// At most [`MAX_VISITS_AHEAD`] visits are held; the rest are planned as
    /// the cursor leaves rows.
    pub fn plan_until(&mut self, until: f64, chart: &ChartData) {
        while !self.planner.is_finished() && self.planner.horizon() <= until {
            if self.visits.len() >= MAX_VISITS_AHEAD {
                if !self.ahead_capped {
                    self.ahead_capped = true;
                    warn!(
                        "{MAX_VISITS_AHEAD} row visits pending before {until:.3}s, planning the rest as rows end"
                    );
                }
                break;
            }
            if self.live.len() >= MAX_LIVE_NOTES {
                error!("{} live notes stamped, stopping the traversal", self.live.len());
                self.planner.stop();
                break;
            }
            let Some(visit) = self.planner.next_visit(chart) else {
                break;
            };
            self.spawn_live(&visit, chart);
            self.visits.push_back(visit);
        }
    }

    /// Fires entry and command triggers of the current visit once the cursor
    /// reaches the start of the row.
    pub fn fire_row_triggers(&mut self, chart: &ChartData, out: &mut CursorEvents) {
        if self.halted.is_some() {
            return;
        }
        let Some(visit) = self.visits.front() else {
            return;
        };
        if self.fired_seq == Some(visit.seq) || self.cursor_time < visit.start_time {
            return;
        }
        let (row, seq) = (visit.row, visit.seq);
        self.fired_seq = Some(seq);
        trace!("row {row} entered (visit {seq}) at {:.3}s", self.cursor_time);
        out.push(CursorEvent::RowEntered {
            row,
            visit: seq,
            time: self.cursor_time,
        });
        for (_, note) in chart.notes_in_row(row) {
            for command in &note.commands {
                out.push(CursorEvent::Command {
                    row,
                    visit: seq,
                    command: command.clone(),
                    time: self.cursor_time,
                });
            }
        }
    }

    /// Time keeps running after a halt so queued notes can still expire.
    #[inline(always)]
    pub fn advance_time(&mut self, dt: f64) {
        if dt.is_finite() && dt > 0.0 {
            self.cursor_time += dt;
        }
    }

    /// Processes every row end the cursor has passed.
    pub fn resolve_row_ends(&mut self, chart: &ChartData, out: &mut CursorEvents) {
        let mut ends = 0;
        while self.halted.is_none() {
            let Some(visit) = self.visits.front() else {
                break;
            };
            // position > extent
            if self.cursor_time <= visit.end_time() {
                break;
            }
            // A row crossed within a single tick still fires its triggers.
            self.fire_row_triggers(chart, out);
            let Some(visit) = self.visits.pop_front() else {
                break;
            };
            out.push(CursorEvent::Navigated(visit.exit));
            if visit.exit.target.is_some() && self.visits.is_empty() {
                self.plan_until(self.cursor_time, chart);
            }
            if self.visits.is_empty() {
                let frozen = visit.duration * self.speed();
                self.halted = Some((Some(visit.row), frozen));
                match visit.exit.target {
                    Some(next) => error!("traversal stopped before row {next}, halting after row {}", visit.row),
                    None if visit.exit.reason == NavReason::End => {
                        info!("playback halted after row {} at {:.3}s", visit.row, self.cursor_time);
                    }
                    None => {}
                }
                out.push(CursorEvent::Halted {
                    row: visit.row,
                    time: self.cursor_time,
                });
                break;
            }
            ends += 1;
            if ends >= MAX_ROW_ENDS_PER_TICK {
                error!("{ends} row ends in one tick, deferring the rest");
                break;
            }
        }
        self.fire_row_triggers(chart, out);
    }
}
