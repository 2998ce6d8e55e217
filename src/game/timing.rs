//! Trigger-time scheduling.
//!
//! Two views of the same chart are produced here:
//! - [`compute_trigger_times`] walks rows once in authoring order with no
//!   control flow and stores the result on every `Note`. This is the
//!   "first pass" schedule used for previews and sanity checks.
//! - [`VisitPlanner`] follows the control-flow resolver and yields one
//!   [`RowVisit`] per physical row visit. Loops make a row show up several
//!   times; each visit gets its own start time.

use crate::game::chart::ChartData;
use crate::game::flow::{Navigation, Resolver};
use crate::game::note::RowId;
use log::{debug, error, warn};
use serde::Serialize;

pub const DEFAULT_SPEED: f64 = 4.0;
pub const MAX_PLANNED_VISITS: usize = 1_000_000;

/// Speed in grid units per second. Non-positive or non-finite values fall
/// back to [`DEFAULT_SPEED`].
#[inline(always)]
pub fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        warn!("invalid speed {speed}, using {DEFAULT_SPEED}");
        DEFAULT_SPEED
    }
}

/// Stamps `Note::trigger_time` in descending row order, ignoring loops and
/// conditionals. Returns the time at which the last row ends.
pub fn compute_trigger_times(chart: &mut ChartData, speed: f64, start_time: f64) -> f64 {
    let speed = sanitize_speed(speed);
    let mut accumulated = start_time;
    for row in &chart.rows {
        for id in &row.notes {
            if let Some(note) = chart.notes.get_mut(*id) {
                note.trigger_time = accumulated + note.position / speed;
            }
        }
        accumulated += row.extent / speed;
    }
    debug!(
        "first-pass schedule: {} rows, ends at {accumulated:.3}s",
        chart.rows.len()
    );
    accumulated
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowVisit {
    /// 0-based index of this visit in traversal order.
    pub seq: usize,
    pub row: RowId,
    pub start_time: f64,
    pub duration: f64,
    /// How navigation left the row once the visit ended.
    #[serde(skip)]
    pub exit: Navigation,
}

impl RowVisit {
    #[inline(always)]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Resolves navigation ahead of playback. Control flow only depends on the
/// chart's fixed code sequences, so visits can be planned before the cursor
/// reaches them.
#[derive(Clone, Debug)]
pub struct VisitPlanner {
    resolver: Resolver,
    speed: f64,
    next_row: Option<RowId>,
    next_start: f64,
    next_seq: usize,
}

impl VisitPlanner {
    pub fn new(chart: &ChartData, speed: f64, start_time: f64) -> Self {
        let resolver = Resolver::new(chart);
        let next_row = resolver.first_row();
        Self {
            resolver,
            speed: sanitize_speed(speed),
            next_row,
            next_start: start_time,
            next_seq: 0,
        }
    }

    #[inline(always)]
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    #[inline(always)]
    pub fn is_finished(&self) -> bool {
        self.next_row.is_none()
    }

    /// Start time of the next visit that has not been planned yet.
    #[inline(always)]
    pub const fn horizon(&self) -> f64 {
        self.next_start
    }

    /// Control-flow state as of the last planned visit, which may be ahead of
    /// the cursor.
    #[inline(always)]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Visits planned so far.
    #[inline(always)]
    pub const fn planned(&self) -> usize {
        self.next_seq
    }

    /// Ends the traversal; later calls to [`Self::next_visit`] yield nothing.
    pub fn stop(&mut self) {
        self.next_row = None;
    }

    pub fn next_visit(&mut self, chart: &ChartData) -> Option<RowVisit> {
        let row_id = self.next_row?;
        if self.next_seq >= MAX_PLANNED_VISITS {
            error!("traversal exceeded {MAX_PLANNED_VISITS} row visits, stopping at row {row_id}");
            self.next_row = None;
            return None;
        }
        let Some(row) = chart.row(row_id) else {
            warn!("navigation reached row {row_id} which the chart does not declare");
            self.next_row = None;
            return None;
        };

        self.resolver.encounter(row_id);
        let exit = self.resolver.leave_row(row_id);
        let visit = RowVisit {
            seq: self.next_seq,
            row: row_id,
            start_time: self.next_start,
            duration: row.extent / self.speed,
            exit,
        };
        self.next_row = exit.target;
        self.next_start = visit.end_time();
        self.next_seq += 1;
        Some(visit)
    }
}

/// Full unroll of the chart's traversal. Stops after
/// [`MAX_PLANNED_VISITS`] visits.
pub fn plan_all_visits(chart: &ChartData, speed: f64, start_time: f64) -> Vec<RowVisit> {
    let mut planner = VisitPlanner::new(chart, speed, start_time);
    let mut visits = Vec::new();
    while let Some(v) = planner.next_visit(chart) {
        visits.push(v);
    }
    visits
}
