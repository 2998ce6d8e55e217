//! Control-flow resolution over the chart's row arena.
//!
//! Loops and conditionals are anchored at a row and own a body range that is
//! computed once when the resolver is built. Each time the cursor leaves a
//! row it asks [`Resolver::leave_row`] where to go next; rules are tried in a
//! fixed order and the first one that applies wins:
//!
//! 1. conditional skip (the default successor sits in an untaken body),
//! 2. loop skip (the default successor sits in a loop with no passes left),
//! 3. loop back (the row closes a loop body that still has passes),
//! 4. default decrement (`row_id - 1`).

pub mod branches;
pub mod loops;
pub mod range;

use crate::game::chart::ChartData;
use crate::game::note::RowId;
use branches::{BranchConstruct, BranchTable};
use log::{error, info, warn};
use loops::{LoopConstruct, LoopTable, VisitState};
use range::compute_body_range;
use rustc_hash::FxHashMap;

// Nesting deeper than this cannot come from a real chart.
const MAX_SKIP_CHAIN: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NavReason {
    Next,
    BranchSkip,
    LoopSkip,
    LoopBack,
    End,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Navigation {
    pub from: RowId,
    /// None: nowhere to go, playback halts.
    pub target: Option<RowId>,
    pub reason: NavReason,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SkipBy {
    Branch(usize),
    Loop(usize),
}

#[derive(Copy, Clone, Debug)]
struct SkipStep {
    by: SkipBy,
    after: usize,
}

#[derive(Clone, Debug)]
pub struct Resolver {
    row_ids: Vec<RowId>,
    row_lookup: FxHashMap<RowId, usize>,
    pub loops: LoopTable,
    pub branches: BranchTable,
}

impl Resolver {
    pub fn new(chart: &ChartData) -> Self {
        let mut loops = LoopTable::default();
        let mut branches = BranchTable::default();

        for (idx, row) in chart.rows.iter().enumerate() {
            for (_, note) in chart.notes_in_row(row.id) {
                if !note.loop_codes.is_empty() {
                    let range = compute_body_range(&chart.rows, idx, note.indent_level).and_then(|r| {
                        let extent: f64 = chart.rows[r.start..=r.end].iter().map(|b| b.extent).sum();
                        if extent > 0.0 { Ok(r) } else { Err("body takes no time") }
                    });
                    let range = match range {
                        Ok(r) => Some(r),
                        Err(e) => {
                            warn!("loop at row {} (line {}): {e}, it will never repeat", row.id, note.line);
                            None
                        }
                    };
                    let construct =
                        LoopConstruct::new(row.id, idx, note.indent_level, note.loop_codes.clone(), range);
                    if loops.insert(construct).is_none() {
                        warn!("row {} (line {}): extra loop ignored, one per row", row.id, note.line);
                    }
                }
                if !note.branch_codes.is_empty() {
                    let range = match compute_body_range(&chart.rows, idx, note.indent_level) {
                        Ok(r) => Some(r),
                        Err(e) => {
                            warn!("conditional at row {} (line {}): {e}, it will never skip", row.id, note.line);
                            None
                        }
                    };
                    let construct =
                        BranchConstruct::new(row.id, idx, note.indent_level, note.branch_codes.clone(), range);
                    if branches.insert(construct).is_none() {
                        warn!("row {} (line {}): extra conditional ignored, one per row", row.id, note.line);
                    }
                }
            }
        }

        for i in 0..loops.loops.len() {
            let (idx, indent) = (loops.loops[i].anchor_idx, loops.loops[i].indent);
            let parent = loops.enclosing(idx, indent);
            loops.loops[i].parent = parent;
        }
        for b in &mut branches.branches {
            b.parent = loops.enclosing(b.anchor_idx, b.indent);
        }

        let row_ids: Vec<RowId> = chart.rows.iter().map(|r| r.id).collect();
        let row_lookup = row_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self {
            row_ids,
            row_lookup,
            loops,
            branches,
        }
    }

    #[inline(always)]
    fn index_of(&self, row: RowId) -> Option<usize> {
        self.row_lookup.get(&row).copied()
    }

    #[inline(always)]
    pub fn first_row(&self) -> Option<RowId> {
        self.row_ids.first().copied()
    }

    #[inline(always)]
    pub fn has_row(&self, row: RowId) -> bool {
        self.row_lookup.contains_key(&row)
    }

    /// Fires the constructs anchored at `row`. Call once per visit.
    pub fn encounter(&mut self, row: RowId) {
        if let Some(i) = self.loops.at_anchor(row) {
            self.loops.loops[i].encounter();
        }
        if let Some(i) = self.branches.at_anchor(row) {
            self.branches.branches[i].encounter();
        }
    }

    fn skip_step(&self, from: usize, to: usize) -> Option<SkipStep> {
        if let Some(b) = self.branches.innermost_skipping(from, to) {
            let after = self.branches.branches[b].range.map_or(to + 1, |r| r.after());
            return Some(SkipStep {
                by: SkipBy::Branch(b),
                after,
            });
        }
        self.loops
            .loops
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                l.range
                    .is_some_and(|r| r.contains(to) && !r.contains(from))
                    && l.blocks_entry()
            })
            .max_by_key(|(_, l)| (l.indent, l.anchor_idx))
            .and_then(|(i, l)| {
                l.range.map(|r| SkipStep {
                    by: SkipBy::Loop(i),
                    after: r.after(),
                })
            })
    }

    fn resolve_skips(&self, from: usize, to: usize) -> Option<(NavReason, Option<usize>, Vec<SkipBy>)> {
        let first = self.skip_step(from, to)?;
        let reason = match first.by {
            SkipBy::Branch(_) => NavReason::BranchSkip,
            SkipBy::Loop(_) => NavReason::LoopSkip,
        };
        let mut applied = vec![first.by];
        let mut target = first.after;
        while target < self.row_ids.len() {
            if applied.len() >= MAX_SKIP_CHAIN {
                error!("skip chain from row index {from} exceeded {MAX_SKIP_CHAIN} steps, stopping");
                break;
            }
            match self.skip_step(from, target) {
                Some(step) => {
                    applied.push(step.by);
                    target = step.after;
                }
                None => break,
            }
        }
        let target = (target < self.row_ids.len()).then_some(target);
        Some((reason, target, applied))
    }

    /// Whether leaving `from` toward `row` would skip `row`.
    pub fn is_row_skipped(&self, from: RowId, row: RowId) -> bool {
        match (self.index_of(from), self.index_of(row)) {
            (Some(f), Some(t)) => self.skip_step(f, t).is_some(),
            _ => false,
        }
    }

    /// Where navigation lands instead of `row` when `row` is skipped. The
    /// inner `None` means the jump runs off the end of the chart.
    pub fn jump_target(&self, from: RowId, row: RowId) -> Option<Option<RowId>> {
        let (f, t) = (self.index_of(from)?, self.index_of(row)?);
        self.resolve_skips(f, t)
            .map(|(_, target, _)| target.map(|i| self.row_ids[i]))
    }

    /// Body start of the loop that would repeat when leaving `row`.
    pub fn loop_back_target(&self, row: RowId) -> Option<RowId> {
        let idx = self.index_of(row)?;
        self.loops
            .ending_at(idx)
            .into_iter()
            .map(|i| &self.loops.loops[i])
            .find(|l| l.visit() == VisitState::Running && l.passes_left() > 0)
            .and_then(|l| l.range.map(|r| self.row_ids[r.start]))
    }

    fn enter_bodies(&mut self, from: usize, to: usize) {
        for l in &mut self.loops.loops {
            if l.range.is_some_and(|r| r.start == to && !r.contains(from)) && !l.blocks_entry() {
                l.enter_body();
            }
        }
    }

    fn notify_iteration(&mut self, outer: usize) {
        for l in &mut self.loops.loops {
            if l.parent == Some(outer) {
                l.advance_code();
            }
        }
        for b in &mut self.branches.branches {
            if b.parent == Some(outer) {
                b.reset_decision();
            }
        }
    }

    /// Decides the row after `row` and applies the bookkeeping that goes with
    /// the decision (passes consumed, nested constructs advanced).
    pub fn leave_row(&mut self, row: RowId) -> Navigation {
        let Some(from) = self.index_of(row) else {
            warn!("leaving row {row} which is not part of the chart");
            return Navigation {
                from: row,
                target: None,
                reason: NavReason::End,
            };
        };
        let default_id = row.checked_sub(1);
        let default_idx = default_id.and_then(|id| self.index_of(id));

        if let Some(to) = default_idx
            && let Some((reason, target, applied)) = self.resolve_skips(from, to)
        {
            for by in applied {
                if let SkipBy::Loop(i) = by {
                    self.loops.loops[i].finish_visit();
                }
            }
            // Landing past the end of an enclosing body still ends that pass.
            for li in self.loops.exited_by(from, target) {
                if self.loops.loops[li].visit() != VisitState::Running {
                    continue;
                }
                if self.loops.loops[li].finish_pass()
                    && let Some(r) = self.loops.loops[li].range
                {
                    self.notify_iteration(li);
                    return Navigation {
                        from: row,
                        target: Some(self.row_ids[r.start]),
                        reason: NavReason::LoopBack,
                    };
                }
            }
            if let Some(t) = target {
                self.enter_bodies(from, t);
            }
            return Navigation {
                from: row,
                target: target.map(|i| self.row_ids[i]),
                reason,
            };
        }

        for li in self.loops.ending_at(from) {
            if self.loops.loops[li].visit() != VisitState::Running {
                continue;
            }
            if self.loops.loops[li].finish_pass()
                && let Some(r) = self.loops.loops[li].range
            {
                self.notify_iteration(li);
                return Navigation {
                    from: row,
                    target: Some(self.row_ids[r.start]),
                    reason: NavReason::LoopBack,
                };
            }
        }

        match default_idx {
            Some(to) => {
                self.enter_bodies(from, to);
                Navigation {
                    from: row,
                    target: default_id,
                    reason: NavReason::Next,
                }
            }
            None => {
                let below = self.row_ids.len().saturating_sub(from + 1);
                if below > 0 {
                    warn!(
                        "row {row}: next row {} does not exist, {below} later rows are unreachable",
                        row.saturating_sub(1)
                    );
                } else {
                    info!("row {row} is the last row, playback ends");
                }
                Navigation {
                    from: row,
                    target: None,
                    reason: NavReason::End,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::parsing::parse_chart;

    // Visits rows the way the cursor does and records the order.
    fn walk(resolver: &mut Resolver) -> Vec<RowId> {
        let mut out = Vec::new();
        let mut row = resolver.first_row();
        while let Some(r) = row {
            out.push(r);
            assert!(out.len() < 10_000, "runaway traversal");
            resolver.encounter(r);
            row = resolver.leave_row(r).target;
        }
        out
    }

    fn count(visits: &[RowId], row: RowId) -> usize {
        visits.iter().filter(|r| **r == row).count()
    }

    #[test]
    fn loop_with_two_codes_runs_body_three_times() {
        let chart = parse_chart(
            "# Main\n-1:\n0:[1;t loop{2,1}]\n-2:\ntab:1\n0:[t]\n-3:\ntab:1\n0:[t]\n-4:\n0:[t]\n",
        );
        let mut r = Resolver::new(&chart);
        let visits = walk(&mut r);
        assert_eq!(visits, vec![-1, -2, -3, -2, -3, -2, -3, -4]);
        let l = r.loops.get(-1).expect("loop table keyed by anchor");
        assert!(l.is_completed());
        assert_eq!(l.body_runs(), 3);
    }

    #[test]
    fn completion_flips_only_after_last_body_exit() {
        let chart = parse_chart("# Main\n-1:\n0:[1;t loop{2,1}]\n-2:\ntab:1\n0:[t]\n-3:\n0:[t]\n");
        let mut r = Resolver::new(&chart);
        r.encounter(-1);
        assert_eq!(r.leave_row(-1).target, Some(-2));
        for exit in 1..=3 {
            assert!(!r.loops.get(-1).is_some_and(|l| l.is_completed()), "completed before exit {exit}");
            r.encounter(-2);
            let nav = r.leave_row(-2);
            if exit < 3 {
                assert_eq!(nav.reason, NavReason::LoopBack);
                assert_eq!(r.loop_back_target(-2), if exit < 2 { Some(-2) } else { None });
            } else {
                assert_eq!(nav.target, Some(-3));
            }
        }
        assert!(r.loops.get(-1).is_some_and(|l| l.is_completed()));
    }

    #[test]
    fn nested_loop_reads_one_code_per_outer_iteration() {
        let chart = parse_chart(concat!(
            "# Main\n",
            "-1:\n0:[1;t loop{2}]\n",
            "-2:\ntab:1\n0:[1;t loop{2,1}]\n",
            "-3:\ntab:2\n0:[t]\n",
            "-4:\ntab:1\n0:[t]\n",
            "-5:\n0:[t]\n",
        ));
        let mut r = Resolver::new(&chart);
        let visits = walk(&mut r);
        assert_eq!(count(&visits, -3), 3, "inner body runs 2 then 1: {visits:?}");
        assert_eq!(count(&visits, -4), 2);
        assert_eq!(count(&visits, -5), 1);
        assert!(r.loops.get(-2).is_some_and(|l| l.is_completed()));
        assert!(r.loops.get(-1).is_some_and(|l| l.is_completed()));
    }

    #[test]
    fn conditional_codes_apply_per_outer_iteration() {
        let chart = parse_chart(concat!(
            "# Main\n",
            "-1:\n0:[1;t loop{3}]\n",
            "-2:\ntab:1\n0:[1;t if{1,0,1}]\n",
            "-3:\ntab:2\n0:[t]\n",
            "-4:\ntab:2\n0:[t]\n",
            "-5:\ntab:1\n0:[t]\n",
            "-6:\n0:[t]\n",
        ));
        let mut r = Resolver::new(&chart);
        let visits = walk(&mut r);
        assert_eq!(count(&visits, -2), 3);
        assert_eq!(count(&visits, -3), 2, "body skipped on the 0 pass: {visits:?}");
        assert_eq!(count(&visits, -4), 2);
        assert_eq!(count(&visits, -5), 3);
    }

    #[test]
    fn skip_out_of_a_loop_body_still_counts_the_pass() {
        let chart = parse_chart(concat!(
            "# Main\n",
            "-1:\n0:[1;t loop{2}]\n",
            "-2:\ntab:1\n0:[t]\n",
            "-3:\ntab:1\n0:[1;t if{0,1}]\n",
            "-4:\ntab:2\n0:[t]\n",
            "-5:\n0:[t]\n",
        ));
        let mut r = Resolver::new(&chart);
        let visits = walk(&mut r);
        assert_eq!(visits, vec![-1, -2, -3, -2, -3, -4, -5]);
        assert!(r.loops.get(-1).is_some_and(|l| l.is_completed() && l.body_runs() == 2));
    }

    #[test]
    fn untaken_conditional_skips_every_body_row() {
        let text = "# Main\n-1:\n0:[1;t if{0}]\n-2:\ntab:1\n0:[t]\n-3:\ntab:2\n0:[t]\n-4:\n0:[t]\n";
        let chart = parse_chart(text);
        let mut r = Resolver::new(&chart);
        r.encounter(-1);
        assert!(r.is_row_skipped(-1, -2));
        assert_eq!(r.jump_target(-1, -2), Some(Some(-4)));
        let nav = r.leave_row(-1);
        assert_eq!(nav, Navigation { from: -1, target: Some(-4), reason: NavReason::BranchSkip });

        let taken = parse_chart(&text.replace("if{0}", "if{1}"));
        let mut r = Resolver::new(&taken);
        assert_eq!(walk(&mut r), vec![-1, -2, -3, -4]);
    }

    #[test]
    fn nested_skips_chain_outward() {
        let chart = parse_chart(concat!(
            "# Main\n",
            "-1:\n0:[1;t if{1}]\n",
            "-2:\ntab:1\n0:[1;t if{0}]\n",
            "-3:\ntab:2\n0:[t]\n",
            "-4:\ntab:1\n0:[t]\n",
            "-5:\n0:[t]\n",
        ));
        let mut r = Resolver::new(&chart);
        assert_eq!(walk(&mut r), vec![-1, -2, -4, -5]);
    }

    #[test]
    fn zero_count_loop_is_skipped() {
        let chart = parse_chart("# Main\n-1:\n0:[1;t loop{0}]\n-2:\ntab:1\n0:[t]\n-3:\n0:[t]\n");
        let mut r = Resolver::new(&chart);
        assert_eq!(walk(&mut r), vec![-1, -3]);
        assert!(r.loops.get(-1).is_some_and(|l| l.is_completed()));
    }

    #[test]
    fn degenerate_constructs_do_not_break_traversal() {
        let chart = parse_chart("# Main\n-1:\n0:[t]\n-2:\n0:[1;t loop{3} if{0}]\n");
        let mut r = Resolver::new(&chart);
        assert!(r.loops.get(-2).is_some_and(|l| l.is_noop()));
        assert_eq!(walk(&mut r), vec![-1, -2]);
    }

    #[test]
    fn loop_over_rows_without_length_runs_once() {
        let chart = parse_chart("# Main\n-1:\n0:[1;t loop{50000000}]\n-2:\ntab:1\n0:[0;0]\n-3:\n0:[t]\n");
        let mut r = Resolver::new(&chart);
        assert!(r.loops.get(-1).is_some_and(|l| l.is_noop()));
        assert_eq!(walk(&mut r), vec![-1, -2, -3]);
    }

    #[test]
    fn gap_in_row_ids_halts() {
        let chart = parse_chart("# Main\n-1:\n0:[t]\n-3:\n0:[t]\n");
        let mut r = Resolver::new(&chart);
        assert_eq!(walk(&mut r), vec![-1]);
        assert_eq!(r.leave_row(-3).reason, NavReason::End);
    }
}
