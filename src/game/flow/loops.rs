use crate::game::flow::range::BodyRange;
use crate::game::note::RowId;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VisitState {
    /// Anchor not seen since the last code advance.
    Idle,
    Running,
    /// Passes for the current code are used up.
    Done,
}

#[derive(Clone, Debug)]
pub struct LoopConstruct {
    pub anchor: RowId,
    pub anchor_idx: usize,
    pub indent: u32,
    pub codes: SmallVec<[u32; 4]>,
    // None: degraded to a no-op.
    pub range: Option<BodyRange>,
    /// Innermost enclosing loop (arena index).
    pub parent: Option<usize>,
    code_index: usize,
    passes_left: u32,
    visit: VisitState,
    exhausted: bool,
    body_runs: u32,
}

impl LoopConstruct {
    pub fn new(
        anchor: RowId,
        anchor_idx: usize,
        indent: u32,
        codes: SmallVec<[u32; 4]>,
        range: Option<BodyRange>,
    ) -> Self {
        let exhausted = range.is_none() || codes.is_empty();
        Self {
            anchor,
            anchor_idx,
            indent,
            codes,
            range,
            parent: None,
            code_index: 0,
            passes_left: 0,
            visit: VisitState::Idle,
            exhausted,
            body_runs: 0,
        }
    }

    #[inline(always)]
    pub const fn is_completed(&self) -> bool {
        self.exhausted
    }

    #[inline(always)]
    pub const fn is_noop(&self) -> bool {
        self.range.is_none()
    }

    #[inline(always)]
    pub const fn body_runs(&self) -> u32 {
        self.body_runs
    }

    #[inline(always)]
    pub const fn passes_left(&self) -> u32 {
        self.passes_left
    }

    #[inline(always)]
    pub const fn visit(&self) -> VisitState {
        self.visit
    }

    #[inline(always)]
    pub fn current_code(&self) -> Option<u32> {
        self.codes.get(self.code_index).copied()
    }

    /// Anchor row visited. Nested loops run their current code; an outermost
    /// loop has nobody to advance it, so it runs every remaining code in one go.
    pub fn encounter(&mut self) {
        if self.exhausted {
            return;
        }
        let rest = self.codes.get(self.code_index..).unwrap_or(&[]);
        self.passes_left = if self.parent.is_some() {
            rest.first().copied().unwrap_or(0)
        } else {
            rest.iter().fold(0_u32, |acc, c| acc.saturating_add(*c))
        };
        self.visit = VisitState::Running;
        trace!(
            "loop@{} encountered: code #{} -> {} passes",
            self.anchor, self.code_index, self.passes_left
        );
    }

    /// Body is about to be skipped by navigation.
    #[inline(always)]
    pub fn blocks_entry(&self) -> bool {
        self.exhausted || self.visit != VisitState::Running || self.passes_left == 0
    }

    pub fn enter_body(&mut self) {
        self.passes_left = self.passes_left.saturating_sub(1);
    }

    /// Leaving the body's last row. Returns true when the body runs again.
    pub fn finish_pass(&mut self) -> bool {
        self.body_runs = self.body_runs.saturating_add(1);
        if self.passes_left > 0 {
            self.passes_left -= 1;
            return true;
        }
        self.finish_visit();
        false
    }

    pub fn finish_visit(&mut self) {
        if self.visit != VisitState::Running {
            return;
        }
        self.visit = VisitState::Done;
        if self.parent.is_none() || self.code_index + 1 >= self.codes.len() {
            self.code_index = self.codes.len();
            self.exhausted = true;
            debug!("loop@{} completed after {} body runs", self.anchor, self.body_runs);
        }
    }

    /// The enclosing loop started another iteration.
    pub fn advance_code(&mut self) {
        if self.exhausted {
            return;
        }
        self.code_index += 1;
        self.passes_left = 0;
        self.visit = VisitState::Idle;
        if self.code_index >= self.codes.len() {
            self.exhausted = true;
            debug!("loop@{} ran out of codes", self.anchor);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoopTable {
    pub loops: Vec<LoopConstruct>,
    by_anchor: FxHashMap<RowId, usize>,
}

impl LoopTable {
    pub fn insert(&mut self, construct: LoopConstruct) -> Option<usize> {
        if self.by_anchor.contains_key(&construct.anchor) {
            return None;
        }
        let idx = self.loops.len();
        self.by_anchor.insert(construct.anchor, idx);
        self.loops.push(construct);
        Some(idx)
    }

    #[inline(always)]
    pub fn at_anchor(&self, anchor: RowId) -> Option<usize> {
        self.by_anchor.get(&anchor).copied()
    }

    pub fn get(&self, anchor: RowId) -> Option<&LoopConstruct> {
        self.at_anchor(anchor).map(|i| &self.loops[i])
    }

    /// Innermost valid loop whose body strictly encloses (`row_idx`, `indent`).
    pub fn enclosing(&self, row_idx: usize, indent: u32) -> Option<usize> {
        self.loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.indent < indent && l.range.is_some_and(|r| r.contains(row_idx)))
            .max_by_key(|(_, l)| (l.indent, l.anchor_idx))
            .map(|(i, _)| i)
    }

    /// Loops whose body holds `from` but not `landing` (None: past the last
    /// row), innermost first.
    pub fn exited_by(&self, from: usize, landing: Option<usize>) -> SmallVec<[usize; 4]> {
        let mut out: SmallVec<[usize; 4]> = self
            .loops
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                l.range
                    .is_some_and(|r| r.contains(from) && landing.is_none_or(|t| !r.contains(t)))
            })
            .map(|(i, _)| i)
            .collect();
        out.sort_by(|a, b| {
            let (la, lb) = (&self.loops[*a], &self.loops[*b]);
            (lb.indent, lb.anchor_idx).cmp(&(la.indent, la.anchor_idx))
        });
        out
    }

    /// Loops whose body ends at `row_idx`, innermost first.
    pub fn ending_at(&self, row_idx: usize) -> SmallVec<[usize; 4]> {
        let mut out: SmallVec<[usize; 4]> = self
            .loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.range.is_some_and(|r| r.end == row_idx))
            .map(|(i, _)| i)
            .collect();
        out.sort_by(|a, b| {
            let (la, lb) = (&self.loops[*a], &self.loops[*b]);
            (lb.indent, lb.anchor_idx).cmp(&(la.indent, la.anchor_idx))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn top_level(codes: &[u32]) -> LoopConstruct {
        LoopConstruct::new(-1, 0, 0, codes.iter().copied().collect(), Some(BodyRange { start: 1, end: 2 }))
    }

    #[test]
    fn outermost_loop_runs_every_code() {
        let mut l = top_level(&[2, 1]);
        l.encounter();
        l.enter_body();
        let mut exits = 0;
        loop {
            exits += 1;
            let again = l.finish_pass();
            assert_eq!(l.is_completed(), !again, "completed exactly when no more passes");
            if !again {
                break;
            }
        }
        assert_eq!(exits, 3);
        assert_eq!(l.body_runs(), 3);
    }

    #[test]
    fn nested_loop_waits_for_its_parent() {
        let mut l = LoopConstruct::new(-2, 1, 1, smallvec![1, 2], Some(BodyRange { start: 2, end: 2 }));
        l.parent = Some(0);
        l.encounter();
        l.enter_body();
        assert!(!l.finish_pass());
        assert!(!l.is_completed(), "second code still pending");
        assert_eq!(l.visit(), VisitState::Done);
        assert!(l.blocks_entry());

        l.advance_code();
        assert_eq!(l.current_code(), Some(2));
        l.encounter();
        assert!(!l.blocks_entry());
        l.enter_body();
        assert!(l.finish_pass());
        assert!(!l.finish_pass());
        assert!(l.is_completed());
        assert_eq!(l.body_runs(), 3);
    }

    #[test]
    fn zero_count_blocks_entry_and_empty_codes_are_noops() {
        let mut l = top_level(&[0]);
        l.encounter();
        assert!(l.blocks_entry());
        l.finish_visit();
        assert!(l.is_completed());

        let empty = top_level(&[]);
        assert!(empty.is_completed());
    }
}
