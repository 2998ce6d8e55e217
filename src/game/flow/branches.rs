use crate::game::flow::range::BodyRange;
use crate::game::note::RowId;
use log::trace;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Enter,
    Skip,
}

#[derive(Clone, Debug)]
pub struct BranchConstruct {
    pub anchor: RowId,
    pub anchor_idx: usize,
    pub indent: u32,
    pub codes: SmallVec<[bool; 4]>,
    pub range: Option<BodyRange>,
    pub parent: Option<usize>,
    pointer: usize,
    decision: Decision,
}

impl BranchConstruct {
    pub fn new(
        anchor: RowId,
        anchor_idx: usize,
        indent: u32,
        codes: SmallVec<[bool; 4]>,
        range: Option<BodyRange>,
    ) -> Self {
        Self {
            anchor,
            anchor_idx,
            indent,
            codes,
            range,
            parent: None,
            pointer: 0,
            decision: Decision::Pending,
        }
    }

    #[inline(always)]
    pub const fn decision(&self) -> Decision {
        self.decision
    }

    #[inline(always)]
    pub const fn pointer(&self) -> usize {
        self.pointer
    }

    /// Reads the next code. Codes past the end read as 0.
    pub fn encounter(&mut self) {
        if self.range.is_none() {
            return;
        }
        let code = self.codes.get(self.pointer).copied();
        if code.is_none() {
            trace!("if@{} read past its {} codes, skipping", self.anchor, self.codes.len());
        }
        self.decision = if code.unwrap_or(false) {
            Decision::Enter
        } else {
            Decision::Skip
        };
        self.pointer = self.pointer.saturating_add(1);
    }

    /// The enclosing loop started another iteration.
    pub fn reset_decision(&mut self) {
        self.decision = Decision::Pending;
    }

    #[inline(always)]
    pub fn skips(&self, row_idx: usize) -> bool {
        self.decision == Decision::Skip && self.range.is_some_and(|r| r.contains(row_idx))
    }
}

#[derive(Clone, Debug, Default)]
pub struct BranchTable {
    pub branches: Vec<BranchConstruct>,
    by_anchor: FxHashMap<RowId, usize>,
}

impl BranchTable {
    pub fn insert(&mut self, construct: BranchConstruct) -> Option<usize> {
        if self.by_anchor.contains_key(&construct.anchor) {
            return None;
        }
        let idx = self.branches.len();
        self.by_anchor.insert(construct.anchor, idx);
        self.branches.push(construct);
        Some(idx)
    }

    #[inline(always)]
    pub fn at_anchor(&self, anchor: RowId) -> Option<usize> {
        self.by_anchor.get(&anchor).copied()
    }

    pub fn get(&self, anchor: RowId) -> Option<&BranchConstruct> {
        self.at_anchor(anchor).map(|i| &self.branches[i])
    }

    /// Innermost conditional that skips `to` while `from` is outside it.
    pub fn innermost_skipping(&self, from: usize, to: usize) -> Option<usize> {
        self.branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.skips(to) && !b.range.is_some_and(|r| r.contains(from)))
            .max_by_key(|(_, b)| (b.indent, b.anchor_idx))
            .map(|(i, _)| i)
    }
}
