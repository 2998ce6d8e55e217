use serde::Serialize;
use smallvec::SmallVec;

pub type RowId = i32;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Track,
    Tap,
    Hold,
    Break,
    Multi,
    // Unknown tokens are carried verbatim so newer charts still load.
    Other(String),
}

impl NoteType {
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Track),
            't' => Some(Self::Tap),
            'h' => Some(Self::Hold),
            'b' => Some(Self::Break),
            'm' => Some(Self::Multi),
            _ => None,
        }
    }

    pub const fn letter(&self) -> Option<char> {
        match self {
            Self::Track => Some('0'),
            Self::Tap => Some('t'),
            Self::Hold => Some('h'),
            Self::Break => Some('b'),
            Self::Multi => Some('m'),
            Self::Other(_) => None,
        }
    }

    /// Whether the judgment engine ever looks at notes of this type.
    #[inline(always)]
    pub const fn is_judgable(&self) -> bool {
        matches!(self, Self::Tap | Self::Hold | Self::Break | Self::Multi)
    }
}

/// One sub-note of a `multi` note, judged in order at the parent's row/position.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Layer {
    pub note_type: NoteType,
    pub length: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Command {
    pub name: String,
    pub params: Vec<i32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NoteId(pub u32);

impl NoteId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Note {
    pub row_id: RowId,
    pub position: f64,
    pub note_type: NoteType,
    pub length: f64,
    pub indent_level: u32,
    // First-pass schedule (descending row order, no control flow). Live
    // per-visit times are stamped by the visit planner.
    pub trigger_time: f64,
    pub loop_codes: SmallVec<[u32; 4]>,
    pub branch_codes: SmallVec<[bool; 4]>,
    pub commands: Vec<Command>,
    pub layers: Vec<Layer>,
    /// 1-based source line, kept for diagnostics.
    pub line: usize,
}

impl Note {
    pub fn new(row_id: RowId, position: f64, note_type: NoteType, length: f64) -> Self {
        Self {
            row_id,
            position,
            note_type,
            length,
            indent_level: 0,
            trigger_time: 0.0,
            loop_codes: SmallVec::new(),
            branch_codes: SmallVec::new(),
            commands: Vec::new(),
            layers: Vec::new(),
            line: 0,
        }
    }

    #[inline(always)]
    pub fn end_position(&self) -> f64 {
        self.position + self.length
    }

    #[inline(always)]
    pub fn has_structure(&self) -> bool {
        !self.loop_codes.is_empty() || !self.branch_codes.is_empty() || !self.commands.is_empty()
    }
}

/// Single owner of every parsed note. Everything else refers to notes by `NoteId`.
#[derive(Clone, Debug, Default)]
pub struct NoteStore {
    notes: Vec<Note>,
}

impl NoteStore {
    /// `None` once the id space is used up; the note is dropped.
    pub fn push(&mut self, note: Note) -> Option<NoteId> {
        let id = NoteId(u32::try_from(self.notes.len()).ok()?);
        self.notes.push(note);
        Some(id)
    }

    #[inline(always)]
    pub fn get(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(id.index())
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: NoteId) -> Option<&mut Note> {
        self.notes.get_mut(id.index())
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NoteId, &Note)> {
        self.notes
            .iter()
            .enumerate()
            .map(|(i, n)| (NoteId(i as u32), n))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Note> {
        self.notes.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_notes_get_distinct_ids() {
        let mut store = NoteStore::default();
        let a = store.push(Note::new(-1, 0.0, NoteType::Tap, 1.0)).expect("note id");
        let b = store.push(Note::new(-1, 0.0, NoteType::Tap, 1.0)).expect("note id");
        assert_ne!(a, b, "note identity must not depend on field values");
        assert_eq!(store.get(a), store.get(b));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn track_and_unknown_types_are_not_judged() {
        assert!(!NoteType::Track.is_judgable());
        assert!(!NoteType::Other("x".to_string()).is_judgable());
        assert!(NoteType::Break.is_judgable());
        assert_eq!(NoteType::from_letter('h'), Some(NoteType::Hold));
        assert_eq!(NoteType::from_letter('q'), None);
    }
}
