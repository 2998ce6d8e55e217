use crate::game::note::{Note, NoteId, NoteStore, RowId};
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ParseErrorKind {
    MalformedNumber,
    MalformedSymbol,
    UnknownRowSyntax,
    NoteOutsideRow,
    DuplicateRow,
    TooManyNotes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub kind: ParseErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub id: RowId,
    // Smallest indent among the row's notes; rows without notes keep the
    // last `tab:` value declared under their header.
    pub indent: u32,
    pub extent: f64,
    // Sorted by position.
    pub notes: Vec<NoteId>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            indent: 0,
            extent: 0.0,
            notes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ChartData {
    pub notes: NoteStore,
    // Descending `id`, i.e. authoring order.
    pub rows: Vec<Row>,
    row_lookup: FxHashMap<RowId, usize>,
    pub meta: Vec<(String, String)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ChartData {
    /// Builds the row arena from already-parsed notes. `declared` carries
    /// every row header seen with the indent in effect when the row closed.
    pub fn from_parts(
        notes: NoteStore,
        declared: Vec<(RowId, u32)>,
        meta: Vec<(String, String)>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        let mut rows: Vec<Row> = Vec::with_capacity(declared.len());
        let mut lookup: FxHashMap<RowId, usize> = FxHashMap::default();
        for (id, tab) in declared {
            if lookup.contains_key(&id) {
                continue;
            }
            let mut row = Row::new(id);
            row.indent = tab;
            lookup.insert(id, rows.len());
            rows.push(row);
        }

        for (note_id, note) in notes.iter() {
            let idx = match lookup.get(&note.row_id) {
                Some(&i) => i,
                None => {
                    lookup.insert(note.row_id, rows.len());
                    rows.push(Row::new(note.row_id));
                    rows.len() - 1
                }
            };
            rows[idx].notes.push(note_id);
        }

        for row in &mut rows {
            row.notes.sort_by(|a, b| {
                let pa = notes.get(*a).map_or(0.0, |n| n.position);
                let pb = notes.get(*b).map_or(0.0, |n| n.position);
                pa.total_cmp(&pb)
            });
            let mut extent = 0.0_f64;
            let mut min_indent: Option<u32> = None;
            for note in row.notes.iter().filter_map(|id| notes.get(*id)) {
                extent = extent.max(note.end_position());
                min_indent = Some(min_indent.map_or(note.indent_level, |m| m.min(note.indent_level)));
            }
            row.extent = extent;
            if let Some(indent) = min_indent {
                row.indent = indent;
            }
        }

        rows.sort_by(|a, b| b.id.cmp(&a.id));
        let row_lookup = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();

        Self {
            notes,
            rows,
            row_lookup,
            meta,
            diagnostics,
        }
    }

    #[inline(always)]
    pub fn row_index(&self, id: RowId) -> Option<usize> {
        self.row_lookup.get(&id).copied()
    }

    #[inline(always)]
    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.row_index(id).map(|i| &self.rows[i])
    }

    #[inline(always)]
    pub fn first_row(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn notes_in_row(&self, id: RowId) -> impl Iterator<Item = (NoteId, &Note)> {
        self.row(id)
            .into_iter()
            .flat_map(|row| row.notes.iter())
            .filter_map(|id| self.notes.get(*id).map(|n| (*id, n)))
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn judgable_note_count(&self) -> usize {
        self.notes
            .iter()
            .filter(|(_, n)| n.note_type.is_judgable())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::note::NoteType;

    fn note(row: RowId, pos: f64, len: f64, indent: u32) -> Note {
        let mut n = Note::new(row, pos, NoteType::Tap, len);
        n.indent_level = indent;
        n
    }

    #[test]
    fn rows_sorted_descending_with_extent_and_indent() {
        let mut store = NoteStore::default();
        store.push(note(-2, 0.5, 2.0, 1));
        store.push(note(-1, 0.0, 1.0, 0));
        store.push(note(-2, 0.0, 1.0, 2));
        let chart = ChartData::from_parts(store, vec![(-1, 0), (-2, 0), (-3, 1)], Vec::new(), Vec::new());

        let ids: Vec<RowId> = chart.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![-1, -2, -3]);
        let row = chart.row(-2).expect("row -2 exists");
        assert!((row.extent - 2.5).abs() < 1e-9, "extent is max(position+length)");
        assert_eq!(row.indent, 1, "row indent is the smallest note indent");
        assert_eq!(chart.row(-3).map(|r| r.indent), Some(1), "empty row keeps its tab level");
        assert_eq!(chart.row(-3).map(|r| r.extent), Some(0.0));
    }

    #[test]
    fn notes_in_row_follow_position_order() {
        let mut store = NoteStore::default();
        store.push(note(-1, 2.0, 1.0, 0));
        store.push(note(-1, 0.0, 1.0, 0));
        let chart = ChartData::from_parts(store, vec![(-1, 0)], Vec::new(), Vec::new());
        let positions: Vec<f64> = chart.notes_in_row(-1).map(|(_, n)| n.position).collect();
        assert_eq!(positions, vec![0.0, 2.0]);
    }
}
