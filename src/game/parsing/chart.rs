use crate::game::chart::{ChartData, Diagnostic, ParseErrorKind};
use crate::game::note::{Note, NoteStore, RowId};
use crate::game::parsing::cell::parse_cell;
use log::{debug, warn};
use std::path::Path;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Section {
    Outside,
    Main,
    Meta,
}

#[inline(always)]
fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(i) => &line[..i],
        None => line,
    }
}

/// `-<int>:`
fn parse_row_header(line: &str) -> Option<Result<RowId, &'static str>> {
    let body = line.strip_suffix(':')?;
    if !body.starts_with('-') || body.contains('[') {
        return None;
    }
    Some(body.trim().parse::<RowId>().map_err(|_| "malformed row id"))
}

/// `<float>:[<content>]`
fn split_note_line(line: &str) -> Option<(&str, &str)> {
    let (pos, rest) = line.split_once(':')?;
    let content = rest.trim().strip_prefix('[')?.strip_suffix(']')?;
    Some((pos.trim(), content))
}

struct Scanner {
    section: Section,
    current_row: Option<RowId>,
    tab: u32,
    notes: NoteStore,
    declared: Vec<(RowId, u32)>,
    meta: Vec<(String, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            section: Section::Outside,
            current_row: None,
            tab: 0,
            notes: NoteStore::default(),
            declared: Vec::new(),
            meta: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn report(&mut self, line_no: usize, kind: ParseErrorKind, message: String) {
        warn!("chart line {line_no}: {message}");
        self.diagnostics.push(Diagnostic {
            line: line_no,
            kind,
            message,
        });
    }

    fn close_row(&mut self) {
        if let Some(id) = self.current_row
            && let Some(entry) = self.declared.iter_mut().rev().find(|(rid, _)| *rid == id)
        {
            entry.1 = self.tab;
        }
    }

    fn scan_line(&mut self, line_no: usize, raw: &str) {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            return;
        }

        if let Some(header) = line.strip_prefix('#') {
            self.close_row();
            self.current_row = None;
            self.section = if header.trim().eq_ignore_ascii_case("main") {
                Section::Main
            } else if header.trim().eq_ignore_ascii_case("meta") {
                Section::Meta
            } else {
                Section::Outside
            };
            return;
        }

        match self.section {
            Section::Outside => {}
            Section::Meta => {
                if let Some((k, v)) = line.split_once(':') {
                    self.meta.push((k.trim().to_string(), v.trim().to_string()));
                }
            }
            Section::Main => self.scan_main_line(line_no, line),
        }
    }

    fn scan_main_line(&mut self, line_no: usize, line: &str) {
        if let Some(value) = line.strip_prefix("tab:") {
            match value.trim().parse::<u32>() {
                Ok(t) => self.tab = t,
                Err(_) => self.report(
                    line_no,
                    ParseErrorKind::MalformedNumber,
                    format!("malformed tab level '{}'", value.trim()),
                ),
            }
            return;
        }

        if let Some(header) = parse_row_header(line) {
            match header {
                Ok(id) => {
                    self.close_row();
                    if self.declared.iter().any(|(rid, _)| *rid == id) {
                        self.report(
                            line_no,
                            ParseErrorKind::DuplicateRow,
                            format!("row {id} declared again, appending to it"),
                        );
                    } else {
                        self.declared.push((id, 0));
                    }
                    self.current_row = Some(id);
                    self.tab = 0;
                }
                Err(e) => self.report(line_no, ParseErrorKind::UnknownRowSyntax, format!("{e}: '{line}'")),
            }
            return;
        }

        let Some((pos_str, content)) = split_note_line(line) else {
            self.report(
                line_no,
                ParseErrorKind::UnknownRowSyntax,
                format!("unrecognized line '{line}'"),
            );
            return;
        };
        let Some(row_id) = self.current_row else {
            self.report(
                line_no,
                ParseErrorKind::NoteOutsideRow,
                format!("note before any row header: '{line}'"),
            );
            return;
        };
        let position = match pos_str.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => p,
            _ => {
                self.report(
                    line_no,
                    ParseErrorKind::MalformedNumber,
                    format!("malformed position '{pos_str}'"),
                );
                return;
            }
        };

        let mut warnings = Vec::new();
        let parsed = parse_cell(content, &mut warnings);
        for w in warnings {
            self.report(line_no, ParseErrorKind::MalformedNumber, w);
        }
        match parsed {
            Ok(cell) => {
                let mut note = Note::new(row_id, position, cell.note_type, cell.length);
                note.indent_level = self.tab;
                note.loop_codes = cell.loop_codes;
                note.branch_codes = cell.branch_codes;
                note.commands = cell.commands;
                note.layers = cell.layers;
                note.line = line_no;
                if self.notes.push(note).is_none() {
                    self.report(
                        line_no,
                        ParseErrorKind::TooManyNotes,
                        "note limit reached, cell dropped".to_string(),
                    );
                }
            }
            Err(e) => self.report(line_no, e.kind, format!("{} in '{line}'", e.message)),
        }
    }
}

/// Parses chart text. Never fails: unusable lines are logged, recorded in
/// `ChartData::diagnostics` and skipped.
pub fn parse_chart(text: &str) -> ChartData {
    let mut scanner = Scanner::new();
    for (i, raw) in text.lines().enumerate() {
        scanner.scan_line(i + 1, raw);
    }
    scanner.close_row();

    debug!(
        "parsed chart: {} notes in {} rows, {} diagnostics",
        scanner.notes.len(),
        scanner.declared.len(),
        scanner.diagnostics.len()
    );
    ChartData::from_parts(scanner.notes, scanner.declared, scanner.meta, scanner.diagnostics)
}

pub fn load_chart_file<P: AsRef<Path>>(path: P) -> Result<ChartData, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_chart(&text))
}
