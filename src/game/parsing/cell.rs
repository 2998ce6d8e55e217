use crate::game::chart::ParseErrorKind;
use crate::game::note::{Command, Layer, NoteType};
use crate::game::parsing::symbols::{SymbolData, SymbolKind, split_symbols};
use smallvec::SmallVec;

/// Everything a `<position>:[<content>]` cell declares besides its position.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub note_type: NoteType,
    pub length: f64,
    pub loop_codes: SmallVec<[u32; 4]>,
    pub branch_codes: SmallVec<[bool; 4]>,
    pub commands: Vec<Command>,
    pub layers: Vec<Layer>,
}

impl Cell {
    fn plain(note_type: NoteType, length: f64) -> Self {
        Self {
            note_type,
            length,
            loop_codes: SmallVec::new(),
            branch_codes: SmallVec::new(),
            commands: Vec::new(),
            layers: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellError {
    pub kind: ParseErrorKind,
    pub message: String,
}

impl CellError {
    fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[inline(always)]
fn parse_length(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_layers(list: &str) -> Result<Vec<Layer>, &'static str> {
    let mut layers = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut chars = part.chars();
        let note_type = chars
            .next()
            .and_then(NoteType::from_letter)
            .filter(|t| *t != NoteType::Multi)
            .ok_or("unknown layer type")?;
        let rest = chars.as_str();
        let length = if rest.is_empty() {
            1.0
        } else {
            parse_length(rest).ok_or("malformed layer length")?
        };
        layers.push(Layer { note_type, length });
    }
    Ok(layers)
}

/// Type token grammar: a single type letter, `m(<layer>,...)`, or anything
/// else which is kept verbatim.
fn parse_type_token(token: &str) -> Result<(NoteType, Vec<Layer>), CellError> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next())
        && let Some(t) = NoteType::from_letter(c)
    {
        return Ok((t, Vec::new()));
    }
    if let Some(inner) = token.strip_prefix("m(").and_then(|s| s.strip_suffix(')')) {
        let layers = parse_layers(inner).map_err(|e| CellError::new(ParseErrorKind::MalformedNumber, e))?;
        return Ok((NoteType::Multi, layers));
    }
    Ok((NoteType::Other(token.to_string()), Vec::new()))
}

/// Parses cell content. Recoverable oddities (bad entries inside a symbol
/// list) are pushed to `warnings`; anything that makes the cell unusable is
/// returned as an error and the caller drops the cell.
pub fn parse_cell(content: &str, warnings: &mut Vec<String>) -> Result<Cell, CellError> {
    let content = content.trim();
    if content.is_empty() || content == "0" {
        return Ok(Cell::plain(NoteType::Track, 1.0));
    }

    let Some((len_str, rest)) = content.split_once(';') else {
        if let Ok(v) = content.parse::<f64>() {
            return parse_length(content)
                .map(|len| Cell::plain(NoteType::Track, len))
                .ok_or_else(|| {
                    CellError::new(ParseErrorKind::MalformedNumber, format!("invalid length {v}"))
                });
        }
        if content.contains('{') || content.contains('}') {
            return Err(CellError::new(
                ParseErrorKind::MalformedSymbol,
                "structural symbols need an explicit '<length>;' prefix",
            ));
        }
        let (note_type, layers) = parse_type_token(content)?;
        let mut cell = Cell::plain(note_type, 1.0);
        cell.layers = layers;
        return Ok(cell);
    };

    let length = parse_length(len_str).ok_or_else(|| {
        CellError::new(
            ParseErrorKind::MalformedNumber,
            format!("malformed length '{}'", len_str.trim()),
        )
    })?;
    let (token, symbols) =
        split_symbols(rest).map_err(|e| CellError::new(ParseErrorKind::MalformedSymbol, e))?;

    let (note_type, layers) = if token.is_empty() {
        (NoteType::Track, Vec::new())
    } else {
        parse_type_token(&token)?
    };
    let mut cell = Cell::plain(note_type, length);
    cell.layers = layers;

    for sym in symbols {
        let kind = SymbolKind::lookup(&sym.name);
        match kind.parse(&sym.name, &sym.body, warnings) {
            SymbolData::Loop(codes) => {
                if !cell.loop_codes.is_empty() {
                    warnings.push("second loop{} in one cell ignored".to_string());
                    continue;
                }
                cell.loop_codes = codes;
            }
            SymbolData::Branch(codes) => {
                if !cell.branch_codes.is_empty() {
                    warnings.push("second if{} in one cell ignored".to_string());
                    continue;
                }
                cell.branch_codes = codes;
            }
            SymbolData::Command(cmd) => cell.commands.push(cmd),
        }
    }
    Ok(cell)
}
