// Structural symbols: `<name>{<int>,<int>,...}` expressions inside a note cell.
//
// Every kind owns its own parser; adding a symbol means adding a variant and
// one line to `REGISTRY`.

use crate::game::note::{Command, NoteType};
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Loop,
    Branch,
    Command,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolData {
    Loop(SmallVec<[u32; 4]>),
    Branch(SmallVec<[bool; 4]>),
    Command(Command),
}

type SymbolParser = fn(&str, &[Option<i64>], &mut Vec<String>) -> SymbolData;

const REGISTRY: &[(&str, SymbolKind)] = &[("loop", SymbolKind::Loop), ("if", SymbolKind::Branch)];

impl SymbolKind {
    /// Names not in the registry are kept as commands.
    pub fn lookup(name: &str) -> Self {
        REGISTRY
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map_or(Self::Command, |(_, k)| *k)
    }

    const fn parser(self) -> SymbolParser {
        match self {
            Self::Loop => parse_loop,
            Self::Branch => parse_branch,
            Self::Command => parse_command,
        }
    }

    /// Parses the brace body. Entries that are missing or not integers become 0
    /// and leave a message in `warnings`.
    pub fn parse(self, name: &str, body: &str, warnings: &mut Vec<String>) -> SymbolData {
        let values = split_int_list(name, body, warnings);
        (self.parser())(name, &values, warnings)
    }
}

fn split_int_list(name: &str, body: &str, warnings: &mut Vec<String>) -> Vec<Option<i64>> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    body.split(',')
        .enumerate()
        .map(|(i, part)| {
            let part = part.trim();
            match part.parse::<i64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    if part.is_empty() {
                        warnings.push(format!("{name}{{}} entry {} is empty, using 0", i + 1));
                    } else {
                        warnings.push(format!(
                            "{name}{{}} entry {} ('{part}') is not an integer, using 0",
                            i + 1
                        ));
                    }
                    None
                }
            }
        })
        .collect()
}

fn parse_loop(name: &str, values: &[Option<i64>], warnings: &mut Vec<String>) -> SymbolData {
    let codes = values
        .iter()
        .map(|v| match v {
            Some(n) if *n < 0 => {
                warnings.push(format!("{name}{{}} count {n} is negative, using 0"));
                0
            }
            Some(n) => u32::try_from(*n).unwrap_or(u32::MAX),
            None => 0,
        })
        .collect();
    SymbolData::Loop(codes)
}

fn parse_branch(name: &str, values: &[Option<i64>], warnings: &mut Vec<String>) -> SymbolData {
    let codes = values
        .iter()
        .map(|v| match v {
            Some(0) | None => false,
            Some(1) => true,
            Some(n) => {
                warnings.push(format!("{name}{{}} code {n} is not 0/1, treating as 1"));
                true
            }
        })
        .collect();
    SymbolData::Branch(codes)
}

fn parse_command(name: &str, values: &[Option<i64>], _warnings: &mut Vec<String>) -> SymbolData {
    SymbolData::Command(Command {
        name: name.to_string(),
        params: values
            .iter()
            .map(|v| v.unwrap_or(0).clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            .collect(),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSymbol {
    pub name: String,
    pub body: String,
}

/// Splits the part of a cell after `;` into its free-text type token and the
/// `<name>{...}` expressions it contains.
pub fn split_symbols(rest: &str) -> Result<(String, Vec<RawSymbol>), &'static str> {
    let mut free = String::with_capacity(rest.len());
    let mut symbols = Vec::new();
    let mut chars = rest.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let name_start = free
                    .char_indices()
                    .rev()
                    .take_while(|(_, ch)| ch.is_ascii_alphanumeric() || *ch == '_')
                    .last()
                    .map(|(i, _)| i);
                let Some(name_start) = name_start else {
                    return Err("structural symbol without a name");
                };
                let mut name: String = free.split_off(name_start);
                // A registered name glued to the type letter (`tloop{2}`).
                if SymbolKind::lookup(&name) == SymbolKind::Command
                    && let Some((reg, _)) = REGISTRY.iter().find(|(reg, _)| {
                        name.len() == reg.len() + 1
                            && name.to_ascii_lowercase().ends_with(reg)
                            && name.chars().next().and_then(NoteType::from_letter).is_some()
                    })
                {
                    let split = name.len() - reg.len();
                    free.push_str(&name[..split]);
                    name = name[split..].to_string();
                }

                let mut body = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    match ch {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err("nested '{' in structural symbol"),
                        _ => body.push(ch),
                    }
                }
                if !closed {
                    return Err("unterminated '{' in structural symbol");
                }
                symbols.push(RawSymbol { name, body });
                free.push(' ');
            }
            '}' => return Err("unmatched '}' in cell"),
            _ => free.push(c),
        }
    }

    let token: String = free.split_whitespace().collect::<Vec<_>>().join("");
    Ok((token, symbols))
}
