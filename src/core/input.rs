use log::warn;
use rustc_hash::FxHashSet;
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// Physical key identity, stored as its lowercase character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Key(pub char);

impl From<char> for Key {
    #[inline(always)]
    fn from(c: char) -> Self {
        Self(c.to_ascii_lowercase())
    }
}

impl Key {
    /// Accepts `KeyD`, `Digit4`, `Space` or a bare character.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("space") {
            return Some(Self(' '));
        }
        let single = |s: &str| {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        };
        if let Some(rest) = name.strip_prefix("Key")
            && let Some(c) = single(rest).filter(char::is_ascii_alphabetic)
        {
            return Some(Self::from(c));
        }
        if let Some(rest) = name.strip_prefix("Digit")
            && let Some(c) = single(rest).filter(char::is_ascii_digit)
        {
            return Some(Self(c));
        }
        single(name).filter(|c| !c.is_whitespace()).map(Self::from)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ' ' => f.write_str("Space"),
            c if c.is_ascii_alphabetic() => write!(f, "Key{}", c.to_ascii_uppercase()),
            c if c.is_ascii_digit() => write!(f, "Digit{c}"),
            c => write!(f, "{c}"),
        }
    }
}

/// A key press or release. A key counts as held from its down edge to its
/// up edge, as tracked by [`KeyStates`]; there is no separate held event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputEdge {
    pub key: Key,
    pub pressed: bool,
    /// Cursor time the edge belongs to, in seconds.
    pub time: f64,
}

impl InputEdge {
    #[inline(always)]
    pub const fn down(key: Key, time: f64) -> Self {
        Self { key, pressed: true, time }
    }

    #[inline(always)]
    pub const fn up(key: Key, time: f64) -> Self {
        Self { key, pressed: false, time }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keymap {
    judge: SmallVec<[Key; 8]>,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            judge: ['d', 'f', 'j', 'k'].into_iter().map(Key::from).collect(),
        }
    }
}

impl Keymap {
    #[inline(always)]
    pub fn bind_judge(&mut self, keys: &[Key]) {
        self.judge = keys.iter().copied().collect();
    }

    #[inline(always)]
    pub fn judge_keys(&self) -> &[Key] {
        &self.judge
    }

    #[inline(always)]
    pub fn is_judge_key(&self, key: Key) -> bool {
        self.judge.contains(&key)
    }

    /// `KeyD,KeyF,Space`. Unknown names are skipped with a warning; an empty
    /// result is `None` so callers keep their current bindings.
    pub fn parse_binding_list(value: &str) -> Option<SmallVec<[Key; 8]>> {
        let mut keys: SmallVec<[Key; 8]> = SmallVec::new();
        for tok in value.split(',') {
            let tok = tok.trim();
            if tok.is_empty() {
                continue;
            }
            match Key::from_name(tok) {
                Some(k) if !keys.contains(&k) => keys.push(k),
                Some(_) => {}
                None => warn!("unknown key binding '{tok}' ignored"),
            }
        }
        (!keys.is_empty()).then_some(keys)
    }

    pub fn to_ini_value(&self) -> String {
        self.judge
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Held-key tracking. Drops repeated downs (key repeat) and ups for keys that
/// are not down, so later stages only see real transitions.
#[derive(Clone, Debug, Default)]
pub struct KeyStates {
    down: FxHashSet<Key>,
}

impl KeyStates {
    pub fn apply(&mut self, edge: &InputEdge) -> bool {
        if edge.pressed {
            self.down.insert(edge.key)
        } else {
            self.down.remove(&edge.key)
        }
    }

    #[inline(always)]
    pub fn is_down(&self, key: Key) -> bool {
        self.down.contains(&key)
    }

    #[inline(always)]
    pub fn held_count(&self) -> usize {
        self.down.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_round_trip() {
        for name in ["KeyD", "Digit7", "Space", ";"] {
            let key = Key::from_name(name).expect("known key name");
            assert_eq!(key.to_string(), name);
        }
        assert_eq!(Key::from_name("d"), Some(Key('d')));
        assert_eq!(Key::from_name("KeyDD"), None);
        assert_eq!(Key::from_name(""), None);
    }

    #[test]
    fn binding_list_skips_unknown_and_duplicates() {
        let keys = Keymap::parse_binding_list("KeyA, Bogus,KeyA,Digit1").expect("two keys");
        assert_eq!(keys.as_slice(), &[Key('a'), Key('1')]);
        assert_eq!(Keymap::parse_binding_list("Bogus"), None);
        assert_eq!(Keymap::default().to_ini_value(), "KeyD,KeyF,KeyJ,KeyK");
    }

    #[test]
    fn key_repeat_is_filtered() {
        let mut states = KeyStates::default();
        let k = Key('j');
        assert!(states.apply(&InputEdge::down(k, 0.0)));
        assert!(!states.apply(&InputEdge::down(k, 0.1)), "repeat while held");
        assert!(states.is_down(k));
        assert!(states.apply(&InputEdge::up(k, 0.2)));
        assert!(!states.apply(&InputEdge::up(k, 0.3)));
        assert_eq!(states.held_count(), 0);
    }
}
