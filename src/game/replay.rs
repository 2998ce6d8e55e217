//! Input scripts for headless runs.
//!
//! A replay is plain text, one edge per line: `<time> <key> down|up`, with
//! `#` starting a comment. Autoplay builds the perfect script for a chart
//! from the unrolled visit plan.

use std::path::Path;

use log::{debug, warn};

use crate::core::input::{InputEdge, Key, Keymap};
use crate::game::chart::ChartData;
use crate::game::note::NoteType;
use crate::game::timing::{plan_all_visits, sanitize_speed};

/// How long autoplay keeps a tap key down.
pub const AUTOPLAY_TAP_HOLD_S: f64 = 0.03;
/// Spacing between the presses that clear the layers of one multi note.
pub const AUTOPLAY_LAYER_STEP_S: f64 = 0.005;

fn parse_line(line: &str) -> Result<InputEdge, &'static str> {
    let mut parts = line.split_whitespace();
    let time = parts
        .next()
        .ok_or("missing time")?
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or("invalid time")?;
    let key = Key::from_name(parts.next().ok_or("missing key")?).ok_or("unknown key")?;
    let pressed = match parts.next().ok_or("missing direction")? {
        d if d.eq_ignore_ascii_case("down") => true,
        d if d.eq_ignore_ascii_case("up") => false,
        _ => return Err("direction must be 'down' or 'up'"),
    };
    if parts.next().is_some() {
        return Err("trailing fields");
    }
    Ok(InputEdge { key, pressed, time })
}

/// Parses a replay script. Bad lines are logged and skipped.
pub fn parse_replay(text: &str) -> Vec<InputEdge> {
    let mut edges = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.split_once('#').map_or(raw, |(before, _)| before).trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(edge) => edges.push(edge),
            Err(e) => warn!("replay line {}: {e}: '{}'", i + 1, raw.trim()),
        }
    }
    edges.sort_by(|a, b| a.time.total_cmp(&b.time));
    edges
}

pub fn load_replay_file<P: AsRef<Path>>(path: P) -> Result<Vec<InputEdge>, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_replay(&text))
}

struct KeyRotation<'a> {
    keys: &'a [Key],
    busy_until: Vec<f64>,
    next: usize,
}

impl<'a> KeyRotation<'a> {
    fn new(keys: &'a [Key]) -> Self {
        Self {
            keys,
            busy_until: vec![f64::NEG_INFINITY; keys.len()],
            next: 0,
        }
    }

    // First key from the rotation point that is up by `at`.
    fn take(&mut self, at: f64, until: f64) -> Option<Key> {
        let n = self.keys.len();
        let slot = (0..n)
            .map(|i| (self.next + i) % n)
            .find(|&i| self.busy_until[i] <= at)?;
        self.busy_until[slot] = until;
        self.next = (slot + 1) % n;
        Some(self.keys[slot])
    }
}

/// Edges that hit every judgable note dead on, following control flow.
pub fn autoplay_edges(chart: &ChartData, speed: f64, start_time: f64, keymap: &Keymap) -> Vec<InputEdge> {
    let speed = sanitize_speed(speed);
    let mut keys = KeyRotation::new(keymap.judge_keys());
    let mut edges = Vec::new();
    let mut skipped = 0_usize;
    let mut press = |down: f64, up: f64| match keys.take(down, up) {
        Some(k) => {
            edges.push(InputEdge::down(k, down));
            edges.push(InputEdge::up(k, up));
        }
        None => skipped += 1,
    };

    for visit in plan_all_visits(chart, speed, start_time) {
        for (_, note) in chart.notes_in_row(visit.row) {
            let t = visit.start_time + note.position / speed;
            match &note.note_type {
                NoteType::Hold => press(t, t + note.length / speed),
                NoteType::Multi if !note.layers.is_empty() => {
                    for i in 0..note.layers.len() {
                        let at = t + AUTOPLAY_LAYER_STEP_S * i as f64;
                        press(at, at + AUTOPLAY_TAP_HOLD_S);
                    }
                }
                ty if ty.is_judgable() => press(t, t + AUTOPLAY_TAP_HOLD_S),
                _ => {}
            }
        }
    }
    if skipped > 0 {
        warn!("autoplay ran out of free keys for {skipped} presses");
    }
    // Ups first at equal times so a key can be reused immediately.
    edges.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pressed.cmp(&b.pressed)));
    debug!("autoplay script: {} edges", edges.len());
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::parsing::parse_chart;

    #[test]
    fn replay_lines_with_comments_and_garbage() {
        let text = "\
# warmup
0.50 KeyF down
0.25 d down   # out of order
0.30 d up
oops
0.60 KeyF sideways
0.70 KeyF up extra
";
        let edges = parse_replay(text);
        assert_eq!(
            edges,
            vec![
                InputEdge::down(Key('d'), 0.25),
                InputEdge::up(Key('d'), 0.30),
                InputEdge::down(Key('f'), 0.50),
            ],
            "bad lines are dropped and the rest sorted"
        );
    }

    #[test]
    fn autoplay_follows_loops_and_rotates_keys() {
        let chart = parse_chart("# Main\n-1:\n0:[1;t loop{2}]\n-2:\ntab:1\n0:[t]\n-3:\n0:[4;h]\n");
        let edges = autoplay_edges(&chart, 4.0, 0.0, &Keymap::default());
        let downs: Vec<&InputEdge> = edges.iter().filter(|e| e.pressed).collect();
        assert_eq!(downs.len(), 4, "loop body pressed on both passes: {edges:?}");
        let times: Vec<f64> = downs.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(downs[0].key, Key('d'));
        assert_eq!(downs[1].key, Key('f'));

        let hold_up = edges
            .iter()
            .find(|e| !e.pressed && e.key == downs[3].key && e.time > 0.75)
            .map(|e| e.time);
        assert_eq!(hold_up, Some(1.75), "hold released at its end");
    }

    #[test]
    fn multi_layers_use_distinct_keys() {
        let chart = parse_chart("# Main\n-1:\n0:[1;m(t,t,t)]\n");
        let edges = autoplay_edges(&chart, 4.0, 0.0, &Keymap::default());
        let mut keys: Vec<Key> = edges.iter().filter(|e| e.pressed).map(|e| e.key).collect();
        assert_eq!(keys.len(), 3);
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn equal_times_put_releases_first() {
        let chart = parse_chart("# Main\n-1:\n0:[1;h]\n-2:\n0:[t]\n");
        let mut one_key = Keymap::default();
        one_key.bind_judge(&[Key('d')]);
        let edges = autoplay_edges(&chart, 4.0, 0.0, &one_key);
        assert_eq!(edges.len(), 4);
        assert!(!edges[1].pressed && edges[2].pressed, "{edges:?}");
        assert_eq!(edges[1].time, edges[2].time);
    }
}
