use crate::core::input::Keymap;
use crate::game::gameplay::PlaybackSettings;
use crate::game::timing::DEFAULT_SPEED;
use crate::game::timing_windows::TimingProfile;
use log::{LevelFilter, info, warn};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_PATH: &str = "chartflow.ini";

// --- Minimal INI reader ---
#[derive(Debug, Default)]
pub struct SimpleIni {
    sections: FxHashMap<String, FxHashMap<String, String>>,
}

impl SimpleIni {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        self.load_str(&content);
        Ok(())
    }

    pub fn load_str(&mut self, content: &str) {
        self.sections.clear();
        let mut current_section: Option<String> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            // Section header: [SectionName]
            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let section = line[1..line.len() - 1].trim().to_string();
                current_section = Some(section.clone());
                self.sections.entry(section).or_default();
                continue;
            }

            // Key/value pair: key=value
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                let section = current_section.clone().unwrap_or_default();
                self.sections
                    .entry(section)
                    .or_default()
                    .insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section).and_then(|s| s.get(key)).cloned()
    }

    pub fn get_section(&self, section: &str) -> Option<&FxHashMap<String, String>> {
        self.sections.get(section)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub speed: f64,
    pub start_offset_s: f64,
    pub tick_rate: u32,
    pub timing: TimingProfile,
    pub keymap: Keymap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            speed: DEFAULT_SPEED,
            start_offset_s: 0.0,
            tick_rate: 240,
            timing: TimingProfile::default(),
            keymap: Keymap::default(),
        }
    }
}

fn seconds(conf: &SimpleIni, key: &str, default: f64) -> f64 {
    conf.get("Timing", key)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(default)
}

impl Config {
    /// Builds a config from parsed INI data; missing or malformed keys keep
    /// their defaults.
    pub fn from_ini(conf: &SimpleIni) -> Self {
        let default = Self::default();
        let dt = default.timing;

        let log_level = conf
            .get("Options", "LogLevel")
            .and_then(|v| LogLevel::from_str(&v).ok())
            .unwrap_or(default.log_level);
        let speed = conf
            .get("Playback", "Speed")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(default.speed);
        let start_offset_s = conf
            .get("Playback", "StartOffsetSeconds")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(default.start_offset_s);
        let tick_rate = conf
            .get("Playback", "TickRate")
            .and_then(|v| v.parse::<u32>().ok())
            .map_or(default.tick_rate, |v| v.clamp(1, 10_000));

        let timing = TimingProfile {
            enter_s: seconds(conf, "EnterWindowSeconds", dt.enter_s),
            exit_s: seconds(conf, "ExitWindowSeconds", dt.exit_s),
            patched_s: seconds(conf, "PatchedWindowSeconds", dt.patched_s),
            fixed_s: seconds(conf, "FixedWindowSeconds", dt.fixed_s),
            hold_grace_s: seconds(conf, "HoldGraceSeconds", dt.hold_grace_s),
            hold_early_release_s: seconds(conf, "HoldEarlyReleaseSeconds", dt.hold_early_release_s),
            error_cooldown_s: seconds(conf, "ErrorCooldownSeconds", dt.error_cooldown_s),
        };
        let clamped = timing.clamped();
        if clamped != timing {
            warn!("[Timing] windows out of order, clamped to {:?} ms", clamped.windows_ms());
        }

        let mut keymap = default.keymap;
        if let Some(value) = conf.get("Keymaps", "Judge") {
            match Keymap::parse_binding_list(&value) {
                Some(keys) => keymap.bind_judge(&keys),
                None => warn!("[Keymaps] Judge has no usable keys, keeping {}", keymap.to_ini_value()),
            }
        }

        Self {
            log_level,
            speed,
            start_offset_s,
            tick_rate,
            timing: clamped,
            keymap,
        }
    }

    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            speed: self.speed,
            start_offset_s: self.start_offset_s,
            profile: self.timing,
            keymap: self.keymap.clone(),
        }
    }

    fn to_ini_string(&self) -> String {
        let t = &self.timing;
        let mut content = String::new();

        content.push_str("[Options]\n");
        content.push_str(&format!("LogLevel={}\n", self.log_level.as_str()));
        content.push('\n');

        content.push_str("[Playback]\n");
        content.push_str(&format!("Speed={}\n", self.speed));
        content.push_str(&format!("StartOffsetSeconds={}\n", self.start_offset_s));
        content.push_str(&format!("TickRate={}\n", self.tick_rate));
        content.push('\n');

        // [Timing] section - keys in alphabetical order
        content.push_str("[Timing]\n");
        content.push_str(&format!("EnterWindowSeconds={}\n", t.enter_s));
        content.push_str(&format!("ErrorCooldownSeconds={}\n", t.error_cooldown_s));
        content.push_str(&format!("ExitWindowSeconds={}\n", t.exit_s));
        content.push_str(&format!("FixedWindowSeconds={}\n", t.fixed_s));
        content.push_str(&format!("HoldEarlyReleaseSeconds={}\n", t.hold_early_release_s));
        content.push_str(&format!("HoldGraceSeconds={}\n", t.hold_grace_s));
        content.push_str(&format!("PatchedWindowSeconds={}\n", t.patched_s));
        content.push('\n');

        content.push_str("[Keymaps]\n");
        content.push_str(&format!("Judge={}\n", self.keymap.to_ini_value()));
        content.push('\n');
        content
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<(), std::io::Error> {
    info!("'{}' not found, creating with default values.", path.as_ref().display());
    std::fs::write(path, Config::default().to_ini_string())
}

/// Reads `path`, writing a default file first if there is none. Any failure
/// falls back to defaults.
pub fn load<P: AsRef<Path>>(path: P) -> Config {
    let path = path.as_ref();
    if !path.exists()
        && let Err(e) = create_default_config_file(path)
    {
        warn!("Failed to create default config file: {e}");
    }

    let mut conf = SimpleIni::new();
    match conf.load(path) {
        Ok(()) => {
            let cfg = Config::from_ini(&conf);
            info!("Configuration loaded from '{}'.", path.display());
            cfg
        }
        Err(e) => {
            warn!("Failed to load '{}': {e}. Using default values.", path.display());
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::Key;

    fn ini(text: &str) -> SimpleIni {
        let mut conf = SimpleIni::new();
        conf.load_str(text);
        conf
    }

    #[test]
    fn sections_and_comments() {
        let conf = ini("; comment\ntop=1\n[Playback]\n Speed = 6 \n# another\n[Empty]\n");
        assert_eq!(conf.get("", "top").as_deref(), Some("1"));
        assert_eq!(conf.get("Playback", "Speed").as_deref(), Some("6"));
        assert!(conf.get_section("Empty").is_some_and(|s| s.is_empty()));
        assert_eq!(conf.get("Playback", "Missing"), None);
    }

    #[test]
    fn missing_and_malformed_keys_fall_back_per_key() {
        let cfg = Config::from_ini(&ini(
            "[Options]\nLogLevel=loud\n[Playback]\nSpeed=-2\nStartOffsetSeconds=0.5\nTickRate=abc\n",
        ));
        let d = Config::default();
        assert_eq!(cfg.log_level, d.log_level);
        assert_eq!(cfg.speed, d.speed, "non-positive speed rejected");
        assert_eq!(cfg.start_offset_s, 0.5);
        assert_eq!(cfg.tick_rate, d.tick_rate);
        assert_eq!(cfg.timing, d.timing);
    }

    #[test]
    fn timing_windows_are_clamped_into_order() {
        let cfg = Config::from_ini(&ini("[Timing]\nFixedWindowSeconds=0.08\nExitWindowSeconds=0.05\n"));
        let t = cfg.timing;
        assert!(t.fixed_s <= t.patched_s && t.patched_s <= t.exit_s && t.exit_s <= t.enter_s, "{t:?}");
        assert_eq!(t.fixed_s, 0.08);
    }

    #[test]
    fn keymap_and_log_level_are_read() {
        let cfg = Config::from_ini(&ini("[Options]\nLogLevel=debug\n[Keymaps]\nJudge=KeyA,Space\n"));
        assert_eq!(cfg.log_level.as_level_filter(), LevelFilter::Debug);
        assert_eq!(cfg.keymap.judge_keys(), &[Key('a'), Key(' ')]);
        assert_eq!(cfg.playback().keymap, cfg.keymap);
    }

    #[test]
    fn default_file_reads_back_as_defaults() {
        let text = Config::default().to_ini_string();
        assert_eq!(Config::from_ini(&ini(&text)), Config::default());
    }
}
