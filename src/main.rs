use chartflow::config::{self, CONFIG_PATH};
use chartflow::game::gameplay::{self, NoteReport, StageSummary, UpdateStatus};
use chartflow::game::parsing::load_chart_file;
use chartflow::game::replay;
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

// Upper bound on simulated playback, for charts that never halt.
const MAX_RUN_SECONDS: f64 = 3600.0;

#[derive(Parser, Debug)]
#[command(name = "chartflow")]
#[command(version)]
#[command(about = "Plays a chart headlessly and prints the stage summary as JSON", long_about = None)]
struct Args {
    /// Chart file
    chart: PathBuf,

    /// Replay script with `<time> <key> down|up` lines
    #[arg(long, conflicts_with = "autoplay")]
    replay: Option<PathBuf>,

    /// Hit every note dead on
    #[arg(long)]
    autoplay: bool,

    /// INI config, created with defaults when missing
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Include per-note results in the output
    #[arg(long)]
    notes: bool,
}

#[derive(Serialize)]
struct RunOutput {
    summary: StageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<Vec<NoteReport>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    let args = Args::parse();
    let cfg = config::load(&args.config);
    log::set_max_level(cfg.log_level.as_level_filter());

    let chart = load_chart_file(&args.chart)?;
    let settings = cfg.playback().with_chart_overrides(&chart);
    let edges = match &args.replay {
        Some(path) => replay::load_replay_file(path)?,
        None if args.autoplay => {
            replay::autoplay_edges(&chart, settings.speed, settings.start_offset_s, &settings.keymap)
        }
        None => Vec::new(),
    };

    let mut state = gameplay::init(chart, &settings);
    for edge in edges {
        gameplay::queue_input_edge(&mut state, edge);
    }

    let dt = 1.0 / f64::from(cfg.tick_rate);
    loop {
        let status = gameplay::update(&mut state, dt);
        state.take_judgments();
        state.take_events();
        if status == UpdateStatus::Finished {
            break;
        }
        if state.cursor().cursor_time() > MAX_RUN_SECONDS {
            warn!("stopping after {MAX_RUN_SECONDS}s of playback without reaching the end");
            break;
        }
    }

    let summary = gameplay::summary(&state);
    info!(
        "Finished at {:.3}s: {} judged, max combo {}, {} errors",
        summary.end_time, summary.score.total_judged, summary.score.max_combo, summary.score.errors
    );
    let output = RunOutput {
        summary,
        notes: args.notes.then(|| gameplay::note_reports(&state)),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
