use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use surface_gestures::config::{ConfigError, DeviceMetrics, GestureThresholds};
use surface_gestures::consts::{DEFAULT_PLATFORM_LONG_PRESS_MS, DEFAULT_TOUCH_SLOP_DP};
use surface_gestures::engine::GestureEngine;
use surface_gestures::geometry::Extent;
use surface_gestures::input::PointerSample;
use surface_gestures::replay::{ReplayError, ReplayScript};
use surface_gestures::trace::DebugTrace;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("line {line}: {source}")]
    Event { line: usize, source: serde_json::Error },
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "gesture-cli", about = "Replay pointer streams through the surface gesture engine")]
struct Cli {
    /// Physical pixels per dp.
    #[arg(long, env = "GESTURE_DENSITY", default_value_t = 1.0)]
    density: f64,

    /// Platform touch slop in pixels; defaults to 8 dp at `--density`.
    #[arg(long, env = "GESTURE_TOUCH_SLOP_PX")]
    touch_slop_px: Option<f64>,

    /// Platform long-press timeout; the engine never goes below 650 ms.
    #[arg(long, env = "GESTURE_LONG_PRESS_MS", default_value_t = DEFAULT_PLATFORM_LONG_PRESS_MS)]
    long_press_ms: u64,

    /// Log handler decisions to stderr.
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the thresholds derived from the device flags.
    Thresholds,
    /// Run a JSON replay script and print the report.
    Replay(ReplayArgs),
    /// Feed JSONL pointer events (one JSON array of samples per line) and
    /// print each resulting action as it happens.
    Stream(StreamArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Script path, or `-` for stdin.
    input: String,

    /// Do not confirm committed placements back to the engine.
    #[arg(long)]
    no_confirm: bool,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Event path, or `-` for stdin.
    #[arg(default_value = "-")]
    input: String,

    #[arg(long, default_value_t = 1080.0)]
    max_x: f64,

    #[arg(long, default_value_t = 2340.0)]
    max_y: f64,

    /// Start in edit mode.
    #[arg(long)]
    edit_mode: bool,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    let slop = cli.touch_slop_px.unwrap_or(DEFAULT_TOUCH_SLOP_DP * cli.density);
    let metrics = DeviceMetrics::new(cli.density, slop, cli.long_press_ms)?;
    let thresholds = GestureThresholds::from_metrics(&metrics);
    tracing::debug!(?thresholds, "thresholds derived");

    match cli.command {
        Command::Thresholds => print_json(&serde_json::to_value(thresholds)?),
        Command::Replay(args) => run_replay(thresholds, cli.trace, args),
        Command::Stream(args) => run_stream(thresholds, cli.trace, args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_writer(io::stderr).init();
}

fn trace_for(enabled: bool, surface: &str) -> DebugTrace {
    if enabled { DebugTrace::enabled(surface) } else { DebugTrace::disabled() }
}

fn open_input(path: &str) -> Result<Box<dyn BufRead>, CliError> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).map_err(|source| CliError::Io { path: path.to_owned(), source })?;
    Ok(Box::new(BufReader::new(file)))
}

fn run_replay(thresholds: GestureThresholds, trace: bool, args: ReplayArgs) -> Result<(), CliError> {
    let mut raw = String::new();
    open_input(&args.input)?
        .read_to_string(&mut raw)
        .map_err(|source| CliError::Io { path: args.input.clone(), source })?;

    let mut script = ReplayScript::from_json(&raw)?;
    if args.no_confirm {
        script.confirm_updates = false;
    }
    let engine = script.engine(thresholds).with_trace(trace_for(trace, &args.input));
    let report = script.run_on(engine);
    if report.illegal_transitions > 0 {
        tracing::warn!(count = report.illegal_transitions, "replay hit illegal state transitions");
    }
    print_json(&serde_json::to_value(&report)?)
}

fn run_stream(thresholds: GestureThresholds, trace: bool, args: StreamArgs) -> Result<(), CliError> {
    let mut engine = GestureEngine::new(thresholds).with_trace(trace_for(trace, "stream"));
    engine.set_extent(Extent::new(args.max_x, args.max_y));
    if args.edit_mode {
        engine.enter_edit_mode();
    }

    let mut reader = open_input(&args.input)?;
    let mut line = String::new();
    let mut number = 0_usize;
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|source| CliError::Io { path: args.input.clone(), source })?;
        if bytes == 0 {
            break;
        }
        number = number.saturating_add(1);
        let Some(samples) = parse_event_line(&line).map_err(|source| CliError::Event { line: number, source })?
        else {
            continue;
        };
        for action in engine.on_pointer_event(&samples) {
            println!("{}", serde_json::to_string(&action)?);
        }
    }

    engine.dispose();
    eprintln!(
        "stream complete: events={number} edit_mode={} state={}",
        engine.is_edit_mode(),
        engine.gesture_state().name()
    );
    Ok(())
}

/// One event per line; blank lines and `#` comments are skipped.
fn parse_event_line(line: &str) -> Result<Option<Vec<PointerSample>>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert!(parse_event_line("   \n").unwrap().is_none());
        assert!(parse_event_line("# header").unwrap().is_none());
    }

    #[test]
    fn event_line_parses_samples() {
        let line = r#"[{"id":1,"position":{"x":1.0,"y":2.0},"pressed":true,"timestamp_ms":5}]"#;
        let samples = parse_event_line(line).unwrap().unwrap();
        assert_eq!(samples, vec![PointerSample::down(1, 1.0, 2.0, 5)]);
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(parse_event_line("[{").is_err());
    }

    #[test]
    fn cli_parses_replay_with_flags() {
        let cli = Cli::try_parse_from(["gesture-cli", "--density", "2.5", "--trace", "replay", "-", "--no-confirm"])
            .unwrap();
        assert_eq!(cli.density, 2.5);
        assert!(cli.trace);
        assert!(matches!(cli.command, Command::Replay(ReplayArgs { no_confirm: true, .. })));
    }
}
