//! recplay command-line entry point.

use clap::{Args, Parser, Subcommand};
use rp_common::{CommandEnvelope, Error, PlaybackRequest, PlayerState};
use rp_config::{
    config_schema, get_preset, list_presets, resolve_config, validate, ConfigPaths, ConfigSnapshot,
    ConfigSource, PlayerConfig, PresetName, SharedConfig,
};
use rp_core::logging::{init_logging, LogFormat};
use rp_core::publish::{JsonLinesStatusSink, LogBus, LogStatusSink, StatusSink};
use rp_core::reader::{ReaderRegistry, ReaderSynchronizer};
use rp_core::{ExitCode, Player, PlayerContext};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "recplay", version, about = "Replay automotive recordings onto a bus")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Start from a named preset instead of a config file
    #[arg(long, global = true, conflicts_with = "config")]
    preset: Option<String>,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a recording, play it and exit
    Play(PlayArgs),
    /// Read JSON commands from stdin and write status events to stdout
    Serve,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print time range and descriptions of recording files
    Info {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the JSON Schema of a wire message
    Schema {
        #[command(subcommand)]
        target: SchemaTarget,
    },
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Recording files; falls back to playback.recording_paths
    paths: Vec<PathBuf>,

    /// Number of steps before stopping
    #[arg(long)]
    steps: Option<u64>,

    /// Stop once this timestamp (µs) has been delivered
    #[arg(long)]
    until: Option<u64>,

    /// Pacing target for this run; 0 disables pacing
    #[arg(long, value_parser = parse_speed)]
    speed: Option<f32>,

    /// Also write status events to stdout as JSON lines
    #[arg(long)]
    events: bool,
}

fn parse_speed(value: &str) -> Result<f32, String> {
    let speed: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if speed.is_finite() {
        Ok(speed)
    } else {
        Err("speed must be a finite number".to_string())
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the resolved configuration and where it came from
    Show,
    /// Validate the resolved configuration
    Validate,
    /// Print the configuration JSON Schema
    Schema,
    /// List built-in presets
    Presets,
}

#[derive(Subcommand, Debug)]
enum SchemaTarget {
    Command,
    Status,
}

#[derive(Serialize)]
struct PlaySummary {
    state: PlayerState,
    stop_reason: Option<rp_core::StopReason>,
    current_timestamp: u64,
    counters: rp_common::ReplayCounters,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global.log_format, &cli.global.log_level);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!(code = err.code(), error = %err, "recplay failed");
            ExitCode::from_error(&err)
        }
    };
    code.into()
}

fn run(cli: &Cli) -> rp_common::Result<ExitCode> {
    match &cli.command {
        Commands::Play(args) => run_play(&cli.global, args),
        Commands::Serve => run_serve(&cli.global),
        Commands::Config { command } => run_config(&cli.global, command),
        Commands::Info { paths } => run_info(&cli.global, paths),
        Commands::Schema { target } => {
            print_json(&match target {
                SchemaTarget::Command => rp_common::schema::command_schema(),
                SchemaTarget::Status => rp_common::schema::status_schema(),
            })?;
            Ok(ExitCode::Clean)
        }
    }
}

fn load_config(global: &GlobalOpts) -> rp_common::Result<(PlayerConfig, ConfigSource)> {
    if let Some(name) = &global.preset {
        let preset: PresetName = name.parse().map_err(|e| Error::Config(format!("{e}")))?;
        return Ok((get_preset(preset), ConfigSource::Defaults));
    }
    let resolved = resolve_config(&ConfigPaths::discover(global.config.clone()))?;
    Ok((resolved.config, resolved.source))
}

/// Load and reject configurations with validation errors.
fn load_valid_config(global: &GlobalOpts) -> rp_common::Result<(PlayerConfig, ConfigSource)> {
    let (config, source) = load_config(global)?;
    let result = validate(&config);
    for warning in &result.warnings {
        warn!(%warning, "config warning");
    }
    if let Some(first) = result.errors.first() {
        return Err(Error::InvalidConfig(first.to_string()));
    }
    debug!(%source, "configuration loaded");
    Ok((config, source))
}

fn player_context(global: &GlobalOpts, sink: Arc<dyn StatusSink>) -> rp_common::Result<PlayerContext> {
    let (config, source) = load_valid_config(global)?;
    let snapshot = ConfigSnapshot::capture(&config, source);
    Ok(PlayerContext::new(Arc::new(SharedConfig::new(config)))
        .with_bus(Arc::new(LogBus))
        .with_status_sink(sink)
        .with_snapshot(snapshot))
}

fn run_play(global: &GlobalOpts, args: &PlayArgs) -> rp_common::Result<ExitCode> {
    let sink: Arc<dyn StatusSink> = if args.events {
        Arc::new(JsonLinesStatusSink::new(std::io::stdout()))
    } else {
        Arc::new(LogStatusSink)
    };
    let mut player = Player::spawn(player_context(global, sink)?)?;

    if player.open(args.paths.clone())? != PlayerState::Ready {
        // Let the error state settle back to New before reading the cause.
        player.wait_until_settled(Duration::from_secs(5));
        let code = player
            .last_error()
            .map(|(code, _)| code)
            .unwrap_or_else(|| Error::NoFiles.code());
        player.shutdown()?;
        return Ok(ExitCode::from_error_code(code));
    }

    player.execute(PlaybackRequest::StepForward {
        steps: args.steps,
        until_timestamp: args.until,
        speed_factor: args.speed,
    })?;
    let state = loop {
        if let Some(state) = player.wait_until_settled(Duration::from_secs(1)) {
            break state;
        }
    };

    let summary = PlaySummary {
        state,
        stop_reason: player.last_stop(),
        current_timestamp: player.status().current_timestamp,
        counters: player.counters(),
    };
    info!(
        state = %summary.state,
        published = summary.counters.published_packages,
        failures = summary.counters.publish_failures,
        "playback finished"
    );
    print_json(&summary)?;

    player.close()?;
    player.shutdown()?;
    Ok(match (state, summary.stop_reason) {
        (PlayerState::Ready, Some(reason)) => ExitCode::from_stop(reason),
        _ => player
            .last_error()
            .map(|(code, _)| ExitCode::from_error_code(code))
            .unwrap_or(ExitCode::PlaybackError),
    })
}

fn run_serve(global: &GlobalOpts) -> rp_common::Result<ExitCode> {
    let sink = Arc::new(JsonLinesStatusSink::new(std::io::stdout()));
    let mut player = Player::spawn(player_context(global, sink)?)?;
    info!("serving commands on stdin");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match CommandEnvelope::parse(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "ignoring malformed command");
                continue;
            }
        };
        let shutdown = matches!(envelope.request, PlaybackRequest::Shutdown);
        let state = player.execute(envelope.request)?;
        debug!(id = envelope.id, %state, "command handled");
        if shutdown {
            break;
        }
    }

    player.shutdown()?;
    Ok(ExitCode::Clean)
}

fn run_config(global: &GlobalOpts, command: &ConfigCommand) -> rp_common::Result<ExitCode> {
    match command {
        ConfigCommand::Show => {
            let (config, source) = load_config(global)?;
            print_json(&ConfigSnapshot::capture(&config, source))?;
            Ok(ExitCode::Clean)
        }
        ConfigCommand::Validate => {
            let (config, _) = load_config(global)?;
            let result = validate(&config);
            print_json(&result)?;
            Ok(if result.is_ok() {
                ExitCode::Clean
            } else {
                ExitCode::ConfigError
            })
        }
        ConfigCommand::Schema => {
            print_json(&config_schema())?;
            Ok(ExitCode::Clean)
        }
        ConfigCommand::Presets => {
            print_json(&list_presets())?;
            Ok(ExitCode::Clean)
        }
    }
}

#[derive(Serialize)]
struct RecordingInfo {
    files: Vec<PathBuf>,
    stats: rp_common::FileStats,
    duration_us: u64,
    data_descriptions: Vec<rp_common::DataDescription>,
    cycle_descriptions: Vec<rp_common::CycleDescription>,
}

fn run_info(global: &GlobalOpts, paths: &[PathBuf]) -> rp_common::Result<ExitCode> {
    let (config, _) = load_valid_config(global)?;
    let mut sync = ReaderSynchronizer::new(
        Arc::new(config),
        Arc::new(ReaderRegistry::with_builtin()),
    );
    sync.open(paths)?;
    let stats = sync.file_stats();
    print_json(&RecordingInfo {
        files: sync.paths(),
        stats,
        duration_us: stats.duration(),
        data_descriptions: sync.data_descriptions(),
        cycle_descriptions: sync.cycle_descriptions(),
    })?;
    Ok(ExitCode::Clean)
}

fn print_json<T: Serialize>(value: &T) -> rp_common::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
