use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pulse_engine::TrackerSettings;
use pulse_logging::{LevelFilter, LogDestination};

#[derive(Debug, Parser)]
#[command(name = "jobpulse", version, about = "Follow a server-side job until it finishes")]
pub struct Cli {
    /// RON settings file. Defaults to ./jobpulse.ron when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the HTTP API (status, submit and retry endpoints).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// WebSocket URL of the push channel.
    #[arg(long, global = true)]
    pub push_url: Option<String>,

    /// Give up on the job after this many seconds.
    #[arg(long, global = true)]
    pub max_duration_secs: Option<u64>,

    #[arg(long, global = true, value_enum, default_value_t = LogTarget::File)]
    pub log: LogTarget,

    #[arg(long, global = true, default_value = "jobpulse.log")]
    pub log_file: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Track a video analysis through its steps (polled).
    Analysis(AnalysisArgs),
    /// Track a content fetch for one entity (pushed).
    Fetch(FetchArgs),
    /// Print the default settings as RON.
    DefaultConfig,
}

#[derive(Debug, Args)]
pub struct AnalysisArgs {
    /// Id of an analysis that is already running.
    #[arg(long, required_unless_present = "submit", conflicts_with = "submit")]
    pub job: Option<String>,

    /// Start a new analysis of this URL, then track it.
    #[arg(long)]
    pub submit: Option<String>,

    /// Extra submission field, as KEY=VALUE. Repeatable.
    #[arg(long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// Status poll interval in milliseconds.
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Entity whose fetch is already running.
    #[arg(long, required_unless_present = "submit", conflicts_with = "submit")]
    pub entity: Option<String>,

    /// Start a new fetch for this profile URL, then track it.
    #[arg(long)]
    pub submit: Option<String>,

    /// Extra submission field, as KEY=VALUE. Repeatable.
    #[arg(long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

impl Cli {
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    /// Command-line values win over the settings file.
    pub fn apply_overrides(&self, settings: &mut TrackerSettings) {
        if let Some(server) = &self.server {
            settings.poll.base_url = server.clone();
            settings.submit.base_url = server.clone();
        }
        if let Some(url) = &self.push_url {
            settings.push.url = url.clone();
        }
        if let Some(secs) = self.max_duration_secs {
            settings.max_duration_ms = Some(secs.saturating_mul(1_000));
        }
        if let Command::Analysis(AnalysisArgs {
            interval_ms: Some(interval),
            ..
        }) = &self.command
        {
            settings.poll.interval_ms = *interval;
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
