mod cli;
mod config;
mod render;
mod run;

use clap::Parser;
use pulse_core::JobKind;

use cli::{Cli, Command};
use run::Start;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::DefaultConfig = cli.command {
        print!("{}", config::default_settings_ron()?);
        return Ok(());
    }

    pulse_logging::initialize(cli.log.into(), cli.level(), &cli.log_file);

    let mut settings = config::load_settings(cli.config.as_deref())?;
    cli.apply_overrides(&mut settings);
    settings.validate()?;

    match &cli.command {
        Command::Analysis(args) => {
            let start = Start::from_args(args.job.as_deref(), args.submit.as_deref(), &args.options)?;
            run::watch(JobKind::Analysis, start, &settings).await
        }
        Command::Fetch(args) => {
            let start =
                Start::from_args(args.entity.as_deref(), args.submit.as_deref(), &args.options)?;
            run::watch(JobKind::Fetch, start, &settings).await
        }
        Command::DefaultConfig => Ok(()),
    }
}
