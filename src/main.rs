use anyhow::{Context, Result};
use clap::Parser;

use suture_sim::cli::commands::{ConfigCommand, RunCommand};
use suture_sim::cli::{Cli, Commands};
use suture_sim::{init_telemetry, SutureSimConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = SutureSimConfig::load_env_file() {
        eprintln!("Warning: failed to load .env file: {e}");
    }
    let config = SutureSimConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_telemetry(&config.observability.log_level, config.observability.json_logs)?;

    match cli.command {
        Commands::Run {
            sites,
            cooldown,
            sequential,
            time_limit,
            script,
            shuffle,
            realtime,
            json,
        } => {
            let command = RunCommand::new()
                .with_sites(sites)
                .with_cooldown(cooldown)
                .with_sequential(sequential)
                .with_time_limit(time_limit)
                .with_script(script)
                .with_shuffle(shuffle)
                .with_realtime(realtime)
                .with_json(json);
            tokio::runtime::Runtime::new()?.block_on(async { command.execute(&config).await })?;
            Ok(())
        }
        Commands::Config { write } => ConfigCommand::new(write).execute(&config),
    }
}
