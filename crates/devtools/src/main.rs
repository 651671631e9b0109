use clap::Parser;
use tracing_subscriber::EnvFilter;

use odd_devtools::cli::{Cli, Command, ConfigCommand, SimulateArgs};
use odd_domain::config::ObservabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to a single-tab simulation when no subcommand is given.
        None => {
            let (config, _) = odd_devtools::cli::load_config()?;
            init_tracing(&config.observability);
            odd_devtools::cli::simulate::run(config, SimulateArgs::default()).await
        }
        Some(Command::Simulate(args)) => {
            let (config, _) = odd_devtools::cli::load_config()?;
            init_tracing(&config.observability);
            odd_devtools::cli::simulate::run(config, args).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_cli_tracing();
            let (config, config_path) = odd_devtools::cli::load_config()?;
            if !odd_devtools::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            init_cli_tracing();
            let (config, _) = odd_devtools::cli::load_config()?;
            print!("{}", odd_devtools::cli::config::render(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("odd-devtools {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing to stderr: JSON or compact per config, filtered by
/// `RUST_LOG` when set.
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if obs.is_json() {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Quiet tracing for one-shot config commands so stdout stays clean.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
