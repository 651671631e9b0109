pub mod config;
pub mod simulate;

use clap::{Args, Parser, Subcommand};

/// odd-devtools: relay between a devtools panel and an instrumented page.
#[derive(Debug, Parser)]
#[command(name = "odd-devtools", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run relay, observers and panels in-process against scripted pages
    /// (default when no subcommand is given).
    Simulate(SimulateArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Number of inspected tabs, each with its own panel.
    #[arg(long, default_value_t = 1)]
    pub tabs: u32,
    /// Namespace the simulated application registers under.
    #[arg(long, default_value = "app.example")]
    pub namespace: String,
    /// Pages run without the instrumented runtime (debug mode off).
    #[arg(long)]
    pub no_runtime: bool,
    /// Print the final report as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            tabs: 1,
            namespace: "app.example".into(),
            no_runtime: false,
            json: false,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `ODD_CONFIG` (or
/// `odd-devtools.toml` by default).  A missing file means defaults.
/// Returns the parsed config and the path that was used.
pub fn load_config() -> anyhow::Result<(odd_domain::config::Config, String)> {
    let config_path =
        std::env::var("ODD_CONFIG").unwrap_or_else(|_| "odd-devtools.toml".into());

    let config = odd_domain::config::Config::load_or_default(std::path::Path::new(&config_path))
        .map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;

    Ok((config, config_path))
}
