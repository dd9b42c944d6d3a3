use anyhow::Result;
use clap::Parser;
use nua::cli::{Command, run};
use nua::infra::config::default_config_dir;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "nua",
    version,
    about = "Deploy packaged web applications on a single host"
)]
struct Cli {
    /// Config directory (default: ~/.config/nua)
    #[arg(long, env = "NUA_CONFIG_DIR", default_value_os_t = default_config_dir())]
    config_dir: std::path::PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = run(cli.command, &cli.config_dir)?;
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}
