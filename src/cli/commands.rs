use crate::cli::app::build_engine;
use crate::cli::setup;
use crate::domain::{ContainerState, error_kind};
use crate::infra::config::load_deploy_request;
use crate::services::{DeployOutcome, DeploymentEngine, InstanceStatus};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the config directory with a default nua.toml
    Init,
    /// Deploy a full configuration, removing instances it does not list
    Deploy {
        /// Deploy file (.toml, .json, .yml or .yaml)
        file: PathBuf,
    },
    /// Add or update the instances of a file, keeping the others
    Merge {
        /// Deploy file (.toml, .json, .yml or .yaml)
        file: PathBuf,
    },
    /// Remove an instance and its data
    Remove { label: String },
    /// Replay the last known-good configuration
    Restore,
    /// Show active instances and the state of their containers
    Status,
    /// Print the active deploy request as JSON
    Show,
    Start { label: String },
    Stop { label: String },
    Restart { label: String },
    Pause { label: String },
    Unpause { label: String },
}

/// Run one command, returning the process exit code.
pub fn run(command: Command, config_dir: &Path) -> Result<i32> {
    let engine = || build_engine(config_dir);
    let outcome = match command {
        Command::Init => {
            setup::install(config_dir)?;
            return Ok(0);
        }
        Command::Status => return print_status(&engine()?),
        Command::Show => return print_request(&engine()?),
        Command::Deploy { file } => engine()?.deploy(&load_deploy_request(&file)?)?,
        Command::Merge { file } => engine()?.merge(&load_deploy_request(&file)?)?,
        Command::Remove { label } => engine()?.remove(&label)?,
        Command::Restore => engine()?.restore()?,
        Command::Start { label } => engine()?.start(&label)?,
        Command::Stop { label } => engine()?.stop(&label)?,
        Command::Restart { label } => engine()?.restart(&label)?,
        Command::Pause { label } => engine()?.pause(&label)?,
        Command::Unpause { label } => engine()?.unpause(&label)?,
    };
    report(&outcome);
    Ok(exit_code(&outcome))
}

/// 0 when deployed, 1 when rejected, 2 when the host was rolled back.
pub fn exit_code(outcome: &DeployOutcome) -> i32 {
    match outcome {
        DeployOutcome::Deployed { .. } => 0,
        DeployOutcome::Rejected(_) => 1,
        DeployOutcome::RolledBack { .. } => 2,
    }
}

fn report(outcome: &DeployOutcome) {
    match outcome {
        DeployOutcome::Deployed { record, warnings } => {
            for warning in warnings {
                println!("warning: {warning}");
            }
            println!(
                "Deployed {} instance(s), record {}",
                record.deployed.len(),
                record.id
            );
        }
        DeployOutcome::Rejected(cause) => {
            error!("rejected ({:?}): {cause:#}", error_kind(cause));
            println!("Rejected, nothing was changed: {cause:#}");
        }
        DeployOutcome::RolledBack { cause, restored } => {
            error!("failed ({:?}): {cause:#}", error_kind(cause));
            match restored {
                Some(record) => println!(
                    "Failed: {cause:#}\nRestored record {} ({} instance(s))",
                    record.id,
                    record.deployed.len()
                ),
                None => println!("Failed: {cause:#}\nNothing to restore, host cleaned up"),
            }
        }
    }
}

fn print_status(engine: &DeploymentEngine) -> Result<i32> {
    let statuses = engine.status()?;
    if statuses.is_empty() {
        println!("No active instance");
        return Ok(0);
    }
    for status in &statuses {
        println!("{}", status_line(status));
        for (name, state) in &status.containers {
            println!("    {:<30} | {}", name, state_label(*state));
        }
    }
    Ok(0)
}

fn status_line(status: &InstanceStatus) -> String {
    format!(
        "- {:<20} {:<30} {} ({:?})",
        status.label, status.domain, status.app_id, status.recorded
    )
}

fn state_label(state: ContainerState) -> &'static str {
    match state {
        ContainerState::Running => "running",
        ContainerState::Paused => "paused",
        ContainerState::Stopped => "stopped",
        ContainerState::NotCreated => "missing",
    }
}

fn print_request(engine: &DeploymentEngine) -> Result<i32> {
    let snapshot = engine.journal().read_current_state()?;
    let json =
        serde_json::to_string_pretty(&snapshot.requested).context("serializing deploy request")?;
    println!("{json}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeployRecord, DeployRequest, DeployState};
    use anyhow::anyhow;

    #[test]
    fn test_exit_codes() {
        let record = DeployRecord::new(
            DeployRequest::default(),
            Vec::new(),
            DeployState::Active,
            None,
        );
        let deployed = DeployOutcome::Deployed {
            record,
            warnings: Vec::new(),
        };
        assert_eq!(exit_code(&deployed), 0);
        assert_eq!(exit_code(&DeployOutcome::Rejected(anyhow!("no"))), 1);
        assert_eq!(
            exit_code(&DeployOutcome::RolledBack {
                cause: anyhow!("boom"),
                restored: None
            }),
            2
        );
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(state_label(ContainerState::NotCreated), "missing");
        assert_eq!(state_label(ContainerState::Paused), "paused");
    }
}
