use crate::domain::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState};
use anyhow::{Context, Result, bail};
use std::ffi::OsStr;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PodmanAdapter;

impl PodmanAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PodmanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for PodmanAdapter {
    fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let args = run_args(spec);
        debug!("podman {}", args.join(" "));
        let id = podman_output(&args, &format!("starting container {}", spec.name))?;
        Ok(ContainerHandle {
            name: spec.name.clone(),
            id,
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        podman(["stop", name], &format!("stopping container {name}"))
    }

    fn remove(&self, name: &str) -> Result<()> {
        let status = podman_status(["rm", "-f", name], &format!("removing container {name}"))?;

        if !status.success() {
            warn!("could not remove {name} (it may not exist)");
        }

        Ok(())
    }

    fn pause(&self, name: &str) -> Result<()> {
        podman(["pause", name], &format!("pausing container {name}"))
    }

    fn unpause(&self, name: &str) -> Result<()> {
        podman(["unpause", name], &format!("unpausing container {name}"))
    }

    fn state(&self, name: &str) -> Result<ContainerState> {
        get_container_state(name)
    }

    fn create_network(&self, name: &str) -> Result<()> {
        let exists = podman_status(
            ["network", "exists", name],
            &format!("checking network {name}"),
        )?;
        if exists.success() {
            return Ok(());
        }
        podman(["network", "create", name], &format!("creating network {name}"))
    }

    fn remove_network(&self, name: &str) -> Result<()> {
        let status = podman_status(
            ["network", "rm", "-f", name],
            &format!("removing network {name}"),
        )?;

        if !status.success() {
            warn!("could not remove network {name} (it may not exist)");
        }

        Ok(())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        let status = podman_status(
            ["volume", "rm", "-f", name],
            &format!("removing volume {name}"),
        )?;

        if !status.success() {
            warn!("could not remove volume {name} (it may not exist)");
        }

        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(podman_status(
            ["image", "exists", image],
            &format!("checking image {image}"),
        )?
        .success())
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        podman(["pull", image], &format!("pulling image {image}"))
    }
}

fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        spec.name.clone(),
    ];

    if let Some(net) = &spec.network {
        args.push("--network".into());
        args.push(net.clone());
    }
    if let Some(policy) = &spec.restart_policy {
        args.push("--restart".into());
        args.push(policy.clone());
    }

    for port in &spec.ports {
        args.push("-p".into());
        args.push(port.clone());
    }

    for env in &spec.env {
        args.push("-e".into());
        args.push(env.clone());
    }

    for volume in &spec.volumes {
        args.push("-v".into());
        args.push(volume.clone());
    }

    for target in &spec.tmpfs {
        args.push("--tmpfs".into());
        args.push(target.clone());
    }

    if let Some(check) = &spec.healthcheck {
        args.push("--health-cmd".into());
        args.push(check.command.clone());
        if let Some(interval) = &check.interval {
            args.push("--health-interval".into());
            args.push(interval.clone());
        }
        if let Some(timeout) = &check.timeout {
            args.push("--health-timeout".into());
            args.push(timeout.clone());
        }
        if let Some(retries) = check.retries {
            args.push("--health-retries".into());
            args.push(retries.to_string());
        }
    }

    args.push(spec.image.clone());
    args
}

fn get_container_state(name: &str) -> Result<ContainerState> {
    let output = Command::new("podman")
        .args(["container", "inspect", name, "--format", "{{.State.Status}}"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("checking state of container {name}"))?;

    if !output.status.success() {
        return Ok(ContainerState::NotCreated);
    }

    Ok(match String::from_utf8_lossy(&output.stdout).trim() {
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        _ => ContainerState::Stopped,
    })
}

fn podman<I, S>(args: I, context: &str) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let status = podman_status(args, context)?;
    ensure_success(status, context)
}

fn podman_status<I, S>(args: I, context: &str) -> Result<ExitStatus>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new("podman")
        .args(args.into_iter().map(|item| item.as_ref().to_os_string()))
        .stdout(Stdio::null())
        .status()
        .with_context(|| context.to_string())
}

/// Runs podman and returns its trimmed stdout.
fn podman_output<I, S>(args: I, context: &str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new("podman")
        .args(args.into_iter().map(|item| item.as_ref().to_os_string()))
        .stdout(Stdio::piped())
        .output()
        .with_context(|| context.to_string())?;
    ensure_success(output.status, context)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn ensure_success(status: ExitStatus, context: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    bail!("podman exited with status {:?} ({context})", status)
}
