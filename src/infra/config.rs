use crate::domain::DeployRequest;
use crate::services::{DEFAULT_PORT_RANGE, DEFAULT_SETTLE_DELAY, EngineSettings};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NUA_TOML_NAME: &str = "nua.toml";

const DEFAULT_NUA_TOML: &str = r#"# nua host configuration

[ports]
start = 8100
end = 9000

[deploy]
settle_delay_ms = 1500

[paths]
state_dir = "~/.local/share/nua"
registry_dir = "~/.local/share/nua/images"
nginx_sites_dir = "/etc/nginx/sites-enabled"

[proxy]
reload_command = ["sudo", "nginx", "-s", "reload"]
restart_command = ["sudo", "systemctl", "restart", "nginx"]

[certbot]
enabled = false
"#;

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/home/nua"))
        .join(".config/nua")
}

pub fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    fs::create_dir_all(config_dir).with_context(|| format!("creating {:?}", config_dir))
}

pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path.to_string_lossy().as_ref()).into_owned())
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PortsConfig {
    pub start: Option<u16>,
    pub end: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DeployConfig {
    pub settle_delay_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PathsConfig {
    pub state_dir: Option<PathBuf>,
    pub registry_dir: Option<PathBuf>,
    pub nginx_sites_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ProxyConfig {
    pub reload_command: Option<Vec<String>>,
    pub restart_command: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct CertbotConfig {
    pub enabled: Option<bool>,
    pub email: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct NuaConfig {
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub certbot: CertbotConfig,
}

impl NuaConfig {
    /// Merges another NuaConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: NuaConfig) {
        if let Some(start) = other.ports.start {
            self.ports.start = Some(start);
        }
        if let Some(end) = other.ports.end {
            self.ports.end = Some(end);
        }
        if let Some(delay) = other.deploy.settle_delay_ms {
            self.deploy.settle_delay_ms = Some(delay);
        }
        if let Some(dir) = other.paths.state_dir {
            self.paths.state_dir = Some(dir);
        }
        if let Some(dir) = other.paths.registry_dir {
            self.paths.registry_dir = Some(dir);
        }
        if let Some(dir) = other.paths.nginx_sites_dir {
            self.paths.nginx_sites_dir = Some(dir);
        }
        if let Some(cmd) = other.proxy.reload_command {
            self.proxy.reload_command = Some(cmd);
        }
        if let Some(cmd) = other.proxy.restart_command {
            self.proxy.restart_command = Some(cmd);
        }
        if let Some(enabled) = other.certbot.enabled {
            self.certbot.enabled = Some(enabled);
        }
        if let Some(email) = other.certbot.email {
            self.certbot.email = Some(email);
        }
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let start = self.ports.start.unwrap_or(DEFAULT_PORT_RANGE.start);
        let end = self.ports.end.unwrap_or(DEFAULT_PORT_RANGE.end);
        if start >= end {
            bail!("invalid port range {start}..{end} in [ports]");
        }
        let settle_delay = self
            .deploy
            .settle_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLE_DELAY);
        Ok(EngineSettings {
            port_range: start..end,
            settle_delay,
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        expand_path(
            self.paths
                .state_dir
                .as_deref()
                .unwrap_or(Path::new("~/.local/share/nua")),
        )
    }

    pub fn registry_dir(&self) -> PathBuf {
        match &self.paths.registry_dir {
            Some(dir) => expand_path(dir),
            None => self.state_dir().join("images"),
        }
    }

    pub fn nginx_sites_dir(&self) -> PathBuf {
        expand_path(
            self.paths
                .nginx_sites_dir
                .as_deref()
                .unwrap_or(Path::new("/etc/nginx/sites-enabled")),
        )
    }

    pub fn reload_command(&self) -> Vec<String> {
        self.proxy
            .reload_command
            .clone()
            .unwrap_or_else(|| ["sudo", "nginx", "-s", "reload"].map(String::from).to_vec())
    }

    pub fn restart_command(&self) -> Vec<String> {
        self.proxy.restart_command.clone().unwrap_or_else(|| {
            ["sudo", "systemctl", "restart", "nginx"]
                .map(String::from)
                .to_vec()
        })
    }

    pub fn certbot_enabled(&self) -> bool {
        self.certbot.enabled.unwrap_or(false)
    }
}

pub fn install_default_config(target_dir: &Path) -> Result<()> {
    ensure_config_dir(target_dir)?;
    let target = target_dir.join(DEFAULT_NUA_TOML_NAME);
    if target.exists() {
        return Ok(());
    }
    fs::write(&target, DEFAULT_NUA_TOML)
        .with_context(|| format!("writing template to {:?}", target))
}

/// Global `nua.toml` of the config dir, then `./nua.toml` on top.
pub fn load_config(config_dir: &Path) -> Result<NuaConfig> {
    let mut config = NuaConfig::default();
    for path in [
        config_dir.join(DEFAULT_NUA_TOML_NAME),
        PathBuf::from("./").join(DEFAULT_NUA_TOML_NAME),
    ] {
        if path.exists() {
            config.merge(read_config(&path)?);
        }
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<NuaConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {:?}", path))
}

/// Read a deploy request, the format follows the file extension.
pub fn load_deploy_request(path: &Path) -> Result<DeployRequest> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let request: DeployRequest = match extension.as_str() {
        "toml" => toml::from_str(&content).with_context(|| format!("parsing {:?}", path))?,
        "json" => {
            serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))?
        }
        "yml" | "yaml" => {
            serde_yml::from_str(&content).with_context(|| format!("parsing {:?}", path))?
        }
        other => bail!("unsupported deploy file format '{other}' for {:?}", path),
    };
    Ok(request)
}
