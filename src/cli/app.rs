use crate::infra::config::{NuaConfig, load_config};
use crate::infra::{
    CertbotProvisioner, JsonStore, LocalRegistry, NginxProxy, PodmanAdapter,
    local_port_available,
};
use crate::services::{Collaborators, DeploymentEngine};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Wire the engine to podman, nginx, certbot and the on-disk state.
pub fn build_engine(config_dir: &Path) -> Result<DeploymentEngine> {
    let config = load_config(config_dir)?;
    engine_from_config(&config)
}

pub fn engine_from_config(config: &NuaConfig) -> Result<DeploymentEngine> {
    let settings = config.engine_settings()?;
    let state_dir = config.state_dir();
    debug!("state in {:?}, ports {:?}", state_dir, settings.port_range);

    let store = JsonStore::open(&state_dir)
        .with_context(|| format!("opening state store in {:?}", state_dir))?;
    let collaborators = Collaborators {
        runtime: Arc::new(PodmanAdapter::new()),
        proxy: Arc::new(NginxProxy::new(
            config.nginx_sites_dir(),
            config.reload_command(),
            config.restart_command(),
        )),
        certificates: Arc::new(CertbotProvisioner::new(
            config.certbot_enabled(),
            config.certbot.email.clone(),
        )),
        registry: Arc::new(LocalRegistry::new(config.registry_dir())),
        store: Arc::new(store),
    };
    Ok(DeploymentEngine::new(
        collaborators,
        settings,
        local_port_available,
    ))
}
