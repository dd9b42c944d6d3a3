use crate::domain::{
    CertificateProvisioner, CertificateRequest, ContainerHandle, ContainerRuntime, ContainerSpec,
    ContainerState, DeployRecord, DeployState, ImageManifest, ImageRegistry, Instance, ProxySite,
    ResolvedImage, ReverseProxy, Store,
};
use crate::services::{Collaborators, DeploymentEngine, EngineSettings};
use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub name: String,
    pub state: ContainerState,
    pub spec: ContainerSpec,
}

/// In-memory container runtime recording every call as `operation:target`.
#[derive(Debug, Default)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    networks: RwLock<BTreeSet<String>>,
    volumes: RwLock<BTreeSet<String>>,
    missing_images: RwLock<BTreeSet<String>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail calls matching `operation` (e.g. `start`) or a full command
    /// (e.g. `start:blog-wordpress`).
    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    pub fn set_missing_image(&self, image: &str) {
        self.missing_images.write().unwrap().insert(image.to_string());
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.write().unwrap().clear();
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.containers.read().unwrap().contains_key(name)
    }

    pub fn get_state(&self, name: &str) -> Option<ContainerState> {
        self.containers.read().unwrap().get(name).map(|c| c.state)
    }

    pub fn get_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.spec.clone())
    }

    pub fn container_names(&self) -> BTreeSet<String> {
        self.containers.read().unwrap().keys().cloned().collect()
    }

    pub fn network_exists(&self, name: &str) -> bool {
        self.networks.read().unwrap().contains(name)
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.volumes.read().unwrap().contains(name)
    }

    fn record_command(&self, operation: &str, target: &str) -> Result<()> {
        let command = format!("{operation}:{target}");
        self.commands.write().unwrap().push(command.clone());
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if *fail_on == command || fail_on == operation {
                bail!("Mock failure on: {}", command);
            }
        }
        Ok(())
    }

    fn set_state(&self, name: &str, state: ContainerState) -> Result<()> {
        match self.containers.write().unwrap().get_mut(name) {
            Some(container) => {
                container.state = state;
                Ok(())
            }
            None => bail!("no such container: {name}"),
        }
    }
}

impl ContainerRuntime for MockRuntime {
    fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.record_command("start", &spec.name)?;
        if self.container_exists(&spec.name) {
            bail!("container name {} is already in use", spec.name);
        }
        if let Some(network) = &spec.network {
            if !self.network_exists(network) {
                bail!("network {network} not found");
            }
        }
        for mount in &spec.volumes {
            if let Some((source, _)) = mount.split_once(':') {
                if !source.starts_with('/') {
                    self.volumes.write().unwrap().insert(source.to_string());
                }
            }
        }
        self.containers.write().unwrap().insert(
            spec.name.clone(),
            MockContainer {
                name: spec.name.clone(),
                state: ContainerState::Running,
                spec: spec.clone(),
            },
        );
        Ok(ContainerHandle {
            name: spec.name.clone(),
            id: format!("id-{}", spec.name),
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.record_command("stop", name)?;
        self.set_state(name, ContainerState::Stopped)
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.record_command("remove", name)?;
        self.containers.write().unwrap().remove(name);
        Ok(())
    }

    fn pause(&self, name: &str) -> Result<()> {
        self.record_command("pause", name)?;
        self.set_state(name, ContainerState::Paused)
    }

    fn unpause(&self, name: &str) -> Result<()> {
        self.record_command("unpause", name)?;
        self.set_state(name, ContainerState::Running)
    }

    fn state(&self, name: &str) -> Result<ContainerState> {
        Ok(self.get_state(name).unwrap_or(ContainerState::NotCreated))
    }

    fn create_network(&self, name: &str) -> Result<()> {
        self.record_command("create_network", name)?;
        self.networks.write().unwrap().insert(name.to_string());
        Ok(())
    }

    fn remove_network(&self, name: &str) -> Result<()> {
        self.record_command("remove_network", name)?;
        self.networks.write().unwrap().remove(name);
        Ok(())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        self.record_command("remove_volume", name)?;
        self.volumes.write().unwrap().remove(name);
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(!self.missing_images.read().unwrap().contains(image))
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        self.record_command("pull", image)?;
        self.missing_images.write().unwrap().remove(image);
        Ok(())
    }
}

/// Reverse proxy keeping rendered sites in memory.
#[derive(Debug, Default)]
pub struct MockProxy {
    sites: RwLock<BTreeMap<String, ProxySite>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn site(&self, hostname: &str) -> Option<ProxySite> {
        self.sites.read().unwrap().get(hostname).cloned()
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    fn record_command(&self, command: String) -> Result<()> {
        self.commands.write().unwrap().push(command.clone());
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if command.starts_with(fail_on.as_str()) {
                bail!("Mock failure on: {}", command);
            }
        }
        Ok(())
    }
}

impl ReverseProxy for MockProxy {
    fn render(&self, site: &ProxySite) -> Result<PathBuf> {
        self.record_command(format!("render:{}", site.hostname))?;
        self.sites
            .write()
            .unwrap()
            .insert(site.hostname.clone(), site.clone());
        Ok(PathBuf::from("/mock/sites").join(&site.hostname))
    }

    fn remove(&self, hostname: &str) -> Result<()> {
        self.record_command(format!("remove:{hostname}"))?;
        self.sites.write().unwrap().remove(hostname);
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.record_command("reload".to_string())
    }

    fn restart(&self) -> Result<()> {
        self.record_command("restart".to_string())
    }
}

#[derive(Debug, Default)]
pub struct MockCertificates {
    requests: RwLock<Vec<CertificateRequest>>,
    failing: RwLock<bool>,
}

impl MockCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().unwrap() = failing;
    }

    pub fn requests(&self) -> Vec<CertificateRequest> {
        self.requests.read().unwrap().clone()
    }
}

impl CertificateProvisioner for MockCertificates {
    fn provision(&self, request: &CertificateRequest) -> Result<()> {
        self.requests.write().unwrap().push(request.clone());
        if *self.failing.read().unwrap() {
            bail!("Mock certificate failure");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryData {
    instances: BTreeMap<String, Instance>,
    records: Vec<DeployRecord>,
    counters: BTreeMap<String, u64>,
}

/// Store without persistence, ids start at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_records(&self) -> Vec<DeployRecord> {
        self.data.read().unwrap().records.clone()
    }
}

impl Store for MemoryStore {
    fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.data.read().unwrap().instances.values().cloned().collect())
    }

    fn instance(&self, label: &str) -> Result<Option<Instance>> {
        Ok(self.data.read().unwrap().instances.get(label).cloned())
    }

    fn save_instance(&self, instance: &Instance) -> Result<()> {
        self.data
            .write()
            .unwrap()
            .instances
            .insert(instance.label.clone(), instance.clone());
        Ok(())
    }

    fn delete_instance(&self, label: &str) -> Result<()> {
        self.data.write().unwrap().instances.remove(label);
        Ok(())
    }

    fn add_record(&self, mut record: DeployRecord) -> Result<u64> {
        let mut data = self.data.write().unwrap();
        record.id = data.records.len() as u64 + 1;
        let id = record.id;
        data.records.push(record);
        Ok(id)
    }

    fn records(&self, state: Option<DeployState>) -> Result<Vec<DeployRecord>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .records
            .iter()
            .filter(|r| state.is_none_or(|s| r.state == s))
            .cloned()
            .collect())
    }

    fn set_record_state(&self, id: u64, state: DeployState) -> Result<()> {
        let mut data = self.data.write().unwrap();
        let record = data
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("no deploy record {id}"))?;
        record.state = state;
        Ok(())
    }

    fn next_counter(&self, name: &str) -> Result<u64> {
        let mut data = self.data.write().unwrap();
        let counter = data.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Registry over a fixed list of manifests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    manifests: Vec<ImageManifest>,
}

impl StaticRegistry {
    pub fn new(manifests: Vec<ImageManifest>) -> Self {
        Self { manifests }
    }

    /// Parse TOML manifests, panics on invalid input.
    pub fn from_toml(sources: &[&str]) -> Self {
        Self::new(
            sources
                .iter()
                .map(|source| toml::from_str(source).unwrap())
                .collect(),
        )
    }
}

impl ImageRegistry for StaticRegistry {
    fn resolve(&self, image: &str) -> Result<Option<ResolvedImage>> {
        Ok(self
            .manifests
            .iter()
            .find(|m| m.matches(image))
            .map(|manifest| ResolvedImage {
                image_id: manifest.image_reference(),
                manifest: manifest.clone(),
            }))
    }
}

/// Simple web application without providers.
pub const FLASK_MANIFEST: &str = r#"
[metadata]
id = "flask-one"
version = "1.2"

[port.web]
container = 5000
"#;

/// Web application with a database provider and a managed volume.
pub const WORDPRESS_MANIFEST: &str = r#"
[metadata]
id = "wordpress"
version = "6.4"

[env]
WORDPRESS_DB_HOST = { from = "database", key = "hostname" }
WORDPRESS_DB_PASSWORD = { from = "database", key = "MARIADB_PASSWORD" }

[port.web]
container = 80

[[volume]]
source = "content"
target = "/var/www/html"

[[provider]]
name = "database"
image = "mariadb:11"
[provider.env]
MARIADB_PASSWORD = { random = true }
MARIADB_DATABASE = { unique_db = true }
[[provider.volume]]
source = "db"
target = "/var/lib/mysql"
"#;

/// Another application with a database, used for replacements.
pub const GHOST_MANIFEST: &str = r#"
[metadata]
id = "ghost"
version = "5.0"

[port.web]
container = 2368

[[provider]]
name = "database"
image = "mariadb:11"
[provider.env]
MARIADB_PASSWORD = { random = true }
[[provider.volume]]
source = "db"
target = "/var/lib/mysql"
"#;

/// An engine wired to in-memory doubles.
#[derive(Debug)]
pub struct TestHost {
    pub runtime: Arc<MockRuntime>,
    pub proxy: Arc<MockProxy>,
    pub certificates: Arc<MockCertificates>,
    pub store: Arc<MemoryStore>,
    pub engine: DeploymentEngine,
}

impl TestHost {
    pub fn new(manifests: &[&str]) -> Self {
        Self::with_probe(manifests, |_| true)
    }

    pub fn with_probe(
        manifests: &[&str],
        probe: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> Self {
        let runtime = Arc::new(MockRuntime::new());
        let proxy = Arc::new(MockProxy::new());
        let certificates = Arc::new(MockCertificates::new());
        let store = Arc::new(MemoryStore::new());
        let engine = DeploymentEngine::new(
            Collaborators {
                runtime: runtime.clone(),
                proxy: proxy.clone(),
                certificates: certificates.clone(),
                registry: Arc::new(StaticRegistry::from_toml(manifests)),
                store: store.clone(),
            },
            EngineSettings {
                port_range: 8100..8200,
                settle_delay: Duration::ZERO,
            },
            probe,
        );
        Self {
            runtime,
            proxy,
            certificates,
            store,
            engine,
        }
    }

    pub fn active_records(&self) -> Vec<DeployRecord> {
        self.store.records(Some(DeployState::Active)).unwrap()
    }

    pub fn stored(&self, label: &str) -> Option<Instance> {
        self.store.instance(label).unwrap()
    }
}
