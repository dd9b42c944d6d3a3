use super::{
    ContainerHandle, ContainerSpec, ContainerState, DeployRecord, DeployState, Instance,
    ResolvedImage,
};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;

/// Trait for container runtime operations
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Create and start a container from a spec
    fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Stop a container
    fn stop(&self, name: &str) -> Result<()>;

    /// Remove a container, missing containers are not an error
    fn remove(&self, name: &str) -> Result<()>;

    fn pause(&self, name: &str) -> Result<()>;

    fn unpause(&self, name: &str) -> Result<()>;

    /// Get the current state of a container
    fn state(&self, name: &str) -> Result<ContainerState>;

    fn create_network(&self, name: &str) -> Result<()>;

    fn remove_network(&self, name: &str) -> Result<()>;

    /// Remove a managed volume and its data
    fn remove_volume(&self, name: &str) -> Result<()>;

    fn image_exists(&self, image: &str) -> Result<bool>;

    fn pull_image(&self, image: &str) -> Result<()>;
}

/// One `location -> port` forward of a proxied hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub location: Option<String>,
    pub port: u16,
}

/// Everything served under one hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySite {
    pub hostname: String,
    pub located: bool,
    pub routes: Vec<ProxyRoute>,
}

pub trait ReverseProxy: Send + Sync + Debug {
    /// Write the site configuration, returns the artifact path
    fn render(&self, site: &ProxySite) -> Result<PathBuf>;

    fn remove(&self, hostname: &str) -> Result<()>;

    fn reload(&self) -> Result<()>;

    fn restart(&self) -> Result<()>;
}

/// Hostnames grouped by registrable domain.
pub type CertificateRequest = BTreeMap<String, Vec<String>>;

pub trait CertificateProvisioner: Send + Sync + Debug {
    fn provision(&self, request: &CertificateRequest) -> Result<()>;
}

pub trait ImageRegistry: Send + Sync + Debug {
    fn resolve(&self, image: &str) -> Result<Option<ResolvedImage>>;
}

/// Persisted instances, deploy records and id counters.
pub trait Store: Send + Sync + Debug {
    fn list_instances(&self) -> Result<Vec<Instance>>;

    fn instance(&self, label: &str) -> Result<Option<Instance>>;

    fn save_instance(&self, instance: &Instance) -> Result<()>;

    fn delete_instance(&self, label: &str) -> Result<()>;

    /// Store a new record and return its id
    fn add_record(&self, record: DeployRecord) -> Result<u64>;

    /// Records in insertion order, optionally filtered by state
    fn records(&self, state: Option<DeployState>) -> Result<Vec<DeployRecord>>;

    fn set_record_state(&self, id: u64, state: DeployState) -> Result<()>;

    /// Next value of a named monotonic counter, starting at 1
    fn next_counter(&self, name: &str) -> Result<u64>;
}
