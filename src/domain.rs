mod container;
mod domain_name;
mod env;
mod error;
mod instance;
mod manifest;
mod port;
mod record;
mod request;
pub mod traits;

pub use container::{
    ContainerHandle, ContainerSpec, ContainerState, Healthcheck, Volume, VolumeKind,
};
pub use domain_name::{DomainName, top_domain};
pub use env::{DEFAULT_SECRET_LENGTH, EnvMap, EnvValue, Requirement, RequirementKind};
pub use error::{DeployError, ErrorKind, error_kind};
pub use instance::{
    INSTANCE_NODE, Instance, PersistentValues, Provider, RunningStatus, image_short,
    sanitized_name,
};
pub use manifest::{ImageManifest, Metadata, ProviderDecl, ResolvedImage};
pub use port::{
    HostSpec, PortDecl, PortEntry, Protocol, ProxySpec, explicit_ports, ports_from_decls,
    rebase_ports,
};
pub use record::{DeployRecord, DeployState};
pub use request::{DeployRequest, ProviderOverride, SiteRequest};
pub use traits::{
    CertificateProvisioner, CertificateRequest, ContainerRuntime, ImageRegistry, ProxyRoute,
    ProxySite, ReverseProxy, Store,
};
