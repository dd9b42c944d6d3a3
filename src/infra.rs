pub mod certbot;
pub mod config;
pub mod json_store;
pub mod net;
pub mod nginx;
pub mod podman_adapter;
pub mod registry;
mod shell;

pub use certbot::CertbotProvisioner;
pub use json_store::JsonStore;
pub use net::local_port_available;
pub use nginx::NginxProxy;
pub use podman_adapter::PodmanAdapter;
pub use registry::LocalRegistry;
