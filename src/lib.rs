pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Shared doubles for unit and integration tests
pub mod test_support;

pub use domain::{
    ContainerRuntime, DeployError, DeployRecord, DeployRequest, DeployState, Instance, Store,
};
pub use infra::{JsonStore, PodmanAdapter};
pub use services::{DeployOutcome, DeploymentEngine, EngineSettings};
