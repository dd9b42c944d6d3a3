pub mod dependency_resolver;
mod deployment_engine;
mod evaluator;
pub mod port_allocator;
mod state_journal;
pub mod strategy;
mod validation;

pub use dependency_resolver::{DependencyNode, evaluation_order};
pub use deployment_engine::{
    Collaborators, DEFAULT_SETTLE_DELAY, DeployMode, DeploymentEngine, EngineSettings,
    InstanceAction, InstanceStatus, ReconcileContext, group_by_top_domain, merge_requests,
    proxy_site,
};
pub use evaluator::{ValueEvaluator, gen_password};
pub use port_allocator::{DEFAULT_PORT_RANGE, PortAllocator, PortProbe};
pub use state_journal::{DeployOutcome, Replay, Snapshot, StateJournal};
pub use strategy::{DeployStrategy, MatchFacts, decide, select};
pub use validation::{Validated, validate};
