use crate::domain::{DeployError, Instance};
use std::fmt;

/// How an incoming instance relates to the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStrategy {
    /// Unknown label on a free domain.
    New,
    /// Same label, domain and application.
    Update,
    /// Same label and domain, another application: data is dropped.
    Replace,
    /// Same label and application, moved to a free domain.
    Move,
    /// Same label, another application on a free domain: data is dropped.
    ReuseLabel,
}

impl DeployStrategy {
    /// Whether the previous instance of the label keeps its managed volumes
    /// and persistent values.
    pub fn keeps_data(&self) -> bool {
        matches!(self, Self::Update | Self::Move)
    }
}

impl fmt::Display for DeployStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Move => "move",
            Self::ReuseLabel => "reuse-label",
        };
        f.write_str(name)
    }
}

/// The four observations the decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchFacts {
    pub same_label: bool,
    pub same_domain: bool,
    pub same_app: bool,
    pub domain_taken: bool,
}

/// Decision table; `None` means the deployment must abort on a domain conflict.
pub fn decide(facts: MatchFacts) -> Option<DeployStrategy> {
    let MatchFacts {
        same_label,
        same_domain,
        same_app,
        domain_taken,
    } = facts;
    match (same_label, same_domain, same_app, domain_taken) {
        (false, _, _, true) => None,
        (false, _, _, false) => Some(DeployStrategy::New),
        (true, true, true, _) => Some(DeployStrategy::Update),
        (true, true, false, _) => Some(DeployStrategy::Replace),
        (true, false, _, true) => None,
        (true, false, true, false) => Some(DeployStrategy::Move),
        (true, false, false, false) => Some(DeployStrategy::ReuseLabel),
    }
}

/// Strategy chosen for one incoming instance.
#[derive(Debug, Clone)]
pub struct Selection {
    pub strategy: DeployStrategy,
    /// Active instance holding the same label, if any.
    pub previous: Option<Instance>,
}

/// Select the strategy of `incoming` against `active`.
pub fn select(incoming: &Instance, active: &[Instance]) -> Result<Selection, DeployError> {
    // labels are compared by label_id, which names the containers
    let previous = active.iter().find(|i| i.label_id == incoming.label_id);
    let holder = active
        .iter()
        .filter(|i| i.label_id != incoming.label_id)
        .find(|i| domains_overlap(&i.domain, &incoming.domain));

    let facts = MatchFacts {
        same_label: previous.is_some(),
        same_domain: previous.is_some_and(|p| p.domain == incoming.domain),
        same_app: previous.is_some_and(|p| p.app_id == incoming.app_id),
        domain_taken: holder.is_some(),
    };

    match decide(facts) {
        Some(strategy) => Ok(Selection {
            strategy,
            previous: previous.cloned(),
        }),
        None => Err(DeployError::DomainConflict {
            domain: incoming.domain.clone(),
            label: holder.map(|h| h.label.clone()).unwrap_or_default(),
        }),
    }
}

/// Two domains collide when they are equal, or share a hostname while one of
/// them is not located.
pub fn domains_overlap(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    let split = |domain: &str| match domain.split_once('/') {
        Some((host, _)) => (host.to_string(), true),
        None => (domain.to_string(), false),
    };
    let (left_host, left_located) = split(left);
    let (right_host, right_located) = split(right);
    left_host == right_host && !(left_located && right_located)
}
