use super::{DeployRequest, Instance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployState {
    Active,
    Inactive,
    Previous,
    Failed,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Previous => "PREVIOUS",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Snapshot of one deployment: what was asked and what ended up running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub id: u64,
    pub requested: DeployRequest,
    pub deployed: Vec<Instance>,
    pub state: DeployState,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<u64>,
}

impl DeployRecord {
    /// Record not yet stored; the store assigns the id.
    pub fn new(
        requested: DeployRequest,
        deployed: Vec<Instance>,
        state: DeployState,
        previous_id: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            requested,
            deployed,
            state,
            created: now,
            modified: now,
            previous_id,
        }
    }

    pub fn instance(&self, label: &str) -> Option<&Instance> {
        self.deployed.iter().find(|i| i.label == label)
    }
}
