use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Paused,
    Stopped,
    NotCreated,
}

/// Identity of a started container, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub id: String,
}

/// Everything the runtime needs to start one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `host:container/protocol`
    pub ports: Vec<String>,
    /// `KEY=value`
    pub env: Vec<String>,
    pub network: Option<String>,
    /// `source:target` or `name:target`
    pub volumes: Vec<String>,
    pub tmpfs: Vec<String>,
    pub healthcheck: Option<Healthcheck>,
    pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Named volume owned by the instance, removed with it on REPLACE.
    #[default]
    Volume,
    Bind,
    Tmpfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "type", default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub source: String,
    pub target: String,
    /// Full runtime name of a managed volume (`<label_id>-<source>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Volume {
    pub fn is_managed(&self) -> bool {
        self.kind == VolumeKind::Volume
    }

    pub fn assign_name(&mut self, label_id: &str) {
        if self.is_managed() {
            self.name = Some(format!("{}-{}", label_id, self.source));
        }
    }

    pub fn runtime_source(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source)
    }

    pub fn mount_arg(&self) -> String {
        format!("{}:{}", self.runtime_source(), self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}
