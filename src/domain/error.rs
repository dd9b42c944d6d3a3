use thiserror::Error;

/// Closed set of fatal conditions that abort a deployment.
///
/// They travel inside `anyhow::Error`; use `downcast_ref::<DeployError>()`
/// when the kind matters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("site entry #{index} is missing the '{key}' key")]
    MissingKey { index: usize, key: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate name in providers: '{0}'")]
    DuplicateProvider(String),

    #[error("'{node}' requires unknown provider '{target}'")]
    UnknownDependency { node: String, target: String },

    #[error("circular dependencies in providers: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("instance '{0}' declares more than one port with proxy = \"auto\"")]
    SeveralAutoProxies(String),

    #[error("domain '{domain}' already in use for another label: {label}")]
    DomainConflict { domain: String, label: String },

    #[error("host port {0} is already used")]
    PortConflict(u16),

    #[error("no image found for '{0}'")]
    MissingImage(String),

    #[error("not enough available ports in range {start}..{end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("no instance found for label '{0}'")]
    UnknownLabel(String),

    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Conflict,
    Resource,
    Runtime,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingKey { .. }
            | Self::InvalidConfig(_)
            | Self::DuplicateProvider(_)
            | Self::UnknownDependency { .. }
            | Self::CircularDependency(_)
            | Self::SeveralAutoProxies(_) => ErrorKind::Configuration,
            Self::DomainConflict { .. } | Self::PortConflict(_) => ErrorKind::Conflict,
            Self::MissingImage(_) | Self::PortsExhausted { .. } | Self::UnknownLabel(_) => {
                ErrorKind::Resource
            }
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }
}

/// Kind of a pipeline failure; anything not raised as a `DeployError` comes from a collaborator.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<DeployError>()
        .map(DeployError::kind)
        .unwrap_or(ErrorKind::Runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_message_names_nodes() {
        let err = DeployError::CircularDependency(vec!["p1".into(), "p2".into()]);
        assert_eq!(err.to_string(), "circular dependencies in providers: p1, p2");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_error_kind_through_anyhow() {
        let err: anyhow::Error = DeployError::DomainConflict {
            domain: "a.example.com".into(),
            label: "x".into(),
        }
        .into();
        assert_eq!(error_kind(&err), ErrorKind::Conflict);

        let io = anyhow::anyhow!("podman exited with status 125");
        assert_eq!(error_kind(&io), ErrorKind::Runtime);
    }
}
