use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EnvMap = BTreeMap<String, EnvValue>;

/// Value of an environment variable as declared in a request or a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Integer(i64),
    Flag(bool),
    Requirement(Requirement),
}

impl EnvValue {
    /// Literal rendering, `None` while the value is still a requirement.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Flag(value) => Some(value.to_string()),
            Self::Requirement(_) => None,
        }
    }

    pub fn requirement(&self) -> Option<&Requirement> {
        match self {
            Self::Requirement(requirement) => Some(requirement),
            _ => None,
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A dynamic value, evaluated at deploy time.
///
/// `{ from = "database", key = "hostname" }` reads a property of another node,
/// `{ random = true }`, `{ unique_db = true }` and `{ unique_user = true }`
/// generate a value that is kept across redeploys unless `persistent = false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub random: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, alias = "unique-db", skip_serializing_if = "std::ops::Not::not")]
    pub unique_db: bool,
    #[serde(default, alias = "unique-user", skip_serializing_if = "std::ops::Not::not")]
    pub unique_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub display: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementKind<'a> {
    Property { from: &'a str, key: &'a str },
    Random { length: usize },
    UniqueDb,
    UniqueUser,
    Unknown,
}

pub const DEFAULT_SECRET_LENGTH: usize = 24;

impl Requirement {
    pub fn kind(&self) -> RequirementKind<'_> {
        if let Some(key) = self.key.as_deref() {
            return RequirementKind::Property {
                from: self.from.as_deref().unwrap_or_default().trim(),
                key: key.trim(),
            };
        }
        if self.random {
            return RequirementKind::Random {
                length: self.length.unwrap_or(DEFAULT_SECRET_LENGTH),
            };
        }
        if self.unique_db {
            return RequirementKind::UniqueDb;
        }
        if self.unique_user {
            return RequirementKind::UniqueUser;
        }
        RequirementKind::Unknown
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.unwrap_or(true)
    }

    /// Name of the node this requirement reads from, if any.
    pub fn dependency(&self) -> Option<&str> {
        self.from
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
