use super::{EnvMap, Healthcheck, PortDecl, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level deploy request: `{"site": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub site: Vec<SiteRequest>,
}

/// One requested instance. `image` and `domain` are mandatory but checked by
/// validation so that the error names the faulty entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port: BTreeMap<String, PortDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<serde_json::Value>,
    #[serde(
        default,
        alias = "provider",
        alias = "provider-overrides",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub provider_overrides: Vec<ProviderOverride>,
    /// Open-ended runtime overrides, carried untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Per-instance amendment of a provider declared by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Vec<Volume>>,
}

impl DeployRequest {
    pub fn single(site: SiteRequest) -> Self {
        Self { site: vec![site] }
    }

    pub fn label_of(site: &SiteRequest) -> Option<&str> {
        site.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}
