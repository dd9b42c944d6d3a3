use super::{EnvMap, Healthcheck, PortDecl, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Package description shipped with an application image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub metadata: Metadata,
    /// Runtime image reference; defaults to `nua-<id>:<version>-<release>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub env: EnvMap,
    #[serde(default)]
    pub port: BTreeMap<String, PortDecl>,
    #[serde(default)]
    pub volume: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(default)]
    pub provider: Vec<ProviderDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_release")]
    pub release: u32,
}

fn default_release() -> u32 {
    1
}

/// Sub-service declared by a manifest (e.g. a database).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDecl {
    pub name: String,
    #[serde(rename = "type", default = "default_provider_type")]
    pub kind: String,
    pub image: String,
    #[serde(default)]
    pub env: EnvMap,
    #[serde(default)]
    pub port: BTreeMap<String, PortDecl>,
    #[serde(default)]
    pub volume: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

fn default_provider_type() -> String {
    "docker-image".to_string()
}

impl ImageManifest {
    pub fn nua_tag(&self) -> String {
        format!(
            "nua-{}:{}-{}",
            self.metadata.id, self.metadata.version, self.metadata.release
        )
    }

    pub fn image_reference(&self) -> String {
        self.image.clone().unwrap_or_else(|| self.nua_tag())
    }

    /// Whether `reference` designates this package (`wordpress`, `nua-wordpress`,
    /// `wordpress:6.4`, `nua-wordpress:6.4-1`).
    pub fn matches(&self, reference: &str) -> bool {
        let reference = reference.trim();
        let short = reference.strip_prefix("nua-").unwrap_or(reference);
        let (name, tag) = match short.split_once(':') {
            Some((name, tag)) => (name, Some(tag)),
            None => (short, None),
        };
        if name != self.metadata.id {
            return false;
        }
        match tag {
            None => true,
            Some(tag) => {
                tag == self.metadata.version
                    || tag == format!("{}-{}", self.metadata.version, self.metadata.release)
            }
        }
    }
}

/// An image found in the local registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image_id: String,
    pub manifest: ImageManifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ImageManifest {
        toml::from_str(
            r#"
            [metadata]
            id = "wordpress"
            version = "6.4"
            release = 2

            [port.web]
            container = 80

            [[provider]]
            name = "database"
            image = "mariadb:11"
            [provider.env]
            MARIADB_PASSWORD = { random = true }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = manifest();
        assert_eq!(manifest.nua_tag(), "nua-wordpress:6.4-2");
        assert_eq!(manifest.provider[0].kind, "docker-image");
        assert_eq!(manifest.port["web"].container, 80);
    }

    #[test]
    fn test_reference_matching() {
        let manifest = manifest();
        assert!(manifest.matches("wordpress"));
        assert!(manifest.matches("nua-wordpress:6.4-2"));
        assert!(manifest.matches("wordpress:6.4"));
        assert!(!manifest.matches("wordpress:5.0"));
        assert!(!manifest.matches("ghost"));
    }
}
