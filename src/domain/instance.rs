use super::{
    ContainerSpec, DeployError, DomainName, EnvMap, EnvValue, Healthcheck, PortEntry, ProxySpec,
    ProviderDecl, ProviderOverride, ResolvedImage, SiteRequest, Volume, VolumeKind,
    ports_from_decls, rebase_ports,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persistent values of one node, keyed by environment variable.
pub type PersistentValues = BTreeMap<String, String>;

/// Node name of the instance itself in dependency graphs and persistent maps.
pub const INSTANCE_NODE: &str = "";

const PROVIDER_RESTART_POLICY: &str = "always";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// One deployed application bound to a domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub label: String,
    pub label_id: String,
    #[serde(default)]
    pub app_id: String,
    pub domain: String,
    pub image: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub env: EnvMap,
    #[serde(default)]
    pub port_list: Vec<PortEntry>,
    #[serde(default)]
    pub volume_list: Vec<Volume>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub persistent: BTreeMap<String, PersistentValues>,
    #[serde(default)]
    pub running_status: RunningStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(default)]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_overrides: Vec<ProviderOverride>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A dependent sub-service container owned by an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub image: String,
    #[serde(default)]
    pub env: EnvMap,
    #[serde(default)]
    pub port_list: Vec<PortEntry>,
    #[serde(default)]
    pub volume_list: Vec<Volume>,
    #[serde(default)]
    pub running_status: RunningStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(default)]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

impl Provider {
    pub fn from_decl(decl: &ProviderDecl) -> Self {
        Self {
            name: decl.name.clone(),
            kind: decl.kind.clone(),
            image: decl.image.clone(),
            env: decl.env.clone(),
            port_list: ports_from_decls(&decl.port),
            volume_list: decl.volume.clone(),
            healthcheck: decl.healthcheck.clone(),
            ..Default::default()
        }
    }

    pub fn apply_override(&mut self, update: &ProviderOverride) {
        self.env
            .extend(update.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(volumes) = &update.volume {
            self.volume_list = volumes.clone();
        }
    }

    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            ports: publish_args(&self.port_list),
            env: env_args(&self.env),
            network: self.network_name.clone(),
            volumes: mount_args(&self.volume_list),
            tmpfs: tmpfs_args(&self.volume_list),
            healthcheck: self.healthcheck.clone(),
            restart_policy: Some(PROVIDER_RESTART_POLICY.to_string()),
        }
    }

    /// Property readable by `{ from = <provider>, key = <property> }`.
    pub fn property(&self, key: &str) -> Option<String> {
        if let Some(value) = self.env.get(key).and_then(EnvValue::as_text) {
            return Some(value);
        }
        match key {
            "hostname" | "container_name" => Some(self.container_name.clone()),
            "name" | "provider_name" => Some(self.name.clone()),
            "image" => Some(self.image.clone()),
            "network_name" => self.network_name.clone(),
            _ => None,
        }
    }
}

impl Instance {
    /// Build an instance from a validated request entry.
    ///
    /// `index` only serves error messages.
    pub fn from_request(index: usize, site: &SiteRequest) -> Result<Self, DeployError> {
        let image = site
            .image
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or(DeployError::MissingKey {
                index,
                key: "image",
            })?;
        let raw_domain = site
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(DeployError::MissingKey {
                index,
                key: "domain",
            })?;
        let domain = DomainName::parse(raw_domain)?.full_path();

        let label = match site.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => format!("{}-{}", image_short(image), domain),
        };
        let label_id = sanitized_name(&label);
        if label_id.is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "label '{label}' has no usable character"
            )));
        }

        Ok(Self {
            label,
            label_id,
            domain,
            image: image.to_string(),
            env: site.env.clone(),
            port_list: ports_from_decls(&site.port),
            volume_list: site.volume.clone(),
            healthcheck: site.healthcheck.clone(),
            backup: site.backup.clone(),
            provider_overrides: site.provider_overrides.clone(),
            extra: site.extra.clone(),
            ..Default::default()
        })
    }

    pub fn domain_name(&self) -> DomainName {
        // domain was normalized at construction
        DomainName::parse(&self.domain).unwrap_or(DomainName {
            hostname: self.domain.clone(),
            location: None,
        })
    }

    pub fn hostname(&self) -> String {
        self.domain_name().hostname
    }

    /// Rebase the requested values upon the manifest of the resolved image and
    /// build the providers. Returns warnings for ignored overrides.
    pub fn apply_manifest(&mut self, resolved: &ResolvedImage) -> Result<Vec<String>, DeployError> {
        let manifest = &resolved.manifest;
        self.image_id = resolved.image_id.clone();
        self.app_id = manifest.metadata.id.clone();

        let mut env = manifest.env.clone();
        env.extend(std::mem::take(&mut self.env));
        self.env = env;

        self.port_list = rebase_ports(&ports_from_decls(&manifest.port), &self.port_list);
        if self.volume_list.is_empty() {
            self.volume_list = manifest.volume.clone();
        }
        if self.healthcheck.is_none() {
            self.healthcheck = manifest.healthcheck.clone();
        }

        self.providers = manifest.provider.iter().map(Provider::from_decl).collect();
        let mut warnings = Vec::new();
        for update in &self.provider_overrides {
            match self.providers.iter_mut().find(|p| p.name == update.name) {
                Some(provider) => provider.apply_override(update),
                None => warnings.push(format!(
                    "'{}': ignoring update of unknown provider '{}'",
                    self.label, update.name
                )),
            }
        }

        self.check_auto_proxy()?;
        self.assign_names();
        Ok(warnings)
    }

    fn check_auto_proxy(&self) -> Result<(), DeployError> {
        let autos = self
            .port_list
            .iter()
            .filter(|port| port.proxy == ProxySpec::Auto)
            .count();
        if autos > 1 {
            return Err(DeployError::SeveralAutoProxies(self.label.clone()));
        }
        Ok(())
    }

    /// Container, network and managed volume names, all derived from the label.
    pub fn assign_names(&mut self) {
        self.container_name = format!("{}-{}", self.label_id, sanitized_name(&self.app_id));
        self.network_name = (!self.providers.is_empty()).then(|| self.container_name.clone());
        for volume in &mut self.volume_list {
            volume.assign_name(&self.label_id);
        }
        for provider in &mut self.providers {
            provider.container_name =
                format!("{}-{}", self.label_id, sanitized_name(&provider.name));
            provider.network_name = self.network_name.clone();
            for volume in &mut provider.volume_list {
                volume.assign_name(&self.label_id);
            }
        }
    }

    pub fn provider(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn provider_mut(&mut self, name: &str) -> Option<&mut Provider> {
        self.providers.iter_mut().find(|p| p.name == name)
    }

    pub fn persistent_for(&self, node: &str) -> PersistentValues {
        self.persistent.get(node).cloned().unwrap_or_default()
    }

    pub fn set_persistent_for(&mut self, node: &str, values: PersistentValues) {
        if values.is_empty() {
            self.persistent.remove(node);
        } else {
            self.persistent.insert(node.to_string(), values);
        }
    }

    /// Fixed host ports and proxy ports of the instance and its providers.
    pub fn explicit_ports(&self) -> Vec<u16> {
        let mut used = super::explicit_ports(&self.port_list);
        for provider in &self.providers {
            used.extend(super::explicit_ports(&provider.port_list));
        }
        used
    }

    /// Every host port the instance publishes once deployed.
    pub fn published_ports(&self) -> Vec<u16> {
        let mut used: Vec<u16> = self.port_list.iter().filter_map(|p| p.host_use).collect();
        for provider in &self.providers {
            used.extend(provider.port_list.iter().filter_map(|p| p.host_use));
        }
        used.extend(self.explicit_ports());
        used
    }

    /// Host port the reverse proxy forwards to.
    pub fn proxied_port(&self) -> Option<u16> {
        self.port_list
            .iter()
            .find(|port| port.proxy == ProxySpec::Auto)
            .and_then(|port| port.host_use)
    }

    pub fn managed_volume_names(&self) -> Vec<String> {
        let providers = self.providers.iter().flat_map(|p| p.volume_list.iter());
        self.volume_list
            .iter()
            .chain(providers)
            .filter(|v| v.kind == VolumeKind::Volume)
            .filter_map(|v| v.name.clone())
            .collect()
    }

    /// Containers to stop or remove, providers first.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .map(|p| p.container_name.clone())
            .collect();
        names.push(self.container_name.clone());
        names
    }

    pub fn set_running_status(&mut self, status: RunningStatus) {
        self.running_status = status;
        for provider in &mut self.providers {
            provider.running_status = status;
        }
    }

    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image_id.clone(),
            ports: publish_args(&self.port_list),
            env: env_args(&self.env),
            network: self.network_name.clone(),
            volumes: mount_args(&self.volume_list),
            tmpfs: tmpfs_args(&self.volume_list),
            healthcheck: self.healthcheck.clone(),
            restart_policy: Some("unless-stopped".to_string()),
        }
    }

    /// Property readable by `{ key = <property> }` from the instance node.
    pub fn property(&self, key: &str) -> Option<String> {
        if let Some(value) = self.env.get(key).and_then(EnvValue::as_text) {
            return Some(value);
        }
        match key {
            "hostname" | "container_name" => Some(self.container_name.clone()),
            "label" => Some(self.label.clone()),
            "label_id" => Some(self.label_id.clone()),
            "domain" => Some(self.domain.clone()),
            "app_id" => Some(self.app_id.clone()),
            "image" => Some(self.image.clone()),
            "network_name" => self.network_name.clone(),
            _ => None,
        }
    }
}

fn publish_args(ports: &[PortEntry]) -> Vec<String> {
    ports.iter().filter_map(PortEntry::publish_arg).collect()
}

fn env_args(env: &EnvMap) -> Vec<String> {
    env.iter()
        .filter_map(|(key, value)| value.as_text().map(|text| format!("{key}={text}")))
        .collect()
}

fn mount_args(volumes: &[Volume]) -> Vec<String> {
    volumes
        .iter()
        .filter(|v| v.kind != VolumeKind::Tmpfs)
        .map(Volume::mount_arg)
        .collect()
}

fn tmpfs_args(volumes: &[Volume]) -> Vec<String> {
    volumes
        .iter()
        .filter(|v| v.kind == VolumeKind::Tmpfs)
        .map(|v| v.target.clone())
        .collect()
}

/// `nua-hedgedoc:1.9-3` -> `hedgedoc`
pub fn image_short(image: &str) -> &str {
    let image = image.trim();
    let image = image.strip_prefix("nua-").unwrap_or(image);
    image.split(':').next().unwrap_or(image)
}

/// Lowercase name usable for containers, networks and volumes.
pub fn sanitized_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
            sanitized.push(c.to_ascii_lowercase());
        } else if !sanitized.ends_with('-') {
            sanitized.push('-');
        }
    }
    sanitized
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
