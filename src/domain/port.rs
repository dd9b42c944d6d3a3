use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Host side of a published port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPortSpec", into = "RawPortSpec")]
pub enum HostSpec {
    #[default]
    Auto,
    Fixed(u16),
}

/// Public port the reverse proxy forwards to this port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPortSpec", into = "RawPortSpec")]
pub enum ProxySpec {
    #[default]
    Auto,
    None,
    Port(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPortSpec {
    Number(u16),
    Word(String),
}

impl TryFrom<RawPortSpec> for HostSpec {
    type Error = String;

    fn try_from(raw: RawPortSpec) -> Result<Self, Self::Error> {
        match raw {
            RawPortSpec::Number(port) => Ok(Self::Fixed(port)),
            RawPortSpec::Word(word) if word.eq_ignore_ascii_case("auto") => Ok(Self::Auto),
            RawPortSpec::Word(word) => word
                .parse()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid host port '{word}', expected \"auto\" or a number")),
        }
    }
}

impl From<HostSpec> for RawPortSpec {
    fn from(spec: HostSpec) -> Self {
        match spec {
            HostSpec::Auto => Self::Word("auto".into()),
            HostSpec::Fixed(port) => Self::Number(port),
        }
    }
}

impl TryFrom<RawPortSpec> for ProxySpec {
    type Error = String;

    fn try_from(raw: RawPortSpec) -> Result<Self, Self::Error> {
        match raw {
            RawPortSpec::Number(port) => Ok(Self::Port(port)),
            RawPortSpec::Word(word) => match word.to_ascii_lowercase().as_str() {
                "auto" => Ok(Self::Auto),
                "none" | "" => Ok(Self::None),
                other => other.parse().map(Self::Port).map_err(|_| {
                    format!("invalid proxy '{word}', expected \"auto\", \"none\" or a number")
                }),
            },
        }
    }
}

impl From<ProxySpec> for RawPortSpec {
    fn from(spec: ProxySpec) -> Self {
        match spec {
            ProxySpec::Auto => Self::Word("auto".into()),
            ProxySpec::None => Self::Word("none".into()),
            ProxySpec::Port(port) => Self::Number(port),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Port declaration as written in a request or manifest, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    pub container: u16,
    #[serde(default)]
    pub host: HostSpec,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub proxy: ProxySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub name: String,
    pub container: u16,
    #[serde(default)]
    pub host: HostSpec,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub proxy: ProxySpec,
    /// Host port actually published, set by the port allocator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_use: Option<u16>,
}

impl PortEntry {
    pub fn from_decl(name: &str, decl: &PortDecl) -> Self {
        Self {
            name: name.to_string(),
            container: decl.container,
            host: decl.host,
            protocol: decl.protocol,
            proxy: decl.proxy,
            host_use: None,
        }
    }

    /// `host:container/protocol` publish argument, once a host port is known.
    pub fn publish_arg(&self) -> Option<String> {
        self.host_use
            .map(|host| format!("{}:{}/{}", host, self.container, self.protocol))
    }
}

pub fn ports_from_decls(decls: &BTreeMap<String, PortDecl>) -> Vec<PortEntry> {
    decls
        .iter()
        .map(|(name, decl)| PortEntry::from_decl(name, decl))
        .collect()
}

/// Overlay `updates` upon `defaults`, matching by port name.
pub fn rebase_ports(defaults: &[PortEntry], updates: &[PortEntry]) -> Vec<PortEntry> {
    let mut merged: Vec<PortEntry> = defaults
        .iter()
        .map(|port| {
            updates
                .iter()
                .find(|update| update.name == port.name)
                .unwrap_or(port)
                .clone()
        })
        .collect();
    for update in updates {
        if !merged.iter().any(|port| port.name == update.name) {
            merged.push(update.clone());
        }
    }
    merged
}

/// Host ports a list of entries pins explicitly (fixed host ports and proxy ports).
pub fn explicit_ports(ports: &[PortEntry]) -> Vec<u16> {
    let mut used = Vec::new();
    for port in ports {
        if let HostSpec::Fixed(host) = port.host {
            used.push(host);
        }
        if let ProxySpec::Port(proxy) = port.proxy {
            used.push(proxy);
        }
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_specs_from_toml() {
        let decls: BTreeMap<String, PortDecl> = toml::from_str(
            r#"
            web = { container = 80 }
            admin = { container = 8080, host = 9001, proxy = "none" }
            smtp = { container = 25, host = "auto", proxy = 2525, protocol = "tcp" }
            "#,
        )
        .unwrap();

        assert_eq!(decls["web"].host, HostSpec::Auto);
        assert_eq!(decls["web"].proxy, ProxySpec::Auto);
        assert_eq!(decls["admin"].host, HostSpec::Fixed(9001));
        assert_eq!(decls["admin"].proxy, ProxySpec::None);
        assert_eq!(decls["smtp"].proxy, ProxySpec::Port(2525));
    }

    #[test]
    fn test_invalid_host_spec_is_rejected() {
        let result: Result<PortDecl, _> = toml::from_str(r#"container = 80
host = "somewhere""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rebase_ports_by_name() {
        let defaults = vec![
            PortEntry::from_decl("web", &PortDecl { container: 80, ..Default::default() }),
            PortEntry::from_decl("ws", &PortDecl { container: 81, ..Default::default() }),
        ];
        let updates = vec![
            PortEntry::from_decl(
                "web",
                &PortDecl {
                    container: 8080,
                    ..Default::default()
                },
            ),
            PortEntry::from_decl("extra", &PortDecl { container: 90, ..Default::default() }),
        ];

        let merged = rebase_ports(&defaults, &updates);
        let names: Vec<&str> = merged.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["web", "ws", "extra"]);
        assert_eq!(merged[0].container, 8080);
    }

    #[test]
    fn test_explicit_ports() {
        let port = PortEntry {
            name: "smtp".into(),
            container: 25,
            host: HostSpec::Fixed(2500),
            protocol: Protocol::Tcp,
            proxy: ProxySpec::Port(25),
            host_use: None,
        };
        assert_eq!(explicit_ports(&[port]), vec![2500, 25]);
    }
}
