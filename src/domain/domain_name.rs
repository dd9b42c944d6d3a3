use super::DeployError;

/// A `hostname[/location]` string split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName {
    pub hostname: String,
    pub location: Option<String>,
}

impl DomainName {
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        let trimmed = raw.trim().trim_matches('/');
        let without_scheme = trimmed
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed);

        let (host_part, path) = match without_scheme.split_once('/') {
            Some((host, path)) => (host, path),
            None => (without_scheme, ""),
        };
        // drop an explicit port, the proxy listens on the standard ones
        let hostname = host_part
            .split(':')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let valid = !hostname.is_empty()
            && hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            && !hostname.starts_with('.')
            && !hostname.ends_with('.');
        if !valid {
            return Err(DeployError::InvalidConfig(format!(
                "fail to parse hostname from '{raw}'"
            )));
        }

        let location = path.trim_matches('/');
        Ok(Self {
            hostname,
            location: (!location.is_empty()).then(|| location.to_string()),
        })
    }

    pub fn full_path(&self) -> String {
        match &self.location {
            Some(location) => format!("{}/{}", self.hostname, location),
            None => self.hostname.clone(),
        }
    }

    /// Registrable domain used to group certificate requests.
    pub fn top_domain(&self) -> String {
        top_domain(&self.hostname)
    }
}

pub fn top_domain(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() <= 2 {
        return hostname.to_string();
    }
    parts[parts.len() - 2..].join(".")
}
