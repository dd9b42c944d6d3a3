use super::shell;
use crate::domain::{CertificateProvisioner, CertificateRequest};
use anyhow::Result;
use tracing::{info, warn};

/// Requests Let's Encrypt certificates through `certbot --nginx`, one
/// certificate per registrable domain.
#[derive(Debug, Clone)]
pub struct CertbotProvisioner {
    enabled: bool,
    email: Option<String>,
}

impl CertbotProvisioner {
    pub fn new(enabled: bool, email: Option<String>) -> Self {
        Self { enabled, email }
    }

    pub fn command(&self, top_domain: &str, hostnames: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = [
            "sudo",
            "certbot",
            "run",
            "--nginx",
            "--non-interactive",
            "--agree-tos",
            "--keep",
            "--redirect",
            "--cert-name",
        ]
        .map(String::from)
        .to_vec();
        argv.push(top_domain.to_string());

        match &self.email {
            Some(email) => {
                argv.push("--email".into());
                argv.push(email.clone());
            }
            None => argv.push("--register-unsafely-without-email".into()),
        }

        let mut sorted = hostnames.to_vec();
        sorted.sort();
        sorted.dedup();
        for hostname in sorted {
            argv.push("-d".into());
            argv.push(hostname);
        }
        argv
    }
}

impl CertificateProvisioner for CertbotProvisioner {
    fn provision(&self, request: &CertificateRequest) -> Result<()> {
        if !self.enabled {
            for hostnames in request.values() {
                info!("serving {} over HTTP", hostnames.join(" "));
            }
            return Ok(());
        }

        let mut failures = Vec::new();
        for (top_domain, hostnames) in request {
            info!("requesting certificate for {}", hostnames.join(" "));
            let argv = self.command(top_domain, hostnames);
            if let Err(e) = shell::run(&argv, &format!("certbot for {top_domain}")) {
                warn!("{e:#}");
                failures.push(top_domain.clone());
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("no certificate for {}", failures.join(", "));
        }
        Ok(())
    }
}
