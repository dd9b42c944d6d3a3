use super::shell;
use crate::domain::{ProxySite, ReverseProxy};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Writes one nginx server file per hostname into a sites directory.
#[derive(Debug, Clone)]
pub struct NginxProxy {
    sites_dir: PathBuf,
    reload_command: Vec<String>,
    restart_command: Vec<String>,
}

impl NginxProxy {
    pub fn new(
        sites_dir: PathBuf,
        reload_command: Vec<String>,
        restart_command: Vec<String>,
    ) -> Self {
        Self {
            sites_dir,
            reload_command,
            restart_command,
        }
    }

    fn site_path(&self, hostname: &str) -> PathBuf {
        self.sites_dir.join(hostname)
    }
}

impl ReverseProxy for NginxProxy {
    fn render(&self, site: &ProxySite) -> Result<PathBuf> {
        fs::create_dir_all(&self.sites_dir)
            .with_context(|| format!("creating {:?}", self.sites_dir))?;
        let path = self.site_path(&site.hostname);
        fs::write(&path, render_site(site))
            .with_context(|| format!("writing nginx site {:?}", path))?;
        debug!("nginx site {:?} written", path);
        Ok(path)
    }

    fn remove(&self, hostname: &str) -> Result<()> {
        let path = self.site_path(hostname);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("removing {:?}", path))?;
        }
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        info!("reloading nginx");
        shell::run(&self.reload_command, "reloading nginx")
    }

    fn restart(&self) -> Result<()> {
        info!("restarting nginx");
        shell::run(&self.restart_command, "restarting nginx")
    }
}

/// Plain HTTP server block; certificate provisioning rewrites it for TLS.
pub fn render_site(site: &ProxySite) -> String {
    let mut conf = String::new();
    let _ = writeln!(conf, "server {{");
    let _ = writeln!(conf, "    listen 80;");
    let _ = writeln!(conf, "    listen [::]:80;");
    let _ = writeln!(conf, "    server_name {};", site.hostname);
    for route in &site.routes {
        let location = match &route.location {
            Some(location) if site.located => format!("/{location}/"),
            _ => "/".to_string(),
        };
        let _ = writeln!(conf);
        let _ = writeln!(conf, "    location {location} {{");
        let _ = writeln!(conf, "        proxy_pass http://127.0.0.1:{}/;", route.port);
        let _ = writeln!(conf, "        proxy_set_header Host $host;");
        let _ = writeln!(conf, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(
            conf,
            "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
        );
        let _ = writeln!(conf, "        proxy_set_header X-Forwarded-Proto $scheme;");
        if site.located {
            let _ = writeln!(conf, "        proxy_set_header X-Script-Name {location};");
        }
        let _ = writeln!(conf, "    }}");
    }
    let _ = writeln!(conf, "}}");
    conf
}
