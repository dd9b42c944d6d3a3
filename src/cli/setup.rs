use crate::infra::config::{DEFAULT_NUA_TOML_NAME, ensure_config_dir, install_default_config};
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Create the config directory and write a default `nua.toml` if missing.
pub fn install(config_dir: &Path) -> Result<()> {
    info!("preparing config in {:?}", config_dir);

    ensure_config_dir(config_dir)?;
    install_default_config(config_dir)?;

    println!(
        "Config ready, adjust {:?} as needed",
        config_dir.join(DEFAULT_NUA_TOML_NAME)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_install_creates_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_dir = temp_dir.path().join("nua");

        install(&config_dir).unwrap();
        assert!(config_dir.join(DEFAULT_NUA_TOML_NAME).exists());

        // a second run keeps the existing file
        install(&config_dir).unwrap();
    }
}
