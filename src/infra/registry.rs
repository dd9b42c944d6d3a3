use crate::domain::{ImageManifest, ImageRegistry, ResolvedImage};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Image manifests stored as `*.toml` files in one directory.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    dir: PathBuf,
}

impl LocalRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Every readable manifest; unreadable files are skipped with a warning.
    pub fn manifests(&self) -> Result<Vec<ImageManifest>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("reading {:?}", self.dir))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match read_manifest(&path) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!("skipping manifest {:?}: {e:#}", path),
            }
        }
        Ok(manifests)
    }
}

fn read_manifest(path: &Path) -> Result<ImageManifest> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {:?}", path))
}

impl ImageRegistry for LocalRegistry {
    fn resolve(&self, image: &str) -> Result<Option<ResolvedImage>> {
        let mut candidates: Vec<ImageManifest> = self
            .manifests()?
            .into_iter()
            .filter(|m| m.matches(image))
            .collect();
        // newest release wins
        candidates.sort_by(|a, b| {
            (&a.metadata.version, a.metadata.release)
                .cmp(&(&b.metadata.version, b.metadata.release))
        });

        let resolved = candidates.pop().map(|manifest| ResolvedImage {
            image_id: manifest.image_reference(),
            manifest,
        });
        if let Some(found) = &resolved {
            debug!("image {image} resolved to {}", found.image_id);
        }
        Ok(resolved)
    }
}
