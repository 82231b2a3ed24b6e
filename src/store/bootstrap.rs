//! Persisted first-run configuration: the private ntfy topic and signing
//! secret. Written once, owner-readable only, reused across restarts.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::crypto;

pub const TOPIC_PREFIX: &str = "gmail-mcp-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub ntfy_topic: String,
    pub signing_secret: String,
    #[serde(default)]
    pub setup_complete: bool,
}

impl BootstrapConfig {
    pub fn generate() -> Self {
        Self {
            ntfy_topic: format!("{}{}", TOPIC_PREFIX, crypto::random_string(32)),
            signing_secret: crypto::random_string(32),
            setup_complete: false,
        }
    }
}

/// `Ok(None)` when no config has been written yet.
pub fn load(path: &Path) -> anyhow::Result<Option<BootstrapConfig>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config {}", path.display()))
        }
    };
    let config = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(Some(config))
}

pub fn save(path: &Path, config: &BootstrapConfig) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        create_private_dir(dir)
            .with_context(|| format!("failed to create config dir {}", dir.display()))?;
    }

    let data = serde_json::to_vec_pretty(config).context("failed to marshal config")?;
    write_private(path, &data)
        .with_context(|| format!("failed to write config {}", path.display()))?;
    Ok(())
}

/// Delete the config so setup runs again. Returns whether a file existed.
pub fn reset(path: &Path) -> anyhow::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("could not remove config {}", path.display())),
    }
}

/// Load the config, generating and persisting a fresh one on first run.
pub fn load_or_create(path: &Path) -> anyhow::Result<BootstrapConfig> {
    if let Some(config) = load(path)? {
        return Ok(config);
    }
    let config = BootstrapConfig::generate();
    save(path, &config).context("failed to save initial config")?;
    tracing::info!(path = %path.display(), "generated new bootstrap config");
    Ok(config)
}

pub(crate) fn create_private_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;

    // `mode` only applies on creation; tighten files left by older runs.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
