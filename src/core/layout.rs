use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::error::PilotError;
use crate::core::target::TargetKind;

/// Files borgpilot reads from the config directory
#[derive(Debug, Clone)]
pub struct ConfigLayout {
    config_dir: PathBuf,
}

impl ConfigLayout {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// Pattern file handed to `borg create --patterns-from`
    pub fn patterns_file(&self) -> PathBuf {
        self.config_dir.join("patterns.lst")
    }

    /// Recursion roots, one path per line
    pub fn roots_file(&self) -> PathBuf {
        self.config_dir.join("roots.lst")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.config_dir.join("borgpilot.lock")
    }

    /// Healthcheck UUID file for a target
    pub fn uuid_file(&self, kind: TargetKind) -> PathBuf {
        match kind {
            TargetKind::Remote => self.config_dir.join("healthchecks.uuid"),
            TargetKind::Local => self.config_dir.join("healthchecks.local.uuid"),
        }
    }

    /// Recursion roots from `roots.lst`; empty when the file does not exist
    pub fn recursion_roots(&self) -> Result<Vec<PathBuf>> {
        let path = self.roots_file();
        let lines = read_list_file(&path)?;
        debug!("Read {} recursion roots from {:?}", lines.len(), path);
        Ok(lines.into_iter().map(PathBuf::from).collect())
    }

    /// The pattern file, if present
    pub fn patterns(&self) -> Option<PathBuf> {
        let path = self.patterns_file();
        path.is_file().then_some(path)
    }

    /// Whether the pattern file declares at least one recursion root (`R <path>`)
    pub fn patterns_declare_roots(&self) -> Result<bool> {
        let lines = read_list_file(&self.patterns_file())?;
        Ok(lines.iter().any(|line| {
            line.strip_prefix('R')
                .map(|rest| rest.starts_with(char::is_whitespace))
                .unwrap_or(false)
        }))
    }

    /// Healthcheck UUID for a target; `None` when the UUID file is absent
    pub fn healthcheck_uuid(&self, kind: TargetKind) -> Result<Option<Uuid>> {
        let path = self.uuid_file(kind);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read UUID file: {:?}", path))
            }
        };

        let uuid = Uuid::parse_str(text.trim()).map_err(|e| {
            anyhow::anyhow!(PilotError::ConfigError(format!(
                "invalid healthcheck UUID in {:?}: {}",
                path, e
            )))
        })?;

        Ok(Some(uuid))
    }
}

/// Read a list file, skipping blank lines and `#` comments. A missing file reads as empty.
pub fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read list file: {:?}", path)),
    };

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
