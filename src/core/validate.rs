use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::core::config::Settings;
use crate::core::error::PilotError;

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Check the environment before borg touches a repository
pub fn validate_environment(settings: &Settings) -> Result<()> {
    if let Some(conf) = &settings.logging_conf {
        if !conf.is_file() {
            return Err(anyhow::anyhow!(PilotError::ValidationError(format!(
                "BORG_LOGGING_CONF {:?} does not exist",
                conf
            ))));
        }
    }

    if let Some(mount) = &settings.mnt_reqd {
        if !is_mount_point(mount)? {
            return Err(anyhow::anyhow!(PilotError::ValidationError(format!(
                "BORG_MNT_REQD {:?} is not mounted",
                mount
            ))));
        }
        debug!("Required mount {:?} is present", mount);
    }

    for dir in [&settings.cache_dir, &settings.security_dir].into_iter().flatten() {
        if !dir.is_dir() {
            info!("Creating directory {:?}", dir);
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
    }

    Ok(())
}

/// Whether `path` is a mounted directory
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };
    if !meta.is_dir() {
        return Ok(false);
    }

    let canonical = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve path: {:?}", path))?;
    let parent = match canonical.parent() {
        Some(parent) => parent,
        None => return Ok(true),
    };
    let parent_meta =
        fs::metadata(parent).with_context(|| format!("Failed to stat {:?}", parent))?;
    if parent_meta.dev() != meta.dev() {
        return Ok(true);
    }

    // Bind mounts share the parent's device; fall back to the mount table
    let table = fs::read_to_string(PROC_MOUNTS).unwrap_or_default();
    Ok(mount_table_contains(&table, &canonical))
}

/// Look `path` up among the mount points of a `/proc/mounts`-style table
pub fn mount_table_contains(table: &str, path: &Path) -> bool {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| Path::new(&unescape_mount_field(mount_point)) == path)
}

/// Decode the octal escapes (`\040` for a space) the kernel uses in mount tables
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
