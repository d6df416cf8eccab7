use anyhow::Result;
use log::warn;
use std::fmt;

use crate::core::config::Settings;
use crate::core::error::PilotError;

/// Which repository a run operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// `BORG_REPO`
    Remote,
    /// `BORG_LOCAL_REPO`
    Local,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Remote => write!(f, "remote"),
            TargetKind::Local => write!(f, "local"),
        }
    }
}

/// Flags shared by every subcommand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub local: bool,
    pub all: bool,
    pub verbose: bool,
}

impl RunOptions {
    /// Target kinds selected by `--local` / `--all`, in run order
    pub fn kinds(&self) -> Vec<TargetKind> {
        if self.all {
            vec![TargetKind::Remote, TargetKind::Local]
        } else if self.local {
            vec![TargetKind::Local]
        } else {
            vec![TargetKind::Remote]
        }
    }
}

/// A repository resolved from the settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub repo: String,
}

/// Resolve the repositories a run operates on.
///
/// Under `--all` a missing local repository is skipped; any other missing
/// repository is a configuration error.
pub fn select_targets(settings: &Settings, options: &RunOptions) -> Result<Vec<Target>> {
    let mut targets = Vec::new();

    for kind in options.kinds() {
        let (repo, variable) = match kind {
            TargetKind::Remote => (settings.repo.as_ref(), "BORG_REPO"),
            TargetKind::Local => (settings.local_repo.as_ref(), "BORG_LOCAL_REPO"),
        };

        match repo {
            Some(repo) => targets.push(Target {
                kind,
                repo: repo.clone(),
            }),
            None if options.all && kind == TargetKind::Local => {
                warn!("{} is not set, skipping the local repository", variable);
            }
            None => {
                return Err(anyhow::anyhow!(PilotError::ConfigError(format!(
                    "{} is not set",
                    variable
                ))))
            }
        }
    }

    Ok(targets)
}

/// File-name prefix for the logs of one command on one target
pub fn log_stem(command: &str, kind: TargetKind, dry_run: bool) -> String {
    let mut stem = command.to_string();
    if kind == TargetKind::Local {
        stem.push_str("-local");
    }
    if dry_run {
        stem.push_str("-dry-run");
    }
    stem
}
