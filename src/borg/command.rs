use anyhow::Result;
use clap::ValueEnum;
use std::ffi::{OsStr, OsString};
use std::fmt;

use crate::core::config::{PruneSettings, Settings};
use crate::core::error::PilotError;
use crate::core::layout::ConfigLayout;
use crate::core::target::Target;

/// Borg subcommands borgpilot drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BorgCommand {
    Create,
    Prune,
    Check,
    Compact,
    List,
}

/// What `--dry-run` means for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunMode {
    /// borg understands `--dry-run`
    Native,
    /// Print the command line instead of running it
    PrintOnly,
    /// Read-only command, runs as usual
    Unaffected,
}

impl BorgCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BorgCommand::Create => "create",
            BorgCommand::Prune => "prune",
            BorgCommand::Check => "check",
            BorgCommand::Compact => "compact",
            BorgCommand::List => "list",
        }
    }

    /// Commands that hold the lock file for the whole invocation
    pub fn needs_lock(&self) -> bool {
        !matches!(self, BorgCommand::List)
    }

    pub fn dry_run_mode(&self) -> DryRunMode {
        match self {
            BorgCommand::Create | BorgCommand::Prune => DryRunMode::Native,
            BorgCommand::Check | BorgCommand::Compact => DryRunMode::PrintOnly,
            BorgCommand::List => DryRunMode::Unaffected,
        }
    }

    /// Whether borg's stdout belongs on the terminal rather than only in the log
    pub fn echoes_stdout(&self) -> bool {
        matches!(self, BorgCommand::List)
    }
}

impl fmt::Display for BorgCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully resolved borg command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorgInvocation {
    pub command: BorgCommand,
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
    /// Terminate borg after this many seconds
    pub timeout_seconds: Option<u64>,
}

impl BorgInvocation {
    /// Build the command line for `command` against `target`
    pub fn build(
        command: BorgCommand,
        settings: &Settings,
        layout: &ConfigLayout,
        target: &Target,
        dry_run: bool,
    ) -> Result<Self> {
        let native_dry_run = dry_run && command.dry_run_mode() == DryRunMode::Native;
        let mut args: Vec<OsString> = vec![command.name().into()];

        match command {
            BorgCommand::Create => {
                let roots = layout.recursion_roots()?;
                if roots.is_empty() && !layout.patterns_declare_roots()? {
                    return Err(anyhow::anyhow!(PilotError::ConfigError(format!(
                        "no recursion roots: list paths in {:?} or add R lines to {:?}",
                        layout.roots_file(),
                        layout.patterns_file()
                    ))));
                }

                args.extend(["--info", "--list", "--filter=AME", "--show-rc"].map(OsString::from));
                push_dry_run_or_stats(&mut args, native_dry_run);
                args.push("--compression".into());
                args.push(settings.create.compression.clone().into());
                if settings.create.exclude_caches {
                    args.push("--exclude-caches".into());
                }
                if settings.create.one_file_system {
                    args.push("--one-file-system".into());
                }
                if let Some(patterns) = layout.patterns() {
                    args.push("--patterns-from".into());
                    args.push(patterns.into_os_string());
                }
                args.push(format!("::{}", settings.create.archive_name).into());
                args.extend(roots.into_iter().map(|root| root.into_os_string()));
            }
            BorgCommand::Prune => {
                args.extend(["--info", "--list", "--show-rc"].map(OsString::from));
                push_dry_run_or_stats(&mut args, native_dry_run);
                args.push("--glob-archives".into());
                args.push(settings.prune.glob_archives.clone().into());
                args.extend(retention_args(&settings.prune)?);
            }
            BorgCommand::Check => {
                args.extend(["--info", "--show-rc"].map(OsString::from));
                if settings.check.verify_data {
                    args.push("--verify-data".into());
                }
            }
            BorgCommand::Compact => {
                args.extend(["--info", "--show-rc"].map(OsString::from));
            }
            BorgCommand::List => {}
        }

        let mut env: Vec<(String, OsString)> = vec![
            ("BORG_REPO".to_string(), target.repo.clone().into()),
            (
                "BORG_CONFIG_DIR".to_string(),
                settings.config_dir.clone().into_os_string(),
            ),
        ];
        let optional = [
            ("BORG_CACHE_DIR", &settings.cache_dir),
            ("BORG_SECURITY_DIR", &settings.security_dir),
            ("BORG_LOGGING_CONF", &settings.logging_conf),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                env.push((name.to_string(), value.clone().into_os_string()));
            }
        }

        Ok(Self {
            command,
            program: settings.borg.binary.clone(),
            args,
            env,
            timeout_seconds: settings.borg.timeout_seconds,
        })
    }

    /// Arguments as (lossy) strings
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-style rendering for logs and dry runs
    pub fn render(&self) -> String {
        std::iter::once(OsStr::new(&self.program))
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|arg| shell_quote(&arg.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The environment value exported for `name`, if any
    pub fn env_value(&self, name: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_os_str())
    }
}

fn push_dry_run_or_stats(args: &mut Vec<OsString>, dry_run: bool) {
    // borg rejects --stats together with --dry-run
    if dry_run {
        args.push("--dry-run".into());
    } else {
        args.push("--stats".into());
    }
}

/// `--keep-*` arguments; an empty rule set would delete every archive
fn retention_args(prune: &PruneSettings) -> Result<Vec<OsString>> {
    let mut args: Vec<OsString> = Vec::new();

    if let Some(within) = prune.keep_within.as_deref().filter(|w| !w.trim().is_empty()) {
        args.push("--keep-within".into());
        args.push(within.trim().into());
    }

    let counts = [
        ("--keep-hourly", prune.keep_hourly),
        ("--keep-daily", prune.keep_daily),
        ("--keep-weekly", prune.keep_weekly),
        ("--keep-monthly", prune.keep_monthly),
        ("--keep-yearly", prune.keep_yearly),
    ];
    for (flag, count) in counts {
        if count > 0 {
            args.push(flag.into());
            args.push(count.to_string().into());
        }
    }

    if args.is_empty() {
        return Err(anyhow::anyhow!(PilotError::ConfigError(
            "prune has no retention rule; refusing to delete every archive".to_string()
        )));
    }

    Ok(args)
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=:/.,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
