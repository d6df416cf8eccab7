use clap::{Parser, Subcommand};

use crate::borg::BorgCommand;
use crate::core::target::RunOptions;

#[derive(Parser, Debug)]
#[command(
    name = "borgpilot",
    author,
    version,
    about = "borgpilot - scheduled BorgBackup runs with log rotation and healthcheck pings"
)]
pub struct Cli {
    /// Ask borg to simulate create/prune; only print check/compact
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Use BORG_LOCAL_REPO instead of BORG_REPO
    #[arg(long, global = true, conflicts_with = "all")]
    pub local: bool,

    /// Run against the remote and then the local repository
    #[arg(long, global = true)]
    pub all: bool,

    /// Debug logging; mirror borg's output to the terminal
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create a new archive from the configured recursion roots
    Create,
    /// Delete archives outside the retention rules
    Prune,
    /// Verify repository consistency
    Check,
    /// Free space left behind by deleted archives
    Compact,
    /// List archives
    List,
    /// Show the latest log of a command
    Log {
        #[arg(value_enum, default_value_t = BorgCommand::Create)]
        command: BorgCommand,
    },
}

impl Cli {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            local: self.local,
            all: self.all,
            verbose: self.verbose,
        }
    }
}

impl Commands {
    /// The borg command a subcommand runs; `None` for `log`
    pub fn borg_command(&self) -> Option<BorgCommand> {
        match self {
            Commands::Create => Some(BorgCommand::Create),
            Commands::Prune => Some(BorgCommand::Prune),
            Commands::Check => Some(BorgCommand::Check),
            Commands::Compact => Some(BorgCommand::Compact),
            Commands::List => Some(BorgCommand::List),
            Commands::Log { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_before_and_after_subcommand() {
        let cli = Cli::try_parse_from(["borgpilot", "--dry-run", "create", "--local", "-v"]).unwrap();
        assert_eq!(cli.command, Commands::Create);
        assert_eq!(
            cli.options(),
            RunOptions {
                dry_run: true,
                local: true,
                all: false,
                verbose: true,
            }
        );
    }

    #[test]
    fn test_local_conflicts_with_all() {
        assert!(Cli::try_parse_from(["borgpilot", "prune", "--local", "--all"]).is_err());
        assert!(Cli::try_parse_from(["borgpilot", "--all", "prune"]).is_ok());
    }

    #[test]
    fn test_log_defaults_to_create() {
        let cli = Cli::try_parse_from(["borgpilot", "log"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Log {
                command: BorgCommand::Create
            }
        );
        assert_eq!(cli.command.borg_command(), None);

        let cli = Cli::try_parse_from(["borgpilot", "log", "check", "--all"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Log {
                command: BorgCommand::Check
            }
        );
        assert!(cli.all);
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["borgpilot", "mount"]).is_err());
        assert!(Cli::try_parse_from(["borgpilot"]).is_err());
        assert!(Cli::try_parse_from(["borgpilot", "log", "mount"]).is_err());
    }

    #[test]
    fn test_subcommands_map_to_borg() {
        let cli = Cli::try_parse_from(["borgpilot", "compact"]).unwrap();
        assert_eq!(cli.command.borg_command(), Some(BorgCommand::Compact));
    }
}
