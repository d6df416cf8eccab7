//! Building, running and classifying borg invocations.

pub mod command;
pub mod exit;
pub mod runner;

pub use command::{BorgCommand, BorgInvocation, DryRunMode};
pub use exit::ExitClass;
pub use runner::{BorgExecutor, BorgOutcome, ProcessExecutor};
