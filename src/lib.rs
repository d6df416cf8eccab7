pub mod borg;
pub mod cli;
pub mod core;
pub mod jobs;
pub mod logs;
pub mod monitor;
