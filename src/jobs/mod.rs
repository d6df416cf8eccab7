pub mod pipeline;
pub mod show;

pub use pipeline::{Pipeline, RunReport, TargetReport, TargetResult};
pub use show::show_latest_logs;
