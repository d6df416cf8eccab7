//! Per-run log files and the changed-file report derived from them.

pub mod changes;
pub mod rotation;

pub use changes::{format_bytes, ChangeScanner, ChangeSummary};
pub use rotation::{read_tail, ActiveLog, LogRotator};
