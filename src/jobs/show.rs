use anyhow::{Context, Result};
use log::warn;
use std::fs::{self, File};
use std::io::{self, Write};

use crate::borg::BorgCommand;
use crate::core::config::Settings;
use crate::core::target::{log_stem, RunOptions};
use crate::logs::LogRotator;

/// Print the latest log of `command` for each selected target.
///
/// Returns how many logs were printed; a target without a log is only warned about.
pub fn show_latest_logs<W: Write>(
    settings: &Settings,
    command: BorgCommand,
    options: &RunOptions,
    out: &mut W,
) -> Result<usize> {
    let rotator = LogRotator::new(settings.log_dir(), settings.logs.keep);
    let mut shown = 0;

    for kind in options.kinds() {
        let stem = log_stem(command.name(), kind, options.dry_run);
        let link = rotator.latest_link(&stem);

        let mut file = match File::open(&link) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("No {} log for the {} repository yet ({:?})", command, kind, link);
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to open {:?}", link)),
        };

        let resolved = fs::canonicalize(&link).unwrap_or_else(|_| link.clone());
        if shown > 0 {
            writeln!(out)?;
        }
        writeln!(out, "==> {} <==", resolved.display())?;
        io::copy(&mut file, out).with_context(|| format!("Failed to read {:?}", link))?;
        shown += 1;
    }

    Ok(shown)
}
