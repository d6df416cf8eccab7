use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{debug, info};
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Moves finished logs to timestamped names, maintains the `-latest` symlink
/// and drops old logs beyond the retention count.
#[derive(Debug, Clone)]
pub struct LogRotator {
    dir: PathBuf,
    keep: usize,
}

/// Log file of a run in progress
#[derive(Debug)]
pub struct ActiveLog {
    pub path: PathBuf,
    stem: String,
    started: DateTime<Local>,
}

impl ActiveLog {
    /// Append text to the log
    pub fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log file: {:?}", self.path))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write log file: {:?}", self.path))?;
        Ok(())
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }
}

impl LogRotator {
    /// `keep` of zero is treated as one so the latest link never dangles
    pub fn new<P: AsRef<Path>>(dir: P, keep: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            keep: keep.max(1),
        }
    }

    /// Where borg writes while a run is in progress
    pub fn active_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.log", stem))
    }

    /// Symlink to the newest finished log of a stem
    pub fn latest_link(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}-latest.log", stem))
    }

    /// Start a fresh active log holding `header`
    pub fn begin(&self, stem: &str, header: &str) -> Result<ActiveLog> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log directory: {:?}", self.dir))?;

        let path = self.active_path(stem);
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to create log file: {:?}", path))?;
        file.write_all(header.as_bytes())
            .with_context(|| format!("Failed to write log file: {:?}", path))?;

        debug!("Logging to {:?}", path);
        Ok(ActiveLog {
            path,
            stem: stem.to_string(),
            started: Local::now(),
        })
    }

    /// Rotate a finished log into place and return its final path
    pub fn finish(&self, active: ActiveLog) -> Result<PathBuf> {
        let base = format!("{}-{}", active.stem, active.started.format(TIMESTAMP_FORMAT));
        let mut target = self.dir.join(format!("{}.log", base));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("{}-{}.log", base, n));
            n += 1;
        }

        fs::rename(&active.path, &target)
            .with_context(|| format!("Failed to move {:?} to {:?}", active.path, target))?;

        self.point_latest(&active.stem, &target)?;
        let removed = self.prune(&active.stem)?;
        if removed > 0 {
            info!("Removed {} old {} logs", removed, active.stem);
        }

        Ok(target)
    }

    /// Atomically repoint `<stem>-latest.log` at `target` (relative link)
    fn point_latest(&self, stem: &str, target: &Path) -> Result<()> {
        let link = self.latest_link(stem);
        let tmp = self.dir.join(format!(".{}-latest.tmp", stem));
        let name = target
            .file_name()
            .context("rotated log has no file name")?;

        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", tmp)),
        }
        symlink(name, &tmp).with_context(|| format!("Failed to create symlink {:?}", tmp))?;
        fs::rename(&tmp, &link).with_context(|| format!("Failed to update symlink {:?}", link))?;
        Ok(())
    }

    /// Finished logs of a stem, oldest first
    pub fn rotated(&self, stem: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            r"^{}-(?P<ts>\d{{8}}-\d{{6}})(?:-(?P<n>\d+))?\.log$",
            regex::escape(stem)
        );
        let re = Regex::new(&pattern).context("Failed to compile rotated log pattern")?;

        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found: Vec<(String, u64, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to read {:?}", self.dir))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(caps) = re.captures(&name) {
                let n = caps
                    .name("n")
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0);
                found.push((caps["ts"].to_string(), n, entry.path().to_path_buf()));
            }
        }

        found.sort();
        Ok(found.into_iter().map(|(_, _, path)| path).collect())
    }

    fn prune(&self, stem: &str) -> Result<usize> {
        let rotated = self.rotated(stem)?;
        let excess = rotated.len().saturating_sub(self.keep);
        for path in &rotated[..excess] {
            fs::remove_file(path).with_context(|| format!("Failed to remove old log {:?}", path))?;
        }
        Ok(excess)
    }
}

/// Last `max_bytes` of a file, decoded lossily
pub fn read_tail(path: &Path, max_bytes: u64) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let len = file.metadata()?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes))?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
