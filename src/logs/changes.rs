use anyhow::{Context, Result};
use log::debug;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Item status letters borg prints with `create --list`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Added,
    Modified,
    Error,
    /// `-` under `--dry-run`: would be processed
    WouldProcess,
}

impl ItemStatus {
    fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "A" => Some(ItemStatus::Added),
            "M" => Some(ItemStatus::Modified),
            "E" => Some(ItemStatus::Error),
            "-" => Some(ItemStatus::WouldProcess),
            _ => None,
        }
    }
}

/// One path reported by borg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedItem {
    pub status: ItemStatus,
    pub path: PathBuf,
}

/// Extracts changed items from a `borg create --list` log
pub struct ChangeScanner {
    item_line: Regex,
}

impl ChangeScanner {
    /// Scanner for regular runs (`A`, `M`, `E`) or dry runs (`-`, `E`)
    pub fn new(dry_run: bool) -> Result<Self> {
        let statuses = if dry_run { r"\-E" } else { "AME" };
        // The prefix is optional and lazy so the earliest "<status> " wins,
        // which keeps paths containing " M /" intact.
        let pattern = format!(r"^(?:.*?\s)??(?P<status>[{}]) (?P<path>\S.*)$", statuses);
        let item_line = Regex::new(&pattern).context("Failed to compile item line pattern")?;
        Ok(Self { item_line })
    }

    /// Items in order of first appearance, one per path
    pub fn extract(&self, log: &str) -> Vec<ChangedItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for line in log.lines() {
            let Some(caps) = self.item_line.captures(line) else {
                continue;
            };
            let Some(status) = ItemStatus::from_letter(&caps["status"]) else {
                continue;
            };
            let path = PathBuf::from(&caps["path"]);
            if seen.insert(path.clone()) {
                items.push(ChangedItem { status, path });
            }
        }

        items
    }

    /// Extract from a log file and measure the changed paths
    pub fn scan_file(&self, log_path: &Path) -> Result<ChangeSummary> {
        let bytes =
            fs::read(log_path).with_context(|| format!("Failed to read log: {:?}", log_path))?;
        let text = String::from_utf8_lossy(&bytes);
        let items = self.extract(&text);
        debug!("Found {} changed items in {:?}", items.len(), log_path);
        Ok(ChangeSummary::measure(&items))
    }
}

/// Counts and aggregate sizes of the changed paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: usize,
    pub modified: usize,
    pub errors: usize,
    pub would_process: usize,
    /// Paths that no longer exist on disk
    pub missing: usize,
    /// Sum of file lengths
    pub apparent_bytes: u64,
    /// Allocated size, as `du` reports it
    pub disk_bytes: u64,
}

impl ChangeSummary {
    /// Stat every non-error item; directories are walked
    pub fn measure(items: &[ChangedItem]) -> Self {
        let mut summary = ChangeSummary::default();

        for item in items {
            match item.status {
                ItemStatus::Added => summary.added += 1,
                ItemStatus::Modified => summary.modified += 1,
                ItemStatus::WouldProcess => summary.would_process += 1,
                ItemStatus::Error => {
                    summary.errors += 1;
                    continue;
                }
            }

            let meta = match fs::symlink_metadata(&item.path) {
                Ok(meta) => meta,
                Err(_) => {
                    summary.missing += 1;
                    continue;
                }
            };

            if meta.is_dir() {
                for entry in WalkDir::new(&item.path).into_iter().filter_map(|e| e.ok()) {
                    if let Ok(meta) = entry.metadata() {
                        if !meta.is_dir() {
                            summary.add(&meta);
                        }
                    }
                }
            } else {
                summary.add(&meta);
            }
        }

        summary
    }

    fn add(&mut self, meta: &Metadata) {
        self.apparent_bytes += meta.len();
        self.disk_bytes += meta.blocks() * 512;
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified",
            self.added, self.modified
        )?;
        if self.would_process > 0 {
            write!(f, ", {} would be processed", self.would_process)?;
        }
        write!(
            f,
            ", {} errors; changed files total {} ({} on disk)",
            self.errors,
            format_bytes(self.apparent_bytes),
            format_bytes(self.disk_bytes)
        )?;
        if self.missing > 0 {
            write!(f, ", {} no longer present", self.missing)?;
        }
        Ok(())
    }
}

/// Human readable size with binary units, `du -h` style
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["K", "M", "G", "T", "P"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    const LOG: &str = "\
# borgpilot create started 2026-10-19T02:00:00+00:00
Creating archive at \"ssh://backup@nas/./repo::host-2026-10-19T02:00:00\"
A /home/alice/notes.txt
M /home/alice/.bashrc
U /home/alice/unchanged
d /home/alice
E /home/alice/locked.db
/home/alice/locked.db: [Errno 13] Permission denied: 'locked.db'
A /home/alice/notes.txt
------------------------------------------------------------------------------
Number of files: 3
terminating with warning status, rc 1
";

    #[test]
    fn test_extracts_item_lines() -> Result<()> {
        let items = ChangeScanner::new(false)?.extract(LOG);
        assert_eq!(
            items,
            vec![
                ChangedItem {
                    status: ItemStatus::Added,
                    path: PathBuf::from("/home/alice/notes.txt"),
                },
                ChangedItem {
                    status: ItemStatus::Modified,
                    path: PathBuf::from("/home/alice/.bashrc"),
                },
                ChangedItem {
                    status: ItemStatus::Error,
                    path: PathBuf::from("/home/alice/locked.db"),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_extracts_behind_logging_prefix() -> Result<()> {
        let log = "\
2026-10-19 02:00:01,512 borg.archiver INFO A /srv/data/report 2026.pdf
2026-10-19 02:00:01,530 borg.archiver INFO M /srv/data/a M /b
2026-10-19 02:00:02,001 borg.archiver INFO Remote: connection established
";
        let items = ChangeScanner::new(false)?.extract(log);
        let paths: Vec<_> = items.iter().map(|i| i.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/srv/data/report 2026.pdf"),
                PathBuf::from("/srv/data/a M /b"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_dry_run_statuses() -> Result<()> {
        let log = "- /etc/hosts\nA /etc/passwd\nE /etc/shadow\n";
        let items = ChangeScanner::new(true)?.extract(log);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, ItemStatus::WouldProcess);
        assert_eq!(items[1].status, ItemStatus::Error);

        assert!(ChangeScanner::new(false)?.extract("- /etc/hosts\n").is_empty());
        Ok(())
    }

    #[test]
    fn test_measure_sizes_and_missing() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("file.bin");
        fs::write(&file, vec![0u8; 3000])?;
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)?;
        fs::write(sub.join("a"), vec![1u8; 1000])?;
        fs::write(sub.join("b"), vec![2u8; 24])?;

        let items = vec![
            ChangedItem {
                status: ItemStatus::Added,
                path: file,
            },
            ChangedItem {
                status: ItemStatus::Modified,
                path: sub,
            },
            ChangedItem {
                status: ItemStatus::Modified,
                path: dir.path().join("gone"),
            },
            ChangedItem {
                status: ItemStatus::Error,
                path: dir.path().join("unreadable"),
            },
        ];

        let summary = ChangeSummary::measure(&items);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.modified, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.apparent_bytes, 4024);
        assert_eq!(summary.would_process, 0);
        Ok(())
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(1023), "1023B");
        assert_eq!(format_bytes(1024), "1.0K");
        assert_eq!(format_bytes(1536), "1.5K");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0G");
        assert_eq!(format_bytes(u64::MAX), "16384.0P");
    }

    #[test]
    fn test_summary_display() {
        let summary = ChangeSummary {
            added: 2,
            modified: 1,
            errors: 0,
            would_process: 0,
            missing: 1,
            apparent_bytes: 2048,
            disk_bytes: 8192,
        };
        assert_eq!(
            summary.to_string(),
            "2 added, 1 modified, 0 errors; changed files total 2.0K (8.0K on disk), 1 no longer present"
        );
    }

    proptest! {
        #[test]
        fn prop_item_path_survives_prefixes(
            path in "/[a-zA-Z0-9_. -]{0,40}",
            status in prop::sample::select(vec!["A", "M", "E"]),
            prefix in prop::sample::select(vec![
                "",
                "INFO ",
                "2026-10-19 02:00:01,512 borg.archiver INFO ",
            ]),
        ) {
            let scanner = ChangeScanner::new(false).unwrap();
            let line = format!("{}{} {}", prefix, status, path);
            let items = scanner.extract(&line);
            prop_assert_eq!(items.len(), 1);
            prop_assert_eq!(&items[0].path, &PathBuf::from(&path));
        }
    }
}
