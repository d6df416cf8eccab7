use anyhow::Result;
use chrono::Local;
use log::{info, warn};
use std::path::PathBuf;

use crate::borg::{BorgCommand, BorgExecutor, BorgInvocation, DryRunMode, ExitClass};
use crate::core::config::Settings;
use crate::core::layout::ConfigLayout;
use crate::core::lock::RunLock;
use crate::core::target::{log_stem, select_targets, RunOptions, Target, TargetKind};
use crate::core::validate::validate_environment;
use crate::logs::{read_tail, ChangeScanner, ChangeSummary, LogRotator};
use crate::monitor::{HealthcheckPinger, MAX_BODY_BYTES};

/// What happened on one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResult {
    /// borg ran; `log` is the rotated log file
    Completed {
        class: ExitClass,
        log: PathBuf,
        changes: Option<ChangeSummary>,
    },
    /// Dry run of a command borg cannot dry-run: only printed
    Printed(String),
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: Target,
    pub result: TargetResult,
}

/// Outcome of one invocation across its targets
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    /// 0 unless a target failed fatally; then that target's borg code
    pub fn exit_code(&self) -> i32 {
        self.targets
            .iter()
            .find_map(|report| match &report.result {
                TargetResult::Completed { class, .. } if class.is_fatal() => {
                    Some(class.report_code())
                }
                _ => None,
            })
            .unwrap_or(0)
    }
}

/// Runs one borg command over the selected targets
pub struct Pipeline<E: BorgExecutor> {
    settings: Settings,
    layout: ConfigLayout,
    rotator: LogRotator,
    executor: E,
}

impl<E: BorgExecutor> Pipeline<E> {
    pub fn new(settings: Settings, executor: E) -> Self {
        let layout = ConfigLayout::new(&settings.config_dir);
        let rotator = LogRotator::new(settings.log_dir(), settings.logs.keep);
        Self {
            settings,
            layout,
            rotator,
            executor,
        }
    }

    /// Lock, validate and run `command` on every selected target in order.
    ///
    /// A fatal borg exit on one target does not stop the next one; errors of
    /// borgpilot itself abort the run.
    pub async fn run(&self, command: BorgCommand, options: &RunOptions) -> Result<RunReport> {
        let targets = select_targets(&self.settings, options)?;

        let _lock = if command.needs_lock() {
            Some(RunLock::acquire(self.layout.lock_file())?)
        } else {
            None
        };

        validate_environment(&self.settings)?;

        let mut report = RunReport::default();
        for target in targets {
            let result = self.run_target(command, &target, options).await?;
            report.targets.push(TargetReport { target, result });
        }

        Ok(report)
    }

    fn pinger_for(&self, kind: TargetKind) -> Result<Option<HealthcheckPinger>> {
        if !self.settings.healthchecks.enabled {
            return Ok(None);
        }
        match self.layout.healthcheck_uuid(kind)? {
            Some(check) => Ok(Some(HealthcheckPinger::new(&self.settings.healthchecks, check)?)),
            None => {
                info!("No healthcheck configured for the {} repository", kind);
                Ok(None)
            }
        }
    }

    async fn run_target(
        &self,
        command: BorgCommand,
        target: &Target,
        options: &RunOptions,
    ) -> Result<TargetResult> {
        let invocation =
            BorgInvocation::build(command, &self.settings, &self.layout, target, options.dry_run)?;

        if options.dry_run && command.dry_run_mode() == DryRunMode::PrintOnly {
            let rendered = invocation.render();
            info!("Dry run, not running on the {} repository:", target.kind);
            println!("BORG_REPO={} {}", target.repo, rendered);
            return Ok(TargetResult::Printed(rendered));
        }

        let pinger = if options.dry_run {
            None
        } else {
            self.pinger_for(target.kind)?
        };

        let stem = log_stem(command.name(), target.kind, options.dry_run);
        let header = format!(
            "# borgpilot {} started {}\n# repository ({}): {}\n# {}\n",
            command,
            Local::now().to_rfc3339(),
            target.kind,
            target.repo,
            invocation.render()
        );
        let active = self.rotator.begin(&stem, &header)?;

        if let Some(pinger) = &pinger {
            pinger.start().await;
        }

        let outcome = match self.executor.execute(&invocation, &active.path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(write_err) = active.append(&format!("# borgpilot: {:#}\n", e)) {
                    warn!("Could not record the failure in {:?}: {:#}", active.path, write_err);
                }
                let log = self.rotator.finish(active)?;
                if let Some(pinger) = &pinger {
                    let body = read_tail(&log, MAX_BODY_BYTES).unwrap_or_default();
                    pinger.finish(1, body).await;
                }
                return Err(e);
            }
        };

        let changes = if command == BorgCommand::Create {
            let scanned = ChangeScanner::new(options.dry_run)
                .and_then(|scanner| scanner.scan_file(&active.path));
            match scanned {
                Ok(summary) => {
                    info!("{} repository: {}", target.kind, summary);
                    active.append(&format!("# changes: {}\n", summary))?;
                    Some(summary)
                }
                Err(e) => {
                    warn!("Could not summarize changed files: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        active.append(&format!(
            "# finished rc={} ({}) in {:.1}s\n",
            outcome
                .code
                .map(|rc| rc.to_string())
                .unwrap_or_else(|| "none".to_string()),
            outcome.class,
            outcome.duration.as_secs_f64()
        ))?;
        let log = self.rotator.finish(active)?;

        match outcome.class {
            ExitClass::Success => info!("borg {} on the {} repository succeeded", command, target.kind),
            ExitClass::Warning(rc) => warn!(
                "borg {} on the {} repository finished with warnings (rc {}), see {:?}",
                command, target.kind, rc, log
            ),
            ExitClass::Error(_) => warn!(
                "borg {} on the {} repository failed ({}), see {:?}",
                command, target.kind, outcome.class, log
            ),
        }

        if let Some(pinger) = &pinger {
            let body = read_tail(&log, MAX_BODY_BYTES).unwrap_or_default();
            pinger.finish(outcome.class.report_code(), body).await;
        }

        Ok(TargetResult::Completed {
            class: outcome.class,
            log,
            changes,
        })
    }
}
