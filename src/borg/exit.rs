use std::fmt;

/// How a borg exit status is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// rc 0
    Success,
    /// rc 1 or 100..=127: tolerated and reported
    Warning(i32),
    /// anything else; `None` when borg was killed by a signal or timed out
    Error(Option<i32>),
}

impl ExitClass {
    /// Classify a raw exit code (`None` for termination by signal)
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitClass::Success,
            Some(rc @ 1) | Some(rc @ 100..=127) => ExitClass::Warning(rc),
            other => ExitClass::Error(other),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ExitClass::Error(_))
    }

    /// Exit code reported to the healthcheck endpoint and the shell
    pub fn report_code(&self) -> i32 {
        match self {
            ExitClass::Success | ExitClass::Warning(_) => 0,
            ExitClass::Error(Some(rc)) => *rc,
            ExitClass::Error(None) => 1,
        }
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClass::Success => write!(f, "success"),
            ExitClass::Warning(rc) => write!(f, "warning rc={}", rc),
            ExitClass::Error(Some(rc)) => write!(f, "error rc={}", rc),
            ExitClass::Error(None) => write!(f, "error (terminated)"),
        }
    }
}
