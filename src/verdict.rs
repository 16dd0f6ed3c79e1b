//! Aggregated result of one supervised run

use std::fmt;

use sandbox_core::FAILURE_SENTINEL;
use serde::Serialize;

use crate::monitoring::MonitorResult;

/// Step of child setup that failed before the target started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStage {
    /// Installing the seccomp policy
    Policy,
    /// `execve` of the target
    Exec,
}

impl SetupStage {
    pub(crate) fn code(self) -> u32 {
        match self {
            SetupStage::Policy => 1,
            SetupStage::Exec => 2,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SetupStage::Policy),
            2 => Some(SetupStage::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::Policy => f.write_str("policy installation"),
            SetupStage::Exec => f.write_str("exec"),
        }
    }
}

/// Failure reported by the child over the status pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SetupFailure {
    pub stage: SetupStage,
    pub errno: i32,
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed: {}",
            self.stage,
            std::io::Error::from_raw_os_error(self.errno)
        )
    }
}

/// How the run ended, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    MemoryLimitExceeded,
    TimeLimitExceeded,
    SetupFailed(SetupFailure),
    Exited(i32),
    Signaled(i32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::MemoryLimitExceeded => f.write_str("memory limit exceeded"),
            Outcome::TimeLimitExceeded => f.write_str("time limit exceeded"),
            Outcome::SetupFailed(failure) => write!(f, "setup failed: {}", failure),
            Outcome::Exited(code) => write!(f, "exited with code {}", code),
            Outcome::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// Everything the supervisor learned about one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub pid: i32,
    /// Exit code, when the child exited normally
    pub exit_status: Option<i32>,
    /// Terminating signal, when the child was killed
    pub signal: Option<i32>,
    pub time: MonitorResult,
    pub memory: MonitorResult,
    pub setup_failure: Option<SetupFailure>,
}

impl Verdict {
    /// Classify the run. Limit breaches win over whatever killed the child.
    pub fn outcome(&self) -> Outcome {
        if self.memory.is_exceeded() {
            return Outcome::MemoryLimitExceeded;
        }
        if self.time.is_exceeded() {
            return Outcome::TimeLimitExceeded;
        }
        if let Some(failure) = self.setup_failure {
            return Outcome::SetupFailed(failure);
        }
        match (self.exit_status, self.signal) {
            (Some(code), _) => Outcome::Exited(code),
            (None, Some(sig)) => Outcome::Signaled(sig),
            (None, None) => Outcome::Signaled(0),
        }
    }

    /// Exit code for the supervisor process: the child's own code on a clean
    /// exit, [`FAILURE_SENTINEL`] otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.outcome() {
            Outcome::Exited(code) => code,
            _ => FAILURE_SENTINEL,
        }
    }

    pub fn peak_memory_kb(&self) -> u64 {
        self.memory.value()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.time.value()
    }

    /// Lines for the diagnostic stream.
    ///
    /// `MLE` and/or `TLE` when a limit was crossed; otherwise the peak
    /// resident set in kB followed by the elapsed time in ms.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.memory.is_exceeded() {
            lines.push("MLE".to_string());
        }
        if self.time.is_exceeded() {
            lines.push("TLE".to_string());
        }
        if lines.is_empty() {
            lines.push(self.peak_memory_kb().to_string());
            lines.push(self.elapsed_ms().to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(exit_status: Option<i32>, signal: Option<i32>) -> Verdict {
        Verdict {
            pid: 1234,
            exit_status,
            signal,
            time: MonitorResult::Completed(12),
            memory: MonitorResult::Completed(2048),
            setup_failure: None,
        }
    }

    #[test]
    fn test_clean_exit() {
        let v = verdict(Some(0), None);
        assert_eq!(v.outcome(), Outcome::Exited(0));
        assert_eq!(v.exit_code(), 0);
        assert_eq!(v.diagnostics(), vec!["2048", "12"]);
    }

    #[test]
    fn test_exit_code_propagates() {
        let v = verdict(Some(3), None);
        assert_eq!(v.exit_code(), 3);
    }

    #[test]
    fn test_signal_maps_to_sentinel() {
        let v = verdict(None, Some(libc::SIGSYS));
        assert_eq!(v.outcome(), Outcome::Signaled(libc::SIGSYS));
        assert_eq!(v.exit_code(), FAILURE_SENTINEL);
        assert_eq!(v.diagnostics().len(), 2);
    }

    #[test]
    fn test_time_limit() {
        let mut v = verdict(None, Some(libc::SIGKILL));
        v.time = MonitorResult::LimitExceeded(100);
        assert_eq!(v.outcome(), Outcome::TimeLimitExceeded);
        assert_eq!(v.exit_code(), FAILURE_SENTINEL);
        assert_eq!(v.diagnostics(), vec!["TLE"]);
    }

    #[test]
    fn test_both_limits() {
        let mut v = verdict(None, Some(libc::SIGKILL));
        v.time = MonitorResult::LimitExceeded(100);
        v.memory = MonitorResult::LimitExceeded(60_000);
        assert_eq!(v.outcome(), Outcome::MemoryLimitExceeded);
        assert_eq!(v.diagnostics(), vec!["MLE", "TLE"]);
    }

    #[test]
    fn test_setup_failure() {
        let mut v = verdict(Some(127), None);
        v.setup_failure = Some(SetupFailure {
            stage: SetupStage::Exec,
            errno: libc::ENOENT,
        });
        assert!(matches!(v.outcome(), Outcome::SetupFailed(_)));
        assert_eq!(v.exit_code(), FAILURE_SENTINEL);
        assert!(v.outcome().to_string().starts_with("setup failed: exec failed"));
    }

    #[test]
    fn test_stage_codes() {
        for stage in [SetupStage::Policy, SetupStage::Exec] {
            assert_eq!(SetupStage::from_code(stage.code()), Some(stage));
        }
        assert_eq!(SetupStage::from_code(0), None);
    }

    #[test]
    fn test_verdict_json() {
        let json = serde_json::to_value(verdict(Some(0), None)).unwrap();
        assert_eq!(json["exit_status"], 0);
        assert_eq!(json["memory"]["status"], "completed");
        assert_eq!(json["memory"]["value"], 2048);
        assert!(json["setup_failure"].is_null());
    }
}
