//! Resolved run configuration
//!
//! A [`RunConfig`] is produced once by [`RunConfigBuilder::build`] and never
//! mutated afterwards. Limits of `0` mean "use the ceiling"; see [`Ceilings`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Exit code of the supervisor when a limit is exceeded, the target was killed
/// by a signal, or the child could not be set up.
pub const FAILURE_SENTINEL: i32 = -1;

/// Exit code of a child whose `execve` returned.
pub const EXEC_FAILURE_EXIT: i32 = 127;

/// Default wall-clock ceiling applied when no time limit is requested.
pub const DEFAULT_TIME_CEILING_MS: u64 = 300_000;

/// Default resident-set ceiling applied when no memory limit is requested (1 GiB).
pub const DEFAULT_MEMORY_CEILING_KB: u64 = 1024 * 1024;

/// Sandbox operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Build-time execution: may write files and spawn sub-tools
    Compiler,
    /// Execution-time: read-mostly, may only exec its own target
    #[default]
    Runner,
}

impl Mode {
    pub fn all() -> [Mode; 2] {
        [Mode::Compiler, Mode::Runner]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Compiler => "compiler",
            Mode::Runner => "runner",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Mode::Compiler => "General whitelist + privilege/session ban-list",
            Mode::Runner => {
                "General whitelist + ban-list + read-only opens + exec of the target only"
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compiler" => Ok(Mode::Compiler),
            "runner" => Ok(Mode::Runner),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// Fallback limits used when a run leaves a limit unset.
///
/// These are large defaults, not a promise of unbounded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceilings {
    pub time_ms: u64,
    pub memory_kb: u64,
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            time_ms: DEFAULT_TIME_CEILING_MS,
            memory_kb: DEFAULT_MEMORY_CEILING_KB,
        }
    }
}

/// Immutable description of one supervised run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    mode: Mode,
    target: PathBuf,
    argv: Vec<String>,
    envp: Vec<String>,
    time_limit_ms: u64,
    memory_limit_kb: u64,
    ban_fork: bool,
}

impl RunConfig {
    /// Start building a configuration for `target` in `mode`
    pub fn builder(mode: Mode, target: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder {
            mode,
            target: target.into(),
            args: Vec::new(),
            env: Vec::new(),
            time_limit_ms: 0,
            memory_limit_kb: 0,
            output: None,
            ban_fork: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Full argument vector, `argv[0]` being the target path
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment as `KEY=VALUE` entries
    pub fn envp(&self) -> &[String] {
        &self.envp
    }

    /// Requested time limit, `0` meaning unset
    pub fn time_limit_ms(&self) -> u64 {
        self.time_limit_ms
    }

    /// Requested memory limit, `0` meaning unset
    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit_kb
    }

    pub fn ban_fork(&self) -> bool {
        self.ban_fork
    }

    /// Time limit after applying the ceiling
    pub fn effective_time_limit_ms(&self, ceilings: &Ceilings) -> u64 {
        if self.time_limit_ms == 0 {
            ceilings.time_ms
        } else {
            self.time_limit_ms
        }
    }

    /// Memory limit after applying the ceiling
    pub fn effective_memory_limit_kb(&self, ceilings: &Ceilings) -> u64 {
        if self.memory_limit_kb == 0 {
            ceilings.memory_kb
        } else {
            self.memory_limit_kb
        }
    }
}

/// Builder for [`RunConfig`]
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    mode: Mode,
    target: PathBuf,
    args: Vec<String>,
    env: Vec<String>,
    time_limit_ms: u64,
    memory_limit_kb: u64,
    output: Option<String>,
    ban_fork: bool,
}

impl RunConfigBuilder {
    /// Append one argument forwarded verbatim to the target
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments forwarded verbatim to the target
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    /// Add a raw `KEY=VALUE` entry, validated at build time
    pub fn env_entry(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Wall-clock limit in milliseconds (`0` = ceiling)
    pub fn time_limit_ms(mut self, ms: u64) -> Self {
        self.time_limit_ms = ms;
        self
    }

    /// Resident-set limit in kilobytes (`0` = ceiling)
    pub fn memory_limit_kb(mut self, kb: u64) -> Self {
        self.memory_limit_kb = kb;
        self
    }

    /// Output file passed as `-o <path>` in compiler mode
    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Additionally kill the `fork` syscall inside the sandbox
    pub fn ban_fork(mut self, ban: bool) -> Self {
        self.ban_fork = ban;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let target = self
            .target
            .to_str()
            .ok_or_else(|| ConfigError::NonUtf8Target(self.target.clone()))?
            .to_string();
        if target.is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        if target.contains('\0') {
            return Err(ConfigError::InteriorNul {
                what: "target path",
            });
        }

        let mut argv = Vec::with_capacity(self.args.len() + 3);
        argv.push(target);
        argv.extend(self.args);
        if self.mode == Mode::Compiler {
            if let Some(output) = self.output {
                argv.push("-o".to_string());
                argv.push(output);
            }
        }
        if argv.iter().any(|a| a.contains('\0')) {
            return Err(ConfigError::InteriorNul { what: "argument" });
        }

        for entry in &self.env {
            if entry.contains('\0') {
                return Err(ConfigError::InteriorNul {
                    what: "environment entry",
                });
            }
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => return Err(ConfigError::InvalidEnv(entry.clone())),
            }
        }

        Ok(RunConfig {
            mode: self.mode,
            target: self.target,
            argv,
            envp: self.env,
            time_limit_ms: self.time_limit_ms,
            memory_limit_kb: self.memory_limit_kb,
            ban_fork: self.ban_fork,
        })
    }
}
