use clap::Parser;
use sandbox_core::{Mode, DEFAULT_MEMORY_CEILING_KB, DEFAULT_TIME_CEILING_MS};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "judge-ctl")]
#[command(version, about = "Run untrusted submissions under a seccomp policy with time and memory limits", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Compile a submission
    judge-ctl -m compiler -p /usr/bin/g++ -o main -- -O2 main.cpp

    # Run it with 2 s and 256 MiB
    judge-ctl -p ./main -t 2000 -M 262144

    # Inspect the filters of a mode
    judge-ctl --list-policy runner

DIAGNOSTICS:
    On stderr: MLE and/or TLE when a limit was hit, otherwise the peak
    resident memory (kB) and the elapsed time (ms). The exit code is the
    target's own, or 255 after a limit, a signal or a setup failure.
")]
pub struct Cli {
    /// Sandbox mode
    #[arg(short, long, value_name = "MODE", default_value_t = Mode::Runner)]
    pub mode: Mode,

    /// Executable to run
    #[arg(
        short,
        long,
        value_name = "PATH",
        required_unless_present = "list_policy"
    )]
    pub path: Option<PathBuf>,

    /// Wall-clock limit in milliseconds (0 = ceiling)
    #[arg(short, long, value_name = "MS", default_value_t = 0)]
    pub time_limit: u64,

    /// Resident memory limit in kilobytes (0 = ceiling)
    #[arg(short = 'M', long, value_name = "KB", default_value_t = 0)]
    pub memory_limit: u64,

    /// Output file, passed as `-o <OUTPUT>` in compiler mode
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Environment entry for the target, repeatable (the target gets no other)
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Also kill the `fork` syscall
    #[arg(long)]
    pub ban_fork: bool,

    /// Time limit applied when none is given (at least 1)
    #[arg(
        long,
        value_name = "MS",
        env = "JUDGE_SANDBOX_TIME_CEILING_MS",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = DEFAULT_TIME_CEILING_MS
    )]
    pub time_ceiling: u64,

    /// Memory limit applied when none is given (at least 1)
    #[arg(
        long,
        value_name = "KB",
        env = "JUDGE_SANDBOX_MEMORY_CEILING_KB",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = DEFAULT_MEMORY_CEILING_KB
    )]
    pub memory_ceiling: u64,

    /// Print the verdict as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the filter stack of a mode and exit
    #[arg(long, value_name = "MODE")]
    pub list_policy: Option<Mode>,

    /// Arguments forwarded to the target
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["judge-ctl", "-p", "./main"]).unwrap();
        assert_eq!(cli.mode, Mode::Runner);
        assert_eq!(cli.path, Some(PathBuf::from("./main")));
        assert_eq!(cli.time_limit, 0);
        assert_eq!(cli.memory_limit, 0);
        assert!(!cli.ban_fork);
        assert!(cli.args.is_empty());
    }

    #[test]
    fn test_full_command_line() {
        let cli = Cli::try_parse_from([
            "judge-ctl",
            "-m",
            "compiler",
            "-p",
            "/usr/bin/cc",
            "-t",
            "10000",
            "-M",
            "524288",
            "-o",
            "main",
            "-e",
            "LANG=C",
            "--",
            "-O2",
            "main.c",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Compiler);
        assert_eq!(cli.time_limit, 10_000);
        assert_eq!(cli.memory_limit, 524_288);
        assert_eq!(cli.output.as_deref(), Some("main"));
        assert_eq!(cli.env, vec!["LANG=C"]);
        assert_eq!(cli.args, vec!["-O2", "main.c"]);
    }

    #[test]
    fn test_path_is_required() {
        assert!(Cli::try_parse_from(["judge-ctl", "-m", "runner"]).is_err());
        let cli = Cli::try_parse_from(["judge-ctl", "--list-policy", "compiler"]).unwrap();
        assert_eq!(cli.list_policy, Some(Mode::Compiler));
    }

    #[test]
    fn test_zero_ceilings_rejected() {
        for flag in ["--time-ceiling", "--memory-ceiling"] {
            assert!(
                Cli::try_parse_from(["judge-ctl", "-p", "./main", flag, "0"]).is_err(),
                "{} 0 should be rejected",
                flag
            );
        }
        let cli = Cli::try_parse_from(["judge-ctl", "-p", "./main", "--time-ceiling", "1"]).unwrap();
        assert_eq!(cli.time_ceiling, 1);
    }

    #[test]
    fn test_invalid_mode() {
        let err = Cli::try_parse_from(["judge-ctl", "-m", "judge", "-p", "x"]).unwrap_err();
        assert!(err.to_string().contains("judge"));
    }
}
