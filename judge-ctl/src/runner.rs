use judge_sandbox::{Supervisor, Verdict};
use log::debug;
use sandbox_core::{Ceilings, ConfigError, Result, RunConfig};

use crate::cli::Cli;

/// Turn the parsed command line into the immutable run configuration
pub fn resolve(cli: &Cli) -> Result<(RunConfig, Ceilings)> {
    let path = cli.path.as_ref().ok_or(ConfigError::MissingTarget)?;

    let mut builder = RunConfig::builder(cli.mode, path)
        .args(cli.args.iter().cloned())
        .time_limit_ms(cli.time_limit)
        .memory_limit_kb(cli.memory_limit)
        .ban_fork(cli.ban_fork);
    if let Some(output) = &cli.output {
        builder = builder.output(output.clone());
    }
    for entry in &cli.env {
        builder = builder.env_entry(entry.clone());
    }

    let ceilings = Ceilings {
        time_ms: cli.time_ceiling,
        memory_kb: cli.memory_ceiling,
    };
    Ok((builder.build()?, ceilings))
}

/// Print the verdict: diagnostics on stderr, JSON on stdout when asked
pub fn report(verdict: &Verdict, json: bool) -> Result<()> {
    for line in verdict.diagnostics() {
        eprintln!("{}", line);
    }
    if json {
        let text = serde_json::to_string(verdict).map_err(std::io::Error::from)?;
        println!("{}", text);
    }
    Ok(())
}

/// Run the target and return the process exit code
pub fn run_judged(cli: &Cli) -> Result<i32> {
    let (config, ceilings) = resolve(cli)?;
    debug!("Resolved {:?}", config);
    debug!("Ceilings: {} ms, {} kB", ceilings.time_ms, ceilings.memory_kb);

    let verdict = Supervisor::new().with_ceilings(ceilings).run(&config)?;
    report(&verdict, cli.json)?;
    Ok(verdict.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use sandbox_core::{Mode, SandboxError};

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["judge-ctl"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_compiler_config() {
        let cli = parse(&[
            "-m",
            "compiler",
            "-p",
            "/usr/bin/cc",
            "-o",
            "main",
            "--time-ceiling",
            "60000",
            "--",
            "main.c",
        ]);
        let (config, ceilings) = resolve(&cli).unwrap();
        assert_eq!(config.mode(), Mode::Compiler);
        assert_eq!(config.argv(), &["/usr/bin/cc", "main.c", "-o", "main"]);
        assert_eq!(ceilings.time_ms, 60_000);
        assert_eq!(config.effective_time_limit_ms(&ceilings), 60_000);
    }

    #[test]
    fn test_resolve_rejects_bad_env() {
        let cli = parse(&["-p", "./main", "-e", "NOT_AN_ASSIGNMENT"]);
        match resolve(&cli) {
            Err(SandboxError::Config(ConfigError::InvalidEnv(entry))) => {
                assert_eq!(entry, "NOT_AN_ASSIGNMENT")
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_resolve_requires_path() {
        let cli = parse(&["--list-policy", "runner"]);
        assert!(matches!(
            resolve(&cli),
            Err(SandboxError::Config(ConfigError::MissingTarget))
        ));
    }
}
