//! judge-ctl - run untrusted submissions inside judge-sandbox

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::Cli;
use commands::list_policy;
use console::style;
use runner::run_judged;
use sandbox_core::FAILURE_SENTINEL;

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    if let Some(mode) = cli.list_policy {
        list_policy(mode, cli.ban_fork);
        return;
    }

    let code = match run_judged(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            FAILURE_SENTINEL
        }
    };
    std::process::exit(code);
}
