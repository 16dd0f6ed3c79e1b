use console::style;
use log::info;
use sandbox_core::Mode;
use sandbox_seccomp::Policy;

/// Filters loaded for `mode`, in load order
pub fn policy_layers(mode: Mode, ban_fork: bool) -> Vec<Policy> {
    let mut layers = vec![Policy::general()];
    if ban_fork {
        layers.push(Policy::fork_ban());
    }
    layers.push(match mode {
        Mode::Runner => Policy::runner_overlay(c"<target>"),
        Mode::Compiler => Policy::compiler_overlay(),
    });
    layers
}

pub fn list_policy(mode: Mode, ban_fork: bool) {
    info!("Listing {} policy stack", mode);
    println!("{} mode: {}\n", style(mode).bold(), mode.description());

    for (i, policy) in policy_layers(mode, ban_fork).iter().enumerate() {
        print!("[{}] {}", i + 1, policy.describe());
        println!();
    }

    if mode == Mode::Runner {
        println!(
            "{}",
            style("execve is bound to the address of the target path when the run starts").dim()
        );
    }
    println!("Every loaded filter applies; the most restrictive action wins.");
}
