//! Behaviour fixture for supervisor tests
//!
//! Each subcommand performs one thing a submission might try, so tests can
//! check how the sandbox reacts to it.

use clap::{Parser, Subcommand};
use std::ffi::CString;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sandbox-probe")]
#[command(about = "Test fixture exercising sandbox limits and policies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Probe,
}

#[derive(Subcommand)]
enum Probe {
    /// Exit with the given code
    Exit { code: i32 },

    /// Sleep, then exit 0
    Sleep {
        /// Milliseconds
        ms: u64,
    },

    /// Allocate and touch memory, hold it, then exit 0
    Alloc {
        /// Megabytes to touch
        mb: usize,

        /// Milliseconds to hold the allocation
        #[arg(default_value_t = 1000)]
        hold_ms: u64,
    },

    /// Read a file and print its length
    Read { path: PathBuf },

    /// Create (or truncate) a file and write to it
    Write { path: PathBuf },

    /// Replace this process with another program
    Exec { path: String },

    /// Issue the raw `fork` syscall and wait for the child
    #[cfg(target_arch = "x86_64")]
    Fork,

    /// Print the value of an environment variable
    Env { key: String },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Probe::Exit { code } => code,
        Probe::Sleep { ms } => {
            thread::sleep(Duration::from_millis(ms));
            0
        }
        Probe::Alloc { mb, hold_ms } => {
            let block = vec![1u8; mb * 1024 * 1024];
            thread::sleep(Duration::from_millis(hold_ms));
            std::hint::black_box(&block);
            0
        }
        Probe::Read { path } => match std::fs::read(&path) {
            Ok(data) => {
                println!("{}", data.len());
                0
            }
            Err(e) => {
                eprintln!("read {}: {}", path.display(), e);
                1
            }
        },
        Probe::Write { path } => {
            match std::fs::File::create(&path).and_then(|mut f| f.write_all(b"probe\n")) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("write {}: {}", path.display(), e);
                    1
                }
            }
        }
        Probe::Exec { path } => {
            let Ok(program) = CString::new(path) else {
                std::process::exit(2);
            };
            let err = nix::unistd::execv(&program, &[&program]);
            eprintln!("exec failed: {:?}", err);
            1
        }
        #[cfg(target_arch = "x86_64")]
        Probe::Fork => {
            // SAFETY: the child only calls _exit
            let pid = unsafe { libc::syscall(libc::SYS_fork) };
            match pid {
                0 => unsafe { libc::_exit(0) },
                p if p < 0 => 1,
                p => {
                    let mut status = 0;
                    unsafe { libc::waitpid(p as libc::pid_t, &mut status, 0) };
                    0
                }
            }
        }
        Probe::Env { key } => match std::env::var(&key) {
            Ok(value) => {
                println!("{}", value);
                0
            }
            Err(_) => 1,
        },
    };

    std::process::exit(code);
}
