//! sandbox-seccomp: Seccomp BPF policies for compiler and runner sandboxes
//!
//! This crate builds the syscall filters applied to a sandboxed child
//! before it execs untrusted code: a kill-by-default whitelist shared by
//! every mode plus an allow-by-default overlay per mode.
//! Seccomp does NOT require root - it only needs `PR_SET_NO_NEW_PRIVS`.

pub mod bpf;
pub mod builder;
pub mod policy;
pub mod syscall_table;

pub use bpf::{CompiledFilter, FilterContext};
pub use builder::{
    InstalledPolicy, PolicyStack, build_compiler_policy, build_fork_ban_policy,
    build_general_policy, build_runner_policy,
};
pub use policy::{
    Action, ArgPredicate, ArgWidth, CmpOp, COMPILER_BAN_LIST, GENERAL_WHITELIST, Policy, Rule,
    RUNNER_BAN_LIST,
};
