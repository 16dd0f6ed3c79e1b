//! Policy data model and the per-mode rule sets
//!
//! A [`Policy`] is an ordered list of [`Rule`]s on top of a default action.
//! Rules for the same syscall are evaluated in insertion order and the first
//! match wins; anything unmatched falls back to the default action.

use std::ffi::CStr;
use std::fmt::{self, Write as _};

/// What the filter does with a syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Allow,
    Kill,
}

impl Action {
    pub fn opposite(self) -> Self {
        match self {
            Action::Allow => Action::Kill,
            Action::Kill => Action::Allow,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => f.pad("ALLOW"),
            Action::Kill => f.pad("KILL"),
        }
    }
}

/// Width of the compared syscall argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgWidth {
    /// Lower 32 bits (flags, modes)
    Dword,
    /// Full 64 bits (pointers)
    Qword,
}

/// Comparison applied to a syscall argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `arg != value`
    NotEqual,
    /// `arg & mask == value`
    MaskedEqual { mask: u64 },
}

/// Argument-level condition attached to a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgPredicate {
    pub index: u8,
    pub width: ArgWidth,
    pub op: CmpOp,
    pub value: u64,
}

impl ArgPredicate {
    pub fn not_equal(index: u8, width: ArgWidth, value: u64) -> Self {
        Self {
            index,
            width,
            op: CmpOp::NotEqual,
            value,
        }
    }

    /// Matches when every bit of `bits` is set in the argument
    pub fn flags_contain(index: u8, bits: u64) -> Self {
        Self {
            index,
            width: ArgWidth::Dword,
            op: CmpOp::MaskedEqual { mask: bits },
            value: bits,
        }
    }
}

impl fmt::Display for ArgPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            CmpOp::NotEqual => write!(f, "arg{} != {:#x}", self.index, self.value),
            CmpOp::MaskedEqual { mask } => {
                write!(f, "arg{} & {:#o} == {:#o}", self.index, mask, self.value)
            }
        }
    }
}

/// One entry of a filter program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub syscall: String,
    pub action: Action,
    pub predicate: Option<ArgPredicate>,
}

/// Ordered, mode-specific filter specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: &'static str,
    default_action: Action,
    rules: Vec<Rule>,
}

impl Policy {
    /// Empty policy with the given default action
    pub fn new(name: &'static str, default_action: Action) -> Self {
        Self {
            name,
            default_action,
            rules: Vec::new(),
        }
    }

    /// Kill-by-default base that allows [`GENERAL_WHITELIST`]
    pub fn general() -> Self {
        let mut policy = Self::new("general", Action::Kill);
        for name in GENERAL_WHITELIST {
            policy.allow(*name);
        }
        policy
    }

    /// Allow-by-default overlay for runner mode.
    ///
    /// The `execve` rule compares the pointer value of `target`, so the same
    /// `CStr` must later be handed to `execve`.
    pub fn runner_overlay(target: &CStr) -> Self {
        let mut policy = Self::new("runner", Action::Allow);
        for name in RUNNER_BAN_LIST {
            policy.kill(*name);
        }
        policy.kill_if(
            "execve",
            ArgPredicate::not_equal(0, ArgWidth::Qword, target.as_ptr() as u64),
        );
        policy.kill_if("open", ArgPredicate::flags_contain(1, libc::O_RDWR as u64));
        policy.kill_if("openat", ArgPredicate::flags_contain(2, libc::O_WRONLY as u64));
        policy.kill_if("openat", ArgPredicate::flags_contain(2, libc::O_RDWR as u64));
        policy
    }

    /// Allow-by-default overlay for compiler mode
    pub fn compiler_overlay() -> Self {
        let mut policy = Self::new("compiler", Action::Allow);
        for name in COMPILER_BAN_LIST {
            policy.kill(*name);
        }
        policy
    }

    /// Allow-by-default overlay that only kills `fork`
    pub fn fork_ban() -> Self {
        let mut policy = Self::new("fork-ban", Action::Allow);
        policy.kill("fork");
        policy
    }

    /// Add an unconditional allow rule
    pub fn allow(&mut self, syscall: impl Into<String>) -> &mut Self {
        self.push(syscall.into(), Action::Allow, None)
    }

    /// Add an unconditional kill rule
    pub fn kill(&mut self, syscall: impl Into<String>) -> &mut Self {
        self.push(syscall.into(), Action::Kill, None)
    }

    /// Add a kill rule guarded by an argument predicate
    pub fn kill_if(&mut self, syscall: impl Into<String>, predicate: ArgPredicate) -> &mut Self {
        self.push(syscall.into(), Action::Kill, Some(predicate))
    }

    fn push(&mut self, syscall: String, action: Action, predicate: Option<ArgPredicate>) -> &mut Self {
        self.rules.push(Rule {
            syscall,
            action,
            predicate,
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_action(&self) -> Action {
        self.default_action
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Decision for `syscall` called with `args`, in first-match order.
    /// Inspection only; the kernel evaluates the compiled program.
    pub fn action_for(&self, syscall: &str, args: &[u64; 6]) -> Action {
        self.rules
            .iter()
            .filter(|rule| rule.syscall == syscall)
            .find(|rule| match rule.predicate {
                None => true,
                Some(pred) => pred.matches(args),
            })
            .map(|rule| rule.action)
            .unwrap_or(self.default_action)
    }

    /// Human-readable rule table
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} (default {}, {} rules)",
            self.name,
            self.default_action,
            self.rules.len()
        );
        for rule in &self.rules {
            match &rule.predicate {
                Some(pred) => {
                    let _ = writeln!(out, "  {:5} {:24} if {}", rule.action, rule.syscall, pred);
                }
                None => {
                    let _ = writeln!(out, "  {:5} {}", rule.action, rule.syscall);
                }
            }
        }
        out
    }
}

impl ArgPredicate {
    /// Evaluate against raw argument registers
    pub fn matches(&self, args: &[u64; 6]) -> bool {
        let Some(raw) = args.get(self.index as usize) else {
            return false;
        };
        let arg = match self.width {
            ArgWidth::Dword => *raw & 0xffff_ffff,
            ArgWidth::Qword => *raw,
        };
        match self.op {
            CmpOp::NotEqual => arg != self.value,
            CmpOp::MaskedEqual { mask } => arg & mask == self.value,
        }
    }
}

/// Privilege, session, ownership and filesystem-mutation syscalls killed in runner mode
pub const RUNNER_BAN_LIST: &[&str] = &[
    "socket",
    "setuid",
    "setgid",
    "setpgid",
    "setsid",
    "setreuid",
    "setregid",
    "setgroups",
    "setrlimit",
    "vfork",
    "chmod",
    "chown",
    "fchmod",
    "fchown",
    "fchownat",
    "link",
    "shutdown",
    "seccomp",
    "rmdir",
    "rename",
];

/// Privilege and session syscalls killed in compiler mode
pub const COMPILER_BAN_LIST: &[&str] = &[
    "socket",
    "setuid",
    "setgid",
    "setpgid",
    "setsid",
    "setreuid",
    "setregid",
    "setgroups",
    "setrlimit",
    "seccomp",
];

/// Syscalls allowed by the general base filter.
///
/// Deliberately broad; the mode overlays do the narrowing.
pub const GENERAL_WHITELIST: &[&str] = &[
    // Lifecycle
    "exit",
    "exit_group",
    "restart_syscall",
    "pause",
    "execve",
    "execveat",
    // Processes and threads
    "clone",
    "clone3",
    "fork",
    "vfork",
    "wait4",
    "waitid",
    "kill",
    "tkill",
    "tgkill",
    "set_tid_address",
    "gettid",
    "getpid",
    "getppid",
    "getpgid",
    "getpgrp",
    "getsid",
    "setpgid",
    "setsid",
    "unshare",
    "setns",
    "kcmp",
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    "process_madvise",
    "process_mrelease",
    "pidfd_open",
    "pidfd_getfd",
    "pidfd_send_signal",
    "personality",
    "prctl",
    "arch_prctl",
    "seccomp",
    "set_robust_list",
    "get_robust_list",
    "rseq",
    "get_thread_area",
    "set_thread_area",
    "modify_ldt",
    "futex",
    "futex_waitv",
    "futex_wake",
    "futex_wait",
    "futex_requeue",
    "set_mempolicy_home_node",
    "membarrier",
    // Identity and credentials
    "getuid",
    "geteuid",
    "getgid",
    "getegid",
    "getgroups",
    "getresuid",
    "getresgid",
    "setuid",
    "setgid",
    "setreuid",
    "setregid",
    "setresuid",
    "setresgid",
    "setgroups",
    "setfsuid",
    "setfsgid",
    "capget",
    "capset",
    // Signals
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigpending",
    "rt_sigtimedwait",
    "rt_sigqueueinfo",
    "rt_tgsigqueueinfo",
    "rt_sigreturn",
    "rt_sigsuspend",
    "sigaltstack",
    "signalfd",
    "signalfd4",
    "alarm",
    "getitimer",
    "setitimer",
    // Memory
    "brk",
    "mmap",
    "munmap",
    "mremap",
    "mprotect",
    "madvise",
    "mincore",
    "msync",
    "mlock",
    "mlock2",
    "mlockall",
    "munlock",
    "munlockall",
    "remap_file_pages",
    "memfd_create",
    "memfd_secret",
    "mbind",
    "get_mempolicy",
    "set_mempolicy",
    "pkey_alloc",
    "pkey_free",
    "pkey_mprotect",
    "map_shadow_stack",
    // File descriptors and I/O
    "read",
    "write",
    "readv",
    "writev",
    "pread64",
    "pwrite64",
    "preadv",
    "preadv2",
    "pwritev",
    "pwritev2",
    "lseek",
    "close",
    "close_range",
    "dup",
    "dup2",
    "dup3",
    "fcntl",
    "flock",
    "ioctl",
    "pipe",
    "pipe2",
    "sendfile",
    "splice",
    "tee",
    "vmsplice",
    "copy_file_range",
    "readahead",
    "fadvise64",
    "fallocate",
    "fsync",
    "fdatasync",
    "sync",
    "syncfs",
    "sync_file_range",
    "eventfd",
    "eventfd2",
    // Files and directories
    "open",
    "openat",
    "openat2",
    "creat",
    "open_by_handle_at",
    "name_to_handle_at",
    "stat",
    "fstat",
    "lstat",
    "newfstatat",
    "statx",
    "statfs",
    "fstatfs",
    "access",
    "faccessat",
    "faccessat2",
    "readlink",
    "readlinkat",
    "getcwd",
    "chdir",
    "fchdir",
    "chroot",
    "getdents",
    "getdents64",
    "mkdir",
    "mkdirat",
    "rmdir",
    "mknod",
    "mknodat",
    "unlink",
    "unlinkat",
    "rename",
    "renameat",
    "renameat2",
    "link",
    "linkat",
    "symlink",
    "symlinkat",
    "truncate",
    "ftruncate",
    "chmod",
    "fchmod",
    "fchmodat",
    "fchmodat2",
    "chown",
    "fchown",
    "fchownat",
    "lchown",
    "umask",
    "utime",
    "utimes",
    "utimensat",
    "futimesat",
    "lookup_dcookie",
    "cachestat",
    // Extended attributes
    "getxattr",
    "lgetxattr",
    "fgetxattr",
    "setxattr",
    "lsetxattr",
    "fsetxattr",
    "listxattr",
    "llistxattr",
    "flistxattr",
    "removexattr",
    "lremovexattr",
    "fremovexattr",
    // Polling and notification
    "poll",
    "ppoll",
    "select",
    "pselect6",
    "epoll_create",
    "epoll_create1",
    "epoll_ctl",
    "epoll_ctl_old",
    "epoll_wait",
    "epoll_wait_old",
    "epoll_pwait",
    "epoll_pwait2",
    "inotify_init",
    "inotify_init1",
    "inotify_add_watch",
    "inotify_rm_watch",
    "fanotify_init",
    "fanotify_mark",
    // Asynchronous I/O
    "io_setup",
    "io_destroy",
    "io_submit",
    "io_cancel",
    "io_getevents",
    "io_pgetevents",
    "ioprio_get",
    "ioprio_set",
    // Time and timers
    "time",
    "gettimeofday",
    "settimeofday",
    "clock_gettime",
    "clock_getres",
    "clock_settime",
    "clock_adjtime",
    "clock_nanosleep",
    "nanosleep",
    "adjtimex",
    "times",
    "timer_create",
    "timer_settime",
    "timer_gettime",
    "timer_getoverrun",
    "timer_delete",
    "timerfd_create",
    "timerfd_settime",
    "timerfd_gettime",
    // Scheduling and limits
    "sched_yield",
    "sched_getaffinity",
    "sched_setaffinity",
    "sched_getattr",
    "sched_setattr",
    "sched_getparam",
    "sched_setparam",
    "sched_getscheduler",
    "sched_setscheduler",
    "sched_get_priority_max",
    "sched_get_priority_min",
    "sched_rr_get_interval",
    "getpriority",
    "setpriority",
    "getrlimit",
    "setrlimit",
    "prlimit64",
    "getrusage",
    "getcpu",
    "getrandom",
    "sysinfo",
    "uname",
    // IPC
    "shmget",
    "shmat",
    "shmdt",
    "shmctl",
    "semget",
    "semop",
    "semctl",
    "semtimedop",
    "msgget",
    "msgsnd",
    "msgrcv",
    "msgctl",
    "mq_open",
    "mq_unlink",
    "mq_timedsend",
    "mq_timedreceive",
    "mq_notify",
    "mq_getsetattr",
    // Networking
    "socket",
    "socketpair",
    "bind",
    "listen",
    "accept",
    "accept4",
    "connect",
    "shutdown",
    "sendto",
    "recvfrom",
    "sendmsg",
    "recvmsg",
    "sendmmsg",
    "recvmmsg",
    "setsockopt",
    "getsockopt",
    "getsockname",
    "getpeername",
    // System administration
    "acct",
    "bpf",
    "perf_event_open",
    "init_module",
    "finit_module",
    "delete_module",
    "ioperm",
    "iopl",
    "mount",
    "umount2",
    "mount_setattr",
    "move_mount",
    "open_tree",
    "fsopen",
    "fsconfig",
    "fsmount",
    "fspick",
    "quotactl",
    "quotactl_fd",
    "reboot",
    "sethostname",
    "setdomainname",
    "syslog",
    "vhangup",
    "landlock_create_ruleset",
    "landlock_add_rule",
    "landlock_restrict_self",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::ffi::CString;

    fn args(values: &[u64]) -> [u64; 6] {
        let mut out = [0u64; 6];
        out[..values.len()].copy_from_slice(values);
        out
    }

    #[test]
    fn test_general_is_kill_by_default() {
        let policy = Policy::general();
        assert_eq!(policy.default_action(), Action::Kill);
        assert!(policy.rules().iter().all(|r| r.action == Action::Allow));
        assert_eq!(policy.rules().len(), GENERAL_WHITELIST.len());
        assert_eq!(policy.action_for("read", &args(&[])), Action::Allow);
        assert_eq!(policy.action_for("kexec_load", &args(&[])), Action::Kill);
    }

    #[test]
    fn test_whitelist_has_no_duplicates() {
        let unique: HashSet<_> = GENERAL_WHITELIST.iter().collect();
        assert_eq!(unique.len(), GENERAL_WHITELIST.len());
    }

    #[test]
    fn test_ban_lists_are_whitelisted_in_base() {
        for name in RUNNER_BAN_LIST.iter().chain(COMPILER_BAN_LIST) {
            assert!(GENERAL_WHITELIST.contains(name), "{} missing from base", name);
        }
    }

    #[test]
    fn test_compiler_ban_list_subset_of_runner() {
        for name in COMPILER_BAN_LIST {
            assert!(RUNNER_BAN_LIST.contains(name));
        }
    }

    #[test]
    fn test_runner_execve_only_target_pointer() {
        let target = CString::new("/bin/true").unwrap();
        let policy = Policy::runner_overlay(&target);
        let ptr = target.as_ptr() as u64;

        assert_eq!(policy.default_action(), Action::Allow);
        assert_eq!(policy.action_for("execve", &args(&[ptr])), Action::Allow);
        assert_eq!(policy.action_for("execve", &args(&[ptr + 1])), Action::Kill);
    }

    #[test]
    fn test_runner_open_flags() {
        let target = CString::new("/bin/true").unwrap();
        let policy = Policy::runner_overlay(&target);
        let rdonly = libc::O_RDONLY as u64;
        let wronly = (libc::O_WRONLY | libc::O_CREAT) as u64;
        let rdwr = libc::O_RDWR as u64;

        assert_eq!(policy.action_for("open", &args(&[0, rdonly])), Action::Allow);
        assert_eq!(policy.action_for("open", &args(&[0, rdwr])), Action::Kill);
        assert_eq!(policy.action_for("openat", &args(&[0, 0, rdonly])), Action::Allow);
        assert_eq!(policy.action_for("openat", &args(&[0, 0, wronly])), Action::Kill);
        assert_eq!(policy.action_for("openat", &args(&[0, 0, rdwr])), Action::Kill);
    }

    #[test]
    fn test_runner_bans() {
        let target = CString::new("/bin/true").unwrap();
        let policy = Policy::runner_overlay(&target);
        for name in RUNNER_BAN_LIST {
            assert_eq!(policy.action_for(name, &args(&[])), Action::Kill, "{}", name);
        }
        assert_eq!(policy.action_for("read", &args(&[])), Action::Allow);
        assert_eq!(policy.action_for("fork", &args(&[])), Action::Allow);
    }

    #[test]
    fn test_compiler_allows_writes_and_exec() {
        let policy = Policy::compiler_overlay();
        let wronly = (libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC) as u64;
        assert_eq!(policy.action_for("openat", &args(&[0, 0, wronly])), Action::Allow);
        assert_eq!(policy.action_for("execve", &args(&[0x1234])), Action::Allow);
        assert_eq!(policy.action_for("vfork", &args(&[])), Action::Allow);
        assert_eq!(policy.action_for("socket", &args(&[])), Action::Kill);
    }

    #[test]
    fn test_fork_ban_only_kills_fork() {
        let policy = Policy::fork_ban();
        assert_eq!(policy.rules().len(), 1);
        assert_eq!(policy.action_for("fork", &args(&[])), Action::Kill);
        assert_eq!(policy.action_for("clone", &args(&[])), Action::Allow);
    }

    #[test]
    fn test_dword_predicate_ignores_upper_bits() {
        let pred = ArgPredicate::flags_contain(0, libc::O_RDWR as u64);
        assert!(pred.matches(&args(&[0xffff_0000_0000_0002])));
        assert!(!pred.matches(&args(&[0x0000_0001_0000_0000])));
    }

    #[test]
    fn test_describe_lists_rules() {
        let text = Policy::fork_ban().describe();
        assert!(text.starts_with("fork-ban (default ALLOW, 1 rules)"));
        assert!(text.contains("KILL  fork"));

        let target = CString::new("/bin/true").unwrap();
        let text = Policy::runner_overlay(&target).describe();
        assert!(text.contains("arg2 & 0o1 == 0o1"));
    }
}
