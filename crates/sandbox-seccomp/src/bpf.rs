//! Seccomp BPF filter compilation and loading using seccompiler

use crate::policy::{Action, ArgWidth, CmpOp, Policy, Rule};
use crate::syscall_table::{get_syscall_number_from_name, is_known_syscall, native_table};
use log::{debug, trace};
use sandbox_core::PolicyError;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition,
    SeccompFilter as SeccompilerFilter, SeccompRule, TargetArch, apply_filter,
};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryInto;

type Result<T> = std::result::Result<T, PolicyError>;

/// Filter under construction.
///
/// Owns every rule registered so far; consumed by [`FilterContext::compile`].
/// Any early return drops it, so a half-built filter never outlives the call.
pub struct FilterContext {
    name: &'static str,
    default_action: Action,
    arch: TargetArch,
    rules: BTreeMap<i64, Vec<SeccompRule>>,
    unconditional: BTreeSet<i64>,
    rule_count: usize,
}

impl FilterContext {
    /// Create an empty context for the host architecture
    pub fn new(name: &'static str, default_action: Action) -> Result<Self> {
        let arch_name = std::env::consts::ARCH;
        if native_table().is_none() {
            return Err(PolicyError::UnsupportedArch(arch_name.to_string()));
        }
        let arch: TargetArch = arch_name
            .try_into()
            .map_err(|_| PolicyError::UnsupportedArch(arch_name.to_string()))?;

        Ok(Self {
            name,
            default_action,
            arch,
            rules: BTreeMap::new(),
            unconditional: BTreeSet::new(),
            rule_count: 0,
        })
    }

    /// Register every rule of `policy`
    pub fn from_policy(policy: &Policy) -> Result<Self> {
        let mut ctx = Self::new(policy.name(), policy.default_action())?;
        for rule in policy.rules() {
            ctx.add_rule(rule)?;
        }
        Ok(ctx)
    }

    /// Register one rule.
    ///
    /// Syscalls that only exist on another architecture are skipped; names
    /// that are not syscalls anywhere are rejected.
    pub fn add_rule(&mut self, rule: &Rule) -> Result<()> {
        if rule.action == self.default_action {
            return Err(PolicyError::RuleRejected {
                syscall: rule.syscall.clone(),
                reason: format!("action {} equals the filter default", rule.action),
            });
        }

        let num = match get_syscall_number_from_name(&rule.syscall) {
            Some(num) => num,
            None if is_known_syscall(&rule.syscall) => {
                trace!(
                    "{}: '{}' does not exist on {}, skipped",
                    self.name,
                    rule.syscall,
                    std::env::consts::ARCH
                );
                return Ok(());
            }
            None => return Err(PolicyError::UnknownSyscall(rule.syscall.clone())),
        };

        let chain = self.rules.entry(num).or_default();
        match rule.predicate {
            None => {
                self.unconditional.insert(num);
            }
            Some(pred) => {
                let width = match pred.width {
                    ArgWidth::Dword => SeccompCmpArgLen::Dword,
                    ArgWidth::Qword => SeccompCmpArgLen::Qword,
                };
                let op = match pred.op {
                    CmpOp::NotEqual => SeccompCmpOp::Ne,
                    CmpOp::MaskedEqual { mask } => SeccompCmpOp::MaskedEq(mask),
                };
                let rejected = |e: seccompiler::BackendError| PolicyError::RuleRejected {
                    syscall: rule.syscall.clone(),
                    reason: e.to_string(),
                };
                let condition =
                    SeccompCondition::new(pred.index, width, op, pred.value).map_err(rejected)?;
                chain.push(SeccompRule::new(vec![condition]).map_err(rejected)?);
            }
        }
        self.rule_count += 1;
        Ok(())
    }

    /// Compile to a BPF program. Pure; nothing is loaded.
    pub fn compile(mut self) -> Result<CompiledFilter> {
        // An unconditional match subsumes every predicate on the same syscall.
        for num in &self.unconditional {
            if let Some(chain) = self.rules.get_mut(num) {
                chain.clear();
            }
        }

        let mismatch_action = to_seccomp_action(self.default_action);
        let match_action = to_seccomp_action(self.default_action.opposite());
        let syscalls = self.rules.len();

        let filter = SeccompilerFilter::new(self.rules, mismatch_action, match_action, self.arch)
            .map_err(|e| PolicyError::Compile(format!("{}: {}", self.name, e)))?;
        let program: BpfProgram = filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| {
                PolicyError::Compile(format!("{}: {}", self.name, e))
            })?;

        debug!(
            "Compiled '{}' filter: default {}, {} rules over {} syscalls, {} instructions",
            self.name,
            self.default_action,
            self.rule_count,
            syscalls,
            program.len()
        );

        Ok(CompiledFilter {
            name: self.name,
            default_action: self.default_action,
            rule_count: self.rule_count,
            program,
        })
    }
}

fn to_seccomp_action(action: Action) -> SeccompAction {
    match action {
        Action::Allow => SeccompAction::Allow,
        Action::Kill => SeccompAction::KillProcess,
    }
}

/// A compiled filter program ready to be loaded
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    name: &'static str,
    default_action: Action,
    rule_count: usize,
    program: BpfProgram,
}

impl CompiledFilter {
    /// Compile `policy` in one step
    pub fn from_policy(policy: &Policy) -> Result<Self> {
        FilterContext::from_policy(policy)?.compile()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_action(&self) -> Action {
        self.default_action
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Number of BPF instructions
    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Raw BPF bytecode
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.program.len() * std::mem::size_of::<seccompiler::sock_filter>();
        // SAFETY: sock_filter is a plain repr(C) struct and the slice covers
        // exactly the program's backing storage.
        unsafe { std::slice::from_raw_parts(self.program.as_ptr() as *const u8, len).to_vec() }
    }

    /// Load the filter into the calling process.
    ///
    /// Irreversible. Does not allocate, so it is safe to call between `fork`
    /// and `execve`. Does NOT require root - only PR_SET_NO_NEW_PRIVS.
    pub fn install(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(PolicyError::ActivationFailed {
                errno: libc::EINVAL,
            });
        }

        // SAFETY: prctl with constant arguments
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(PolicyError::ActivationFailed { errno: last_errno() });
        }

        apply_filter(&self.program).map_err(|_| PolicyError::ActivationFailed { errno: last_errno() })
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EINVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ArgPredicate;
    use std::ffi::CString;

    #[test]
    fn test_compile_general_filter() {
        let filter = CompiledFilter::from_policy(&Policy::general()).unwrap();
        assert_eq!(filter.name(), "general");
        assert_eq!(filter.default_action(), Action::Kill);
        assert!(!filter.is_empty());
        assert!(!filter.to_bytes().is_empty());
    }

    #[test]
    fn test_compile_overlays() {
        let target = CString::new("/bin/true").unwrap();
        for policy in [
            Policy::runner_overlay(&target),
            Policy::compiler_overlay(),
            Policy::fork_ban(),
        ] {
            let filter = CompiledFilter::from_policy(&policy).unwrap();
            assert_eq!(filter.default_action(), Action::Allow);
            assert!(filter.len() > 0);
        }
    }

    #[test]
    fn test_compile_is_deterministic() {
        let target = CString::new("/bin/true").unwrap();
        let a = CompiledFilter::from_policy(&Policy::runner_overlay(&target)).unwrap();
        let b = CompiledFilter::from_policy(&Policy::runner_overlay(&target)).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_target_pointer_changes_program() {
        let first = CString::new("/bin/true").unwrap();
        let second = CString::new("/bin/true").unwrap();
        let a = CompiledFilter::from_policy(&Policy::runner_overlay(&first)).unwrap();
        let b = CompiledFilter::from_policy(&Policy::runner_overlay(&second)).unwrap();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_rejects_unknown_syscalls() {
        let mut policy = Policy::general();
        policy.allow("syscall_que_nao_existe_xyz_123");
        let err = CompiledFilter::from_policy(&policy).unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownSyscall("syscall_que_nao_existe_xyz_123".to_string())
        );
    }

    #[test]
    fn test_rejects_rule_matching_default() {
        let mut policy = Policy::new("bogus", Action::Allow);
        policy.allow("read");
        let err = CompiledFilter::from_policy(&policy).unwrap_err();
        assert!(matches!(err, PolicyError::RuleRejected { .. }));
    }

    #[test]
    fn test_rejects_bad_argument_index() {
        let mut policy = Policy::new("bogus", Action::Allow);
        policy.kill_if("openat", ArgPredicate::flags_contain(9, 1));
        let err = CompiledFilter::from_policy(&policy).unwrap_err();
        match err {
            PolicyError::RuleRejected { syscall, .. } => assert_eq!(syscall, "openat"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unconditional_rule_subsumes_predicates() {
        let mut with_pred = Policy::new("a", Action::Allow);
        with_pred.kill_if("openat", ArgPredicate::flags_contain(2, 1));
        with_pred.kill("openat");

        let mut plain = Policy::new("a", Action::Allow);
        plain.kill("openat");

        let a = CompiledFilter::from_policy(&with_pred).unwrap();
        let b = CompiledFilter::from_policy(&plain).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.rule_count(), 2);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_foreign_syscalls_are_skipped() {
        let mut policy = Policy::new("a", Action::Allow);
        policy.kill("open");
        let filter = CompiledFilter::from_policy(&policy).unwrap();
        assert_eq!(filter.rule_count(), 0);
    }
}
