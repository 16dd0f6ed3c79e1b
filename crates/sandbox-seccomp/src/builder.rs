//! Per-mode policy construction and installation
//!
//! Every sandbox starts from the kill-by-default [`Policy::general`] base and
//! stacks allow-by-default overlays on top. The kernel evaluates all loaded
//! filters and the most restrictive verdict wins, so overlays can only narrow.

use std::ffi::CStr;

use log::debug;
use sandbox_core::{Mode, PolicyError};

use crate::bpf::CompiledFilter;
use crate::policy::Policy;

type Result<T> = std::result::Result<T, PolicyError>;

/// Summary of what a successful installation loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledPolicy {
    pub mode: Option<Mode>,
    pub layers: usize,
    pub fork_banned: bool,
}

/// Compiled filters in load order.
///
/// Compilation happens up front (it allocates); [`PolicyStack::install`]
/// only issues the load syscalls, which keeps it usable in a forked child.
#[derive(Debug, Clone)]
pub struct PolicyStack {
    mode: Option<Mode>,
    fork_banned: bool,
    layers: Vec<CompiledFilter>,
}

impl PolicyStack {
    fn compile(mode: Option<Mode>, fork_banned: bool, policies: &[Policy]) -> Result<Self> {
        let layers = policies
            .iter()
            .map(CompiledFilter::from_policy)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            mode,
            fork_banned,
            layers,
        })
    }

    /// Whitelist base only
    pub fn general() -> Result<Self> {
        Self::compile(None, false, &[Policy::general()])
    }

    /// Base plus the runner overlay bound to `target`
    pub fn runner(target: &CStr) -> Result<Self> {
        Self::compile(
            Some(Mode::Runner),
            false,
            &[Policy::general(), Policy::runner_overlay(target)],
        )
    }

    /// Base plus the compiler overlay
    pub fn compiler() -> Result<Self> {
        Self::compile(
            Some(Mode::Compiler),
            false,
            &[Policy::general(), Policy::compiler_overlay()],
        )
    }

    /// Fork-ban overlay on its own
    pub fn fork_ban() -> Result<Self> {
        Self::compile(None, true, &[Policy::fork_ban()])
    }

    /// Stack for a supervised run.
    ///
    /// The fork ban, when requested, is loaded before the mode overlay because
    /// both overlays kill `seccomp` and nothing can be loaded after them.
    pub fn for_mode(mode: Mode, target: &CStr, ban_fork: bool) -> Result<Self> {
        let mut policies = vec![Policy::general()];
        if ban_fork {
            policies.push(Policy::fork_ban());
        }
        policies.push(match mode {
            Mode::Runner => Policy::runner_overlay(target),
            Mode::Compiler => Policy::compiler_overlay(),
        });

        let stack = Self::compile(Some(mode), ban_fork, &policies)?;
        debug!(
            "Policy stack for {} mode: [{}]",
            mode,
            stack
                .layers
                .iter()
                .map(|l| l.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(stack)
    }

    pub fn layers(&self) -> &[CompiledFilter] {
        &self.layers
    }

    /// Load every layer into the calling process, in order.
    ///
    /// On error some layers may already be active; the caller must not go on
    /// to run untrusted code.
    pub fn install(&self) -> Result<InstalledPolicy> {
        for layer in &self.layers {
            layer.install()?;
        }
        Ok(InstalledPolicy {
            mode: self.mode,
            layers: self.layers.len(),
            fork_banned: self.fork_banned,
        })
    }
}

/// Load the kill-by-default whitelist into the calling process
pub fn build_general_policy() -> Result<InstalledPolicy> {
    PolicyStack::general()?.install()
}

/// Load the runner policy. `target` must be the exact `CStr` later passed to `execve`.
pub fn build_runner_policy(target: &CStr) -> Result<InstalledPolicy> {
    PolicyStack::runner(target)?.install()
}

/// Load the compiler policy into the calling process
pub fn build_compiler_policy() -> Result<InstalledPolicy> {
    PolicyStack::compiler()?.install()
}

/// Load the standalone fork-ban overlay into the calling process
pub fn build_fork_ban_policy() -> Result<InstalledPolicy> {
    PolicyStack::fork_ban()?.install()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn names(stack: &PolicyStack) -> Vec<&'static str> {
        stack.layers().iter().map(|l| l.name()).collect()
    }

    #[test]
    fn test_runner_stack_order() {
        let target = CString::new("/bin/true").unwrap();
        let stack = PolicyStack::runner(&target).unwrap();
        assert_eq!(names(&stack), vec!["general", "runner"]);
    }

    #[test]
    fn test_compiler_stack_order() {
        let stack = PolicyStack::compiler().unwrap();
        assert_eq!(names(&stack), vec!["general", "compiler"]);
    }

    #[test]
    fn test_fork_ban_loaded_before_overlay() {
        let target = CString::new("/bin/true").unwrap();
        let stack = PolicyStack::for_mode(Mode::Runner, &target, true).unwrap();
        assert_eq!(names(&stack), vec!["general", "fork-ban", "runner"]);

        let stack = PolicyStack::for_mode(Mode::Compiler, &target, false).unwrap();
        assert_eq!(names(&stack), vec!["general", "compiler"]);
    }

    #[test]
    fn test_standalone_stacks() {
        assert_eq!(names(&PolicyStack::general().unwrap()), vec!["general"]);
        assert_eq!(names(&PolicyStack::fork_ban().unwrap()), vec!["fork-ban"]);
    }
}
