//! Pre-built `execve` arguments
//!
//! Everything the child needs to exec its target is converted to C strings
//! before `fork`, so the child never allocates.

use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use libc::c_char;
use sandbox_core::{ConfigError, RunConfig};

/// Path, argument and environment vectors ready for `execve`.
///
/// The pointer arrays point into the owned `CString` buffers, which stay put
/// when the image itself moves.
#[derive(Debug)]
pub struct ExecImage {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

fn to_cstring(bytes: &[u8], what: &'static str) -> Result<CString, ConfigError> {
    CString::new(bytes).map_err(|_| ConfigError::InteriorNul { what })
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

impl ExecImage {
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let path = to_cstring(config.target().as_os_str().as_bytes(), "target path")?;
        let argv = config
            .argv()
            .iter()
            .map(|a| to_cstring(a.as_bytes(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;
        let envp = config
            .envp()
            .iter()
            .map(|e| to_cstring(e.as_bytes(), "environment entry"))
            .collect::<Result<Vec<_>, _>>()?;

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        Ok(Self {
            path,
            argv,
            envp,
            argv_ptrs,
            envp_ptrs,
        })
    }

    /// The exact string handed to `execve`; the runner policy keys on its address.
    pub fn path(&self) -> &CStr {
        &self.path
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn envp(&self) -> &[CString] {
        &self.envp
    }

    /// Replace the calling process with the target.
    ///
    /// Returns the errno only if `execve` fails. Async-signal-safe.
    pub(crate) fn exec(&self) -> i32 {
        // SAFETY: all three pointers reference live, nul-terminated data
        // owned by `self`, and both arrays end with a null pointer.
        unsafe {
            libc::execve(
                self.path.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
        }
        std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL)
    }
}
