//! Execution layer: supervised runs
//!
//! [`Supervisor::run`] forks a child, confines it with the mode's seccomp
//! policy stack, execs the target and watches it until it exits or is killed.

pub mod image;
pub mod supervisor;

pub use image::ExecImage;
pub use supervisor::{Phase, Supervisor};
