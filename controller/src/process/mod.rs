//! External process execution

pub mod runner;

pub use runner::{CommandSpec, ProcessOutput, ProcessRunner, SystemRunner};
