//! autodeploy library
//!
//! Core modules of the GitOps deployment controller.

pub mod app;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod process;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
