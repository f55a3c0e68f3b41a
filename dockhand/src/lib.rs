//! Dockhand
//!
//! Zero-downtime blue-green deployments of containerised applications to a
//! single host over ssh, with commit-addressed preview environments.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod pipeline;
pub mod remote;
pub mod storage;
pub mod swap;
pub mod tooling;
pub mod utils;
pub mod workers;
