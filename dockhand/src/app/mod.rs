//! Command orchestration

pub mod options;
pub mod run;
