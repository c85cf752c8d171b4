//! Command implementations

pub mod diff;
pub mod envs;
pub mod run;
pub mod status;
pub mod sync;
