//! Shared types for the studio client: the job model, REST wire types,
//! configuration, platform directories and session persistence.

pub mod config;
pub mod job;
pub mod platform;
pub mod protocol;
pub mod session;
