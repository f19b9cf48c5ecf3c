//! Imperative shell around `tornbot-core`: configuration, remote clients,
//! the action executor and the scheduler loop.

pub mod api;
pub mod browser;
pub mod config;
pub mod executor;
pub mod scheduler;
