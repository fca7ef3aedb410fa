//! Side-effecting operations: config, HTTP, filesystem, processes, persistence.

pub mod config;
pub mod fsops;
pub mod http;
pub mod process;
pub mod store;
