//! Deterministic, pure logic shared by the deployment engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod errors;
pub mod lifecycle;
pub mod markers;
pub mod paths;
pub mod ranking;
pub mod registry;
pub mod slug;
pub mod types;
pub mod verify;
