//! Environment-adaptive endpoint deployment.
//!
//! Publishes a small set of well-known resources (discovery manifests, a
//! policy section in a shared file, a proxying API route) on hosts whose
//! capabilities are not known in advance. Each endpoint is probed with real
//! HTTP round-trips, a strategy is picked from a static registry, and the
//! strategy's building blocks run with saga-style rollback.
//!
//! - **[`core`]**: Pure logic (registry, ranking, lifecycle, markers, result
//!   types). No I/O.
//! - **[`io`]**: Side effects (config, filesystem, HTTP, processes, state
//!   store), each behind a narrow function or trait.
//!
//! [`probe`], [`route_test`], [`blocks`] and [`executor`] build on both, and
//! [`manager`] ties them into the register/switch/restore lifecycle. The
//! host serves deployed dynamic routes through [`dispatch`].

pub mod blocks;
pub mod core;
pub mod dispatch;
pub mod endpoint;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod status;
pub mod templates;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
