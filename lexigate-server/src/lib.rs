//! LexiGate Server: HTTP surface for request governance.
//!
//! Provides the axum middleware that calls the core admission and
//! completion hooks, the admin server (`/health`, `/metrics`,
//! `/metrics/json`, `/alerts`) and the process lifecycle used by the
//! `lexigate` binary.

pub mod admin;
pub mod app;
pub mod error;
pub mod middleware;
pub mod runtime;
